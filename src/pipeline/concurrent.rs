//! Fan-out engine with one writer task and bounded queue per sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::sink_set::SinkSet;
use super::writer::{Control, Pending, SinkWriter};
use super::{close_endpoints, next_read_len, open_endpoints, read_chunk, FanOut};
use crate::event::emit;
use crate::sink::{same_sink, Sink};
use crate::source::Source;
use crate::{AudioChunk, ConcurrentConfig, ConnectorError, ConnectorEvent, EventCallback};

/// A running writer and the channels feeding it.
pub(super) struct Lane {
    pub id: u64,
    pub sink: Arc<dyn Sink>,
    pub chunks: mpsc::Sender<Pending>,
    pub control: mpsc::UnboundedSender<Control>,
    pub task: JoinHandle<()>,
}

/// State shared between the reader and the writer tasks.
///
/// Both locks are only ever held for a few instructions and never across an
/// `.await`, and no code path holds both at once. There is at most one lane
/// per distinct sink, and a sink always leaves `sinks` before its lane is
/// removed from `lanes`.
#[derive(Default)]
pub(super) struct Shared {
    pub sinks: Mutex<SinkSet>,
    pub lanes: Mutex<Vec<Lane>>,
}

/// Copies bytes from one source to many sinks without letting a slow sink
/// hold up the others.
///
/// `open()` starts one writer task per attached sink. `transfer()` reads from
/// the source and pushes every chunk into each sink's bounded queue. Each
/// writer drains its own queue at the pace of its sink.
///
/// - A sink whose queue stays full for
///   [`push_timeout`](ConcurrentConfig::push_timeout) is detached and closed.
/// - A sink whose write fails is closed and reopened per the
///   [`ReconnectPolicy`](crate::ReconnectPolicy), then detached if that fails.
/// - `close()` lets every writer drain its queue (bounded by
///   [`drain_timeout`](ConcurrentConfig::drain_timeout)) before closing.
///
/// All methods take `&self`, so the connector can sit in an `Arc` and be cut
/// from another task while a transfer runs. Sinks should be attached before
/// `open()`: a sink attached to a running session gets no writer until the
/// next `open()`. A sink attached twice shares one writer, which writes each
/// chunk twice.
///
/// # Example
///
/// ```no_run
/// use broadcast_audio::{AudioFormat, ConcurrentConfig, ConcurrentConnector, FileSink, FileSource};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), broadcast_audio::ConnectorError> {
/// let config = ConcurrentConfig::for_format(AudioFormat::default(), Duration::from_secs(10), 4096);
/// let connector = Arc::new(ConcurrentConnector::new(
///     Arc::new(FileSource::new("/dev/dsp")),
///     config,
/// ));
/// connector.attach(Arc::new(FileSink::new("archive.raw")));
///
/// connector.open().await?;
///
/// // Cut the archive every hour from another task
/// let cutter = Arc::clone(&connector);
/// tokio::spawn(async move {
///     loop {
///         tokio::time::sleep(Duration::from_secs(3600)).await;
///         cutter.cut().await;
///     }
/// });
///
/// connector.transfer(0, 4096, Duration::from_secs(1)).await?;
/// connector.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ConcurrentConnector {
    source: Arc<dyn Source>,
    config: ConcurrentConfig,
    shared: Arc<Shared>,
    /// Serializes `open`, `close` and `cut`, so a cut never reaches a sink
    /// while `close` is still draining its writer.
    lifecycle: tokio::sync::Mutex<()>,
    event_callback: Option<EventCallback>,
    next_lane: AtomicU64,
}

impl ConcurrentConnector {
    /// Creates a connector reading from `source`, with no sinks.
    pub fn new(source: Arc<dyn Source>, config: ConcurrentConfig) -> Self {
        Self {
            source,
            config,
            shared: Arc::new(Shared::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            event_callback: None,
            next_lane: AtomicU64::new(0),
        }
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// The source this connector reads from.
    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    /// The configuration this connector was built with.
    pub fn config(&self) -> &ConcurrentConfig {
        &self.config
    }

    /// A snapshot of the attached sinks, in attachment order.
    pub fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.shared.sinks.lock().snapshot()
    }

    /// Adds a sink to the end of the set.
    pub fn attach(&self, sink: Arc<dyn Sink>) {
        tracing::debug!(sink = sink.name(), "sink attached");
        self.shared.sinks.lock().push(sink);
    }

    /// Removes the first slot holding `sink`, without closing it.
    ///
    /// If a writer is running for the sink and this was its last slot, the
    /// writer finishes the chunks already queued and exits.
    pub fn detach(&self, sink: &Arc<dyn Sink>) -> bool {
        let still_attached = {
            let mut sinks = self.shared.sinks.lock();
            if !sinks.remove(sink) {
                return false;
            }
            sinks.contains(sink)
        };
        if still_attached {
            tracing::debug!(sink = sink.name(), "sink slot detached");
            return true;
        }
        let lane = {
            let mut lanes = self.shared.lanes.lock();
            lanes
                .iter()
                .position(|lane| same_sink(&lane.sink, sink))
                .map(|index| lanes.remove(index))
        };
        // Dropping the lane closes its queue
        drop(lane);
        tracing::debug!(sink = sink.name(), "sink detached");
        true
    }

    /// Number of attached sinks.
    pub fn sink_count(&self) -> usize {
        self.shared.sinks.lock().len()
    }

    /// Whether `sink` is still attached. Sinks detached by their writer or
    /// for lagging behind report `false`.
    pub fn is_attached(&self, sink: &Arc<dyn Sink>) -> bool {
        self.shared.sinks.lock().contains(sink)
    }

    /// Opens the source and every sink, then starts one writer per sink.
    ///
    /// Rollback on failure is the same as [`Connector::open`](crate::Connector::open);
    /// no writer is started in that case.
    pub async fn open(&self) -> Result<(), ConnectorError> {
        let _lifecycle = self.lifecycle.lock().await;
        let sinks = self.sinks();
        open_endpoints(&*self.source, &sinks).await?;
        let writers = self.spawn_writers();
        tracing::info!(
            source = self.source.name(),
            sinks = sinks.len(),
            writers,
            queue_capacity = self.config.queue_capacity,
            "concurrent connector opened"
        );
        Ok(())
    }

    /// Starts a writer for every attached sink that has none. Returns how
    /// many were started.
    fn spawn_writers(&self) -> usize {
        let sinks = self.shared.sinks.lock().distinct();
        let mut lanes = self.shared.lanes.lock();
        let mut spawned = 0;

        for sink in &sinks {
            if lanes.iter().any(|lane| same_sink(&lane.sink, sink)) {
                continue;
            }
            let id = self.next_lane.fetch_add(1, Ordering::Relaxed);
            let (chunks, chunk_rx) = mpsc::channel(self.config.queue_capacity.max(1));
            let (control, control_rx) = mpsc::unbounded_channel();
            let writer = SinkWriter::new(
                id,
                Arc::clone(sink),
                Arc::clone(&self.shared),
                self.config.reconnect.clone(),
                self.event_callback.clone(),
            );
            let task = tokio::spawn(writer.run(chunk_rx, control_rx));

            lanes.push(Lane {
                id,
                sink: Arc::clone(sink),
                chunks,
                control,
                task,
            });
            spawned += 1;
        }
        spawned
    }

    /// Moves audio until `total_bytes` have been read (0 = until EOF).
    ///
    /// Returns the number of bytes read from the source and queued for the
    /// sinks. The transfer ends early, without error, when the source is not
    /// readable within `timeout`, reaches EOF, or no sinks remain. With no
    /// sinks or a zero `chunk_size` nothing is read.
    pub async fn transfer(
        &self,
        total_bytes: u64,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<u64, ConnectorError> {
        if self.sink_count() == 0 || chunk_size == 0 {
            return Ok(0);
        }

        tracing::debug!(total_bytes, chunk_size, "transfer started");
        let mut buf = vec![0u8; chunk_size];
        let mut bytes: u64 = 0;
        let mut sequence: u64 = 0;

        while total_bytes == 0 || bytes < total_bytes {
            let len = next_read_len(chunk_size, total_bytes, bytes);
            let Some(read) = read_chunk(&*self.source, &mut buf[..len], timeout, bytes).await?
            else {
                tracing::warn!(bytes, "source not readable in time, ending transfer");
                emit(
                    self.event_callback.as_ref(),
                    ConnectorEvent::SourceTimeout { bytes },
                );
                break;
            };
            if read == 0 {
                tracing::debug!(bytes, "end of stream");
                emit(
                    self.event_callback.as_ref(),
                    ConnectorEvent::EndOfStream { bytes },
                );
                break;
            }

            let chunk = AudioChunk::from_slice(&buf[..read], bytes, sequence);
            bytes += read as u64;
            sequence += 1;
            self.distribute(chunk, timeout).await;

            if self.sink_count() == 0 {
                tracing::warn!(bytes, "no sinks left, ending transfer");
                break;
            }
        }

        tracing::debug!(bytes, "transfer finished");
        Ok(bytes)
    }

    /// Queues one chunk for every running writer.
    ///
    /// The pushes run concurrently, so only a full queue waits, and for at
    /// most `push_timeout`. A queue still full after that gets its sink
    /// detached.
    async fn distribute(&self, chunk: AudioChunk, timeout: Duration) {
        let targets: Vec<(u64, Arc<dyn Sink>, mpsc::Sender<Pending>)> = self
            .shared
            .lanes
            .lock()
            .iter()
            .map(|lane| (lane.id, Arc::clone(&lane.sink), lane.chunks.clone()))
            .collect();

        let push_timeout = self.config.push_timeout;
        let pushes = targets.iter().map(|(_, _, chunks)| {
            let pending = Pending {
                chunk: chunk.clone(),
                timeout,
            };
            tokio::time::timeout(push_timeout, chunks.send(pending))
        });
        let results = join_all(pushes).await;

        for ((id, sink, _), result) in targets.iter().zip(results) {
            // A send error means the writer already exited and detached itself
            if result.is_err() {
                tracing::warn!(sink = sink.name(), "sink queue stayed full, detaching");
                emit(
                    self.event_callback.as_ref(),
                    ConnectorEvent::QueueOverflow {
                        sink_name: sink.name().to_string(),
                    },
                );
                self.drop_lane(*id, sink).await;
            }
        }
    }

    /// Stops a lagging sink's writer, then detaches and closes the sink.
    ///
    /// Claiming the sink from the set comes first: if the writer got there
    /// before us and has already dropped its lane, it owns the close.
    async fn drop_lane(&self, id: u64, sink: &Arc<dyn Sink>) {
        let remaining = {
            let mut sinks = self.shared.sinks.lock();
            (sinks.remove_all(sink) > 0).then(|| sinks.len())
        };
        let lane = {
            let mut lanes = self.shared.lanes.lock();
            lanes
                .iter()
                .position(|lane| lane.id == id)
                .map(|index| lanes.remove(index))
        };
        let stopped_writer = match lane {
            Some(Lane { task, .. }) => {
                task.abort();
                if let Err(e) = task.await {
                    if !e.is_cancelled() {
                        tracing::warn!(sink = sink.name(), error = %e, "writer task failed");
                    }
                }
                true
            }
            None => false,
        };

        // A writer stopped halfway through its own detach leaves the close to us
        if remaining.is_some() || (stopped_writer && sink.is_open()) {
            if let Err(e) = sink.close().await {
                tracing::warn!(sink = sink.name(), error = %e, "sink close failed");
            }
        }
        if let Some(remaining) = remaining {
            tracing::warn!(sink = sink.name(), remaining, "sink detached");
            emit(
                self.event_callback.as_ref(),
                ConnectorEvent::SinkDetached {
                    sink_name: sink.name().to_string(),
                    remaining,
                },
            );
        }
    }

    /// Lets every writer drain its queue, then closes the source and every
    /// attached sink. Safe to call repeatedly.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_writers().await;
        let sinks = self.sinks();
        close_endpoints(&*self.source, &sinks).await;
        tracing::info!(source = self.source.name(), "concurrent connector closed");
    }

    async fn stop_writers(&self) {
        let lanes = std::mem::take(&mut *self.shared.lanes.lock());
        if lanes.is_empty() {
            return;
        }

        let drain_timeout = self.config.drain_timeout;
        let joins = lanes.into_iter().map(|lane| async move {
            let Lane {
                sink,
                chunks,
                control,
                mut task,
                ..
            } = lane;
            // With its queue closed the writer exits once it has written
            // what is left
            drop(chunks);
            drop(control);
            match tokio::time::timeout(drain_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(sink = sink.name(), error = %e, "writer task failed");
                }
                Err(_) => {
                    tracing::warn!(sink = sink.name(), "writer did not drain in time, aborting");
                    task.abort();
                    let _ = task.await;
                }
            }
        });
        join_all(joins).await;
    }

    /// Asks every attached sink to start a new output segment, once per
    /// sink however many slots it holds.
    ///
    /// A sink with a running writer gets the cut through that writer,
    /// between two writes. A sink without one is cut directly. A cut issued
    /// while `close()` runs waits for it to finish.
    pub async fn cut(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        // Lanes first: a sink whose lane is gone has already left the set
        let controls: Vec<(Arc<dyn Sink>, mpsc::UnboundedSender<Control>)> = self
            .shared
            .lanes
            .lock()
            .iter()
            .map(|lane| (Arc::clone(&lane.sink), lane.control.clone()))
            .collect();
        let unattended: Vec<Arc<dyn Sink>> = self
            .shared
            .sinks
            .lock()
            .distinct()
            .into_iter()
            .filter(|sink| !controls.iter().any(|(s, _)| same_sink(s, sink)))
            .collect();

        for (sink, control) in controls {
            if control.send(Control::Cut).is_err() {
                tracing::trace!(sink = sink.name(), "writer gone, cut skipped");
            }
        }
        for sink in unattended {
            if let Err(e) = sink.cut().await {
                tracing::warn!(sink = sink.name(), error = %e, "sink cut failed");
            }
        }
    }
}

impl Drop for ConcurrentConnector {
    fn drop(&mut self) {
        for lane in self.shared.lanes.lock().drain(..) {
            lane.task.abort();
        }
    }
}

#[async_trait]
impl FanOut for ConcurrentConnector {
    fn attach(&mut self, sink: Arc<dyn Sink>) {
        ConcurrentConnector::attach(self, sink);
    }

    fn detach(&mut self, sink: &Arc<dyn Sink>) -> bool {
        ConcurrentConnector::detach(self, sink)
    }

    fn sink_count(&self) -> usize {
        ConcurrentConnector::sink_count(self)
    }

    async fn open(&mut self) -> Result<(), ConnectorError> {
        ConcurrentConnector::open(self).await
    }

    async fn transfer(
        &mut self,
        total_bytes: u64,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<u64, ConnectorError> {
        ConcurrentConnector::transfer(self, total_bytes, chunk_size, timeout).await
    }

    async fn close(&mut self) {
        ConcurrentConnector::close(self).await;
    }

    async fn cut(&self) {
        ConcurrentConnector::cut(self).await;
    }
}

/// Lets a session drive a connector that other tasks also hold, e.g. to
/// `cut()` while the transfer runs.
#[async_trait]
impl FanOut for Arc<ConcurrentConnector> {
    fn attach(&mut self, sink: Arc<dyn Sink>) {
        ConcurrentConnector::attach(self, sink);
    }

    fn detach(&mut self, sink: &Arc<dyn Sink>) -> bool {
        ConcurrentConnector::detach(self, sink)
    }

    fn sink_count(&self) -> usize {
        ConcurrentConnector::sink_count(self)
    }

    async fn open(&mut self) -> Result<(), ConnectorError> {
        ConcurrentConnector::open(self).await
    }

    async fn transfer(
        &mut self,
        total_bytes: u64,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<u64, ConnectorError> {
        ConcurrentConnector::transfer(self, total_bytes, chunk_size, timeout).await
    }

    async fn close(&mut self) {
        ConcurrentConnector::close(self).await;
    }

    async fn cut(&self) {
        ConcurrentConnector::cut(self).await;
    }
}
