//! Reference fan-out engine: one loop, sinks written in turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::sink_set::SinkSet;
use super::{close_endpoints, next_read_len, open_endpoints, read_chunk, FanOut};
use crate::event::emit;
use crate::sink::Sink;
use crate::source::Source;
use crate::{ConnectorError, ConnectorEvent, EventCallback};

/// Copies bytes from one source to every attached sink, sequentially.
///
/// Each chunk is handed to the sinks in attachment order. A sink that is not
/// ready within the poll timeout skips that chunk. A sink whose write fails
/// is closed and removed on the spot; the others carry on. Because every
/// sink is written from the same loop, one slow sink slows all of them: use
/// [`ConcurrentConnector`](crate::ConcurrentConnector) for live publishing.
///
/// Cloning a connector copies the source handle and the sink handles. The
/// clone has its own sink set, but the endpoints themselves are shared.
///
/// # Example
///
/// ```no_run
/// use broadcast_audio::{Connector, FileSink, FileSource};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), broadcast_audio::ConnectorError> {
/// let mut connector = Connector::new(Arc::new(FileSource::new("/dev/dsp")));
/// connector.attach(Arc::new(FileSink::new("dump.raw")));
///
/// connector.open().await?;
/// let bytes = connector.transfer(0, 4096, Duration::from_secs(1)).await?;
/// connector.close().await;
/// println!("moved {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connector {
    source: Arc<dyn Source>,
    sinks: SinkSet,
    event_callback: Option<EventCallback>,
}

impl Connector {
    /// Creates a connector reading from `source`, with no sinks.
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self {
            source,
            sinks: SinkSet::new(),
            event_callback: None,
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

    /// The attached sinks, in attachment order.
    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        self.sinks.as_slice()
    }

    /// Adds a sink to the end of the set.
    pub fn attach(&mut self, sink: Arc<dyn Sink>) {
        tracing::debug!(sink = sink.name(), "sink attached");
        self.sinks.push(sink);
    }

    /// Removes the first slot holding `sink`, without closing it.
    ///
    /// Returns `false` if the sink was never attached.
    pub fn detach(&mut self, sink: &Arc<dyn Sink>) -> bool {
        let removed = self.sinks.remove(sink);
        if removed {
            tracing::debug!(sink = sink.name(), "sink detached");
        }
        removed
    }

    /// Number of attached sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Whether `sink` is still attached. A sink removed after a write fault
    /// reports `false`.
    pub fn is_attached(&self, sink: &Arc<dyn Sink>) -> bool {
        self.sinks.contains(sink)
    }

    /// Opens the source, then every sink in order.
    ///
    /// If a sink fails to open, the sinks opened so far by this call and the
    /// source are closed again and the error names the failing sink.
    pub async fn open(&mut self) -> Result<(), ConnectorError> {
        open_endpoints(&*self.source, self.sinks.as_slice()).await?;
        tracing::info!(
            source = self.source.name(),
            sinks = self.sinks.len(),
            "connector opened"
        );
        Ok(())
    }

    /// Moves audio until `total_bytes` have been read (0 = until EOF).
    ///
    /// Returns the number of bytes read from the source, which is also the
    /// number offered to the sinks. The transfer ends early, without error,
    /// when the source is not readable within `timeout`, reaches EOF, or the
    /// last sink is removed. With no sinks or a zero `chunk_size` nothing is
    /// read.
    pub async fn transfer(
        &mut self,
        total_bytes: u64,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<u64, ConnectorError> {
        if self.sinks.is_empty() || chunk_size == 0 {
            return Ok(0);
        }

        tracing::debug!(total_bytes, chunk_size, "transfer started");
        let mut buf = vec![0u8; chunk_size];
        let mut bytes: u64 = 0;

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

            bytes += read as u64;
            self.distribute(&buf[..read], timeout).await;

            if self.sinks.is_empty() {
                tracing::warn!(bytes, "no sinks left, ending transfer");
                break;
            }
        }

        tracing::debug!(bytes, "transfer finished");
        Ok(bytes)
    }

    /// Writes one chunk to every ready sink, removing the ones that fail.
    async fn distribute(&mut self, data: &[u8], timeout: Duration) {
        let mut index = 0;
        while let Some(sink) = self.sinks.get(index).map(Arc::clone) {
            if !sink.can_write(timeout).await {
                tracing::trace!(sink = sink.name(), "sink not ready, skipping chunk");
                index += 1;
                continue;
            }

            match sink.write(data).await {
                Ok(written) => {
                    if written < data.len() {
                        tracing::trace!(sink = sink.name(), written, "short write");
                    }
                    index += 1;
                }
                Err(e) => {
                    tracing::warn!(sink = sink.name(), error = %e, "sink write failed, detaching");
                    emit(
                        self.event_callback.as_ref(),
                        ConnectorEvent::SinkError {
                            sink_name: sink.name().to_string(),
                            error: e.to_string(),
                        },
                    );
                    if let Err(e) = sink.close().await {
                        tracing::warn!(sink = sink.name(), error = %e, "sink close failed");
                    }
                    // The next sink shifts into `index`, so it is not skipped
                    self.sinks.remove_at(index);
                    emit(
                        self.event_callback.as_ref(),
                        ConnectorEvent::SinkDetached {
                            sink_name: sink.name().to_string(),
                            remaining: self.sinks.len(),
                        },
                    );
                }
            }
        }
    }

    /// Closes the source and every attached sink. Safe to call repeatedly.
    pub async fn close(&mut self) {
        close_endpoints(&*self.source, self.sinks.as_slice()).await;
        tracing::info!(source = self.source.name(), "connector closed");
    }

    /// Asks every attached sink to start a new output segment.
    pub async fn cut(&self) {
        for sink in self.sinks.as_slice() {
            if let Err(e) = sink.cut().await {
                tracing::warn!(sink = sink.name(), error = %e, "sink cut failed");
            }
        }
    }
}

#[async_trait]
impl FanOut for Connector {
    fn attach(&mut self, sink: Arc<dyn Sink>) {
        Connector::attach(self, sink);
    }

    fn detach(&mut self, sink: &Arc<dyn Sink>) -> bool {
        Connector::detach(self, sink)
    }

    fn sink_count(&self) -> usize {
        Connector::sink_count(self)
    }

    async fn open(&mut self) -> Result<(), ConnectorError> {
        Connector::open(self).await
    }

    async fn transfer(
        &mut self,
        total_bytes: u64,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<u64, ConnectorError> {
        Connector::transfer(self, total_bytes, chunk_size, timeout).await
    }

    async fn close(&mut self) {
        Connector::close(self).await;
    }

    async fn cut(&self) {
        Connector::cut(self).await;
    }
}
