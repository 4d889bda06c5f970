//! Per-sink writer task of the concurrent connector.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::concurrent::Shared;
use crate::event::emit;
use crate::sink::Sink;
use crate::{AudioChunk, ConnectorEvent, EventCallback, ReconnectPolicy};

/// A chunk waiting in a sink's queue.
pub(super) struct Pending {
    pub chunk: AudioChunk,
    /// How long the writer may wait for the sink to become writable.
    pub timeout: Duration,
}

/// Out-of-band commands for a writer.
pub(super) enum Control {
    /// Start a new output segment before the next write.
    Cut,
}

/// Drains one sink's queue into the sink.
///
/// The writer is the only task that calls into its sink while the session
/// runs, so sink methods never overlap. A sink attached more than once still
/// has a single writer, which writes every chunk once per slot. On a write
/// fault it applies the
/// reconnect policy; once the policy is exhausted it closes the sink,
/// removes it from the shared set and exits.
pub(super) struct SinkWriter {
    lane: u64,
    sink: Arc<dyn Sink>,
    shared: Arc<Shared>,
    policy: ReconnectPolicy,
    event_callback: Option<EventCallback>,
    /// Reopen attempts used since the last successful write.
    failures: u32,
}

impl SinkWriter {
    pub fn new(
        lane: u64,
        sink: Arc<dyn Sink>,
        shared: Arc<Shared>,
        policy: ReconnectPolicy,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            lane,
            sink,
            shared,
            policy,
            event_callback,
            failures: 0,
        }
    }

    /// Runs until the queue is closed and empty, or the sink is detached.
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<Pending>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        tracing::debug!(sink = self.sink.name(), "writer started");

        loop {
            tokio::select! {
                biased;

                Some(command) = control.recv() => match command {
                    Control::Cut => self.cut().await,
                },
                pending = chunks.recv() => match pending {
                    Some(pending) => {
                        if !self.deliver(pending).await {
                            return;
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(sink = self.sink.name(), "writer drained");
    }

    /// Writes one chunk for each slot the sink holds. Returns `false` once
    /// the sink has been detached.
    async fn deliver(&mut self, pending: Pending) -> bool {
        // A detached sink drains what was queued before the detach
        let copies = self.shared.sinks.lock().count(&self.sink).max(1);

        for _ in 0..copies {
            if !self.sink.can_write(pending.timeout).await {
                tracing::trace!(sink = self.sink.name(), sequence = pending.chunk.sequence, "sink not ready, skipping chunk");
                continue;
            }

            if let Err(e) = self.sink.write(pending.chunk.as_bytes()).await {
                tracing::warn!(sink = self.sink.name(), error = %e, "sink write failed");
                self.emit(ConnectorEvent::SinkError {
                    sink_name: self.sink.name().to_string(),
                    error: e.to_string(),
                });
                return self.reconnect().await;
            }
            self.failures = 0;
        }
        true
    }

    /// Closes and reopens the sink with exponential backoff.
    ///
    /// The chunk that failed is not retried; a reconnected sink resumes with
    /// the next one.
    async fn reconnect(&mut self) -> bool {
        while self.failures < self.policy.max_attempts() {
            self.failures += 1;
            let attempt = self.failures;

            if let Err(e) = self.sink.close().await {
                tracing::debug!(sink = self.sink.name(), error = %e, "close before reconnect failed");
            }
            tokio::time::sleep(self.backoff(attempt)).await;

            match self.sink.open().await {
                Ok(()) => {
                    tracing::info!(sink = self.sink.name(), attempt, "sink reconnected");
                    self.emit(ConnectorEvent::SinkReconnected {
                        sink_name: self.sink.name().to_string(),
                        attempt,
                    });
                    return true;
                }
                Err(e) => {
                    tracing::warn!(sink = self.sink.name(), attempt, error = %e, "reconnect failed");
                    self.emit(ConnectorEvent::SinkError {
                        sink_name: self.sink.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.detach().await;
        false
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.policy
            .delay
            .saturating_mul(1 << attempt.saturating_sub(1).min(16))
    }

    /// Removes every slot of the sink from the shared set and closes it.
    ///
    /// Whoever removes the sink from the set owns closing it, so a
    /// concurrent overflow detach on the reader side does not close twice.
    /// The sink leaves the set before the lane goes.
    async fn detach(&self) {
        let remaining = {
            let mut sinks = self.shared.sinks.lock();
            (sinks.remove_all(&self.sink) > 0).then(|| sinks.len())
        };
        self.shared.lanes.lock().retain(|lane| lane.id != self.lane);

        let Some(remaining) = remaining else {
            return;
        };
        if let Err(e) = self.sink.close().await {
            tracing::warn!(sink = self.sink.name(), error = %e, "sink close failed");
        }
        tracing::warn!(sink = self.sink.name(), remaining, "sink detached");
        self.emit(ConnectorEvent::SinkDetached {
            sink_name: self.sink.name().to_string(),
            remaining,
        });
    }

    async fn cut(&self) {
        if let Err(e) = self.sink.cut().await {
            tracing::warn!(sink = self.sink.name(), error = %e, "sink cut failed");
        }
    }

    fn emit(&self, event: ConnectorEvent) {
        emit(self.event_callback.as_ref(), event);
    }
}
