//! Fan-out engines.
//!
//! Both connectors move bytes from one [`Source`] to a set of [`Sink`]s:
//!
//! ```text
//! Source → Connector → Sink, Sink, Sink   (one loop, sinks written in turn)
//!
//! Source → reader ─┬─ queue → writer task → Sink
//!                  ├─ queue → writer task → Sink
//!                  └─ queue → writer task → Sink
//! ```
//!
//! - **[`Connector`]**: Reference engine; a slow sink stalls everyone
//! - **[`ConcurrentConnector`]**: One writer task and bounded queue per sink,
//!   so a slow sink only ever stalls itself
//!
//! Both implement [`FanOut`], which is what a [`Session`](crate::Session)
//! drives.

mod concurrent;
mod connector;
mod sink_set;
mod writer;

pub use concurrent::ConcurrentConnector;
pub use connector::Connector;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::sink::Sink;
use crate::source::Source;
use crate::{ConnectorError, SourceError};

/// Common surface of the fan-out engines.
#[async_trait]
pub trait FanOut: Send + Sync {
    /// Adds a sink to the end of the set. Attaching the same handle twice
    /// creates two slots.
    fn attach(&mut self, sink: Arc<dyn Sink>);

    /// Removes the first slot holding `sink`. Does not close it.
    fn detach(&mut self, sink: &Arc<dyn Sink>) -> bool;

    /// Number of sinks currently attached.
    fn sink_count(&self) -> usize;

    /// Opens the source and every attached sink, all or nothing.
    async fn open(&mut self) -> Result<(), ConnectorError>;

    /// Moves up to `total_bytes` (0 = until EOF) from the source to the sinks
    /// in reads of at most `chunk_size` bytes. Returns the bytes read.
    async fn transfer(
        &mut self,
        total_bytes: u64,
        chunk_size: usize,
        timeout: Duration,
    ) -> Result<u64, ConnectorError>;

    /// Closes the source and every attached sink.
    async fn close(&mut self);

    /// Asks every attached sink to start a new output segment.
    async fn cut(&self);
}

/// Opens the source, then each sink in order. Endpoints that are already
/// open are left as they are.
///
/// On a sink failure, the sinks opened by this call are closed again (in
/// reverse order) and so is the source. Sinks that were already open stay
/// open.
pub(crate) async fn open_endpoints(
    source: &dyn Source,
    sinks: &[Arc<dyn Sink>],
) -> Result<(), ConnectorError> {
    if source.is_open() {
        tracing::debug!(source = source.name(), "source already open");
    } else {
        source
            .open()
            .await
            .map_err(|e| ConnectorError::SourceOpen {
                source_name: source.name().to_string(),
                source: e,
            })?;
        tracing::debug!(source = source.name(), "source opened");
    }

    let mut opened: Vec<&Arc<dyn Sink>> = Vec::with_capacity(sinks.len());
    for sink in sinks {
        if sink.is_open() {
            continue;
        }
        match sink.open().await {
            Ok(()) => {
                tracing::debug!(sink = sink.name(), "sink opened");
                opened.push(sink);
            }
            Err(e) => {
                tracing::error!(sink = sink.name(), error = %e, "sink failed to open, rolling back");
                for sink in opened.into_iter().rev() {
                    if let Err(e) = sink.close().await {
                        tracing::warn!(sink = sink.name(), error = %e, "rollback close failed");
                    }
                }
                if let Err(e) = source.close().await {
                    tracing::warn!(source = source.name(), error = %e, "rollback close failed");
                }
                return Err(ConnectorError::SinkOpen {
                    sink_name: sink.name().to_string(),
                    source: e,
                });
            }
        }
    }

    Ok(())
}

/// Closes the source, then every sink. Close failures are logged only.
pub(crate) async fn close_endpoints(source: &dyn Source, sinks: &[Arc<dyn Sink>]) {
    if let Err(e) = source.close().await {
        tracing::warn!(source = source.name(), error = %e, "source close failed");
    }
    for sink in sinks {
        if let Err(e) = sink.close().await {
            tracing::warn!(sink = sink.name(), error = %e, "sink close failed");
        }
    }
}

/// Reads from the source into `buf`, waiting up to `timeout` for readiness.
///
/// `Ok(None)` means the source was not readable in time.
pub(crate) async fn read_chunk(
    source: &dyn Source,
    buf: &mut [u8],
    timeout: Duration,
    bytes: u64,
) -> Result<Option<usize>, ConnectorError> {
    let read_fault = |e: SourceError| ConnectorError::SourceRead {
        source_name: source.name().to_string(),
        bytes,
        source: e,
    };

    if !source.can_read(timeout).await.map_err(read_fault)? {
        return Ok(None);
    }
    source.read(buf).await.map(Some).map_err(read_fault)
}

/// Size of the next read: `chunk_size`, capped so a bounded transfer never
/// reads past `total_bytes`.
pub(crate) fn next_read_len(chunk_size: usize, total_bytes: u64, bytes: u64) -> usize {
    if total_bytes == 0 {
        return chunk_size;
    }
    let remaining = total_bytes.saturating_sub(bytes);
    usize::try_from(remaining).map_or(chunk_size, |remaining| remaining.min(chunk_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockSource;
    use crate::test_support::{as_sink, RecordingSink};

    #[test]
    fn test_next_read_len() {
        assert_eq!(next_read_len(4096, 0, 1_000_000), 4096);
        assert_eq!(next_read_len(4096, 10_000, 0), 4096);
        assert_eq!(next_read_len(4096, 10_000, 8192), 1808);
        assert_eq!(next_read_len(4096, 10_000, 10_000), 0);
    }

    #[tokio::test]
    async fn test_open_endpoints_rolls_back_on_sink_failure() {
        let source = MockSource::new("src");
        let first = RecordingSink::new("first").into_arc();
        let broken = RecordingSink::new("broken").refusing_open().into_arc();
        let third = RecordingSink::new("third").into_arc();
        let sinks = vec![as_sink(&first), as_sink(&broken), as_sink(&third)];

        let err = open_endpoints(&source, &sinks).await.unwrap_err();

        assert!(matches!(err, ConnectorError::SinkOpen { ref sink_name, .. } if sink_name == "broken"));
        assert!(!source.is_open());
        assert!(!first.is_open());
        assert_eq!(first.closes(), 1);
        assert_eq!(third.opens(), 0);
    }

    #[tokio::test]
    async fn test_open_endpoints_keeps_previously_open_sinks() {
        let source = MockSource::new("src");
        let already = RecordingSink::new("already").into_arc();
        already.open().await.unwrap();
        let broken = RecordingSink::new("broken").refusing_open().into_arc();
        let sinks = vec![as_sink(&already), as_sink(&broken)];

        assert!(open_endpoints(&source, &sinks).await.is_err());
        assert!(already.is_open());
        assert_eq!(already.closes(), 0);
    }

    #[tokio::test]
    async fn test_open_endpoints_reuses_open_source() {
        let source = MockSource::new("src");
        source.open().await.unwrap();
        let sink = RecordingSink::new("sink").into_arc();

        open_endpoints(&source, &[as_sink(&sink)]).await.unwrap();
        // A second open with nothing closed in between is a no-op
        open_endpoints(&source, &[as_sink(&sink)]).await.unwrap();

        assert!(source.is_open());
        assert_eq!(source.open_count(), 1);
        assert_eq!(sink.opens(), 1);
    }

    #[tokio::test]
    async fn test_open_endpoints_source_failure_touches_no_sink() {
        let source = MockSource::new("src");
        source.set_fail_open(true);
        let sink = RecordingSink::new("sink").into_arc();

        let err = open_endpoints(&source, &[as_sink(&sink)]).await.unwrap_err();

        assert!(matches!(err, ConnectorError::SourceOpen { .. }));
        assert_eq!(sink.opens(), 0);
    }
}
