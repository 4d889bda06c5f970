//! Broadcast session driver.

use std::time::{Duration, Instant};

use crate::pipeline::FanOut;
use crate::{AudioFormat, ConnectorError};

/// Parameters of one broadcast session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to broadcast. Zero runs until the source ends.
    ///
    /// Default: zero (unbounded)
    pub duration: Duration,

    /// Largest single read from the source, in bytes.
    ///
    /// Default: 4096
    pub chunk_size: usize,

    /// How long to wait for the source (and each sink) to become ready.
    /// A source that stays silent this long ends the session.
    ///
    /// Default: 1 second
    pub poll_timeout: Duration,

    /// PCM layout of the source, used to turn `duration` into bytes.
    pub format: AudioFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            chunk_size: 4096,
            poll_timeout: Duration::from_secs(1),
            format: AudioFormat::default(),
        }
    }
}

impl SessionConfig {
    /// A session of `duration` in `format`, with default chunking.
    #[must_use]
    pub fn timed(format: AudioFormat, duration: Duration) -> Self {
        Self {
            duration,
            format,
            ..Self::default()
        }
    }

    /// Bytes the session should move; zero means unbounded.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.format.bytes_for(self.duration)
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes read from the source and handed to the sinks.
    pub bytes_transferred: u64,
    /// Sinks still attached when the session ended.
    pub sinks_remaining: usize,
    /// Wall-clock time from open to close.
    pub elapsed: Duration,
}

/// Drives one open/transfer/close cycle on a connector.
///
/// A session whose every sink was dropped still counts as finished: the
/// stats report zero remaining sinks and the caller decides whether that is
/// fatal.
///
/// # Example
///
/// ```no_run
/// use broadcast_audio::{AudioFormat, Connector, FileSink, FileSource, Session, SessionConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), broadcast_audio::ConnectorError> {
/// let mut connector = Connector::new(Arc::new(FileSource::new("/dev/dsp")));
/// connector.attach(Arc::new(FileSink::new("show.raw")));
///
/// let session = Session::new(SessionConfig::timed(
///     AudioFormat::default(),
///     Duration::from_secs(3600),
/// ));
/// let stats = session.run(&mut connector).await?;
/// println!("{} bytes, {} sinks left", stats.bytes_transferred, stats.sinks_remaining);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Session {
    config: SessionConfig,
}

impl Session {
    /// Creates a session driver.
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// The session parameters.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens the connector, runs the transfer, and closes the connector.
    ///
    /// The connector is closed even when the transfer ends with a source
    /// read fault; that fault is then returned. Open failures are returned
    /// as is, with nothing left open.
    pub async fn run<C>(&self, connector: &mut C) -> Result<SessionStats, ConnectorError>
    where
        C: FanOut + ?Sized,
    {
        let total_bytes = self.config.total_bytes();
        tracing::info!(
            total_bytes,
            chunk_size = self.config.chunk_size,
            sinks = connector.sink_count(),
            "session starting"
        );

        let started = Instant::now();
        connector.open().await?;
        let result = connector
            .transfer(total_bytes, self.config.chunk_size, self.config.poll_timeout)
            .await;
        connector.close().await;

        let bytes_transferred = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "session aborted");
                return Err(e);
            }
        };

        let stats = SessionStats {
            bytes_transferred,
            sinks_remaining: connector.sink_count(),
            elapsed: started.elapsed(),
        };
        tracing::info!(
            bytes = stats.bytes_transferred,
            sinks_remaining = stats.sinks_remaining,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "session finished"
        );
        if stats.sinks_remaining == 0 {
            tracing::warn!("session ended with no sinks attached");
        }
        Ok(stats)
    }
}
