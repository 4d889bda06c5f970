//! Error types for broadcast-audio.
//!
//! Errors are split by who owns the failure:
//! - **Endpoint errors** ([`SourceError`], [`SinkError`]): raised by a single
//!   source or sink. Sink errors during a transfer are recovered by the
//!   connector (the sink is closed and detached).
//! - **Connector errors** ([`ConnectorError`]): what a connector surfaces to
//!   the session driver. Setup faults and source read faults end up here.

use std::path::PathBuf;

/// Errors raised by a [`Source`](crate::Source) implementation.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source could not be opened.
    #[error("open failed: {reason}")]
    OpenFailed {
        /// Why the source could not be opened.
        reason: String,
    },

    /// The source was already open when `open()` was called.
    #[error("source is already open")]
    AlreadyOpen,

    /// An operation required an open source.
    #[error("source is not open")]
    NotOpen,

    /// A read or readiness poll failed.
    #[error("read failed: {reason}")]
    ReadFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),
}

impl SourceError {
    /// Creates an open failed error with the given reason.
    pub fn open_failed(reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            reason: reason.into(),
        }
    }

    /// Creates a read failed error with the given reason.
    pub fn read_failed(reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

/// Errors that can occur within a [`Sink`](crate::Sink) implementation.
///
/// A sink error returned from `write` is a hard fault for that sink: the
/// connector closes it and removes it from the active set (after any
/// configured reconnect attempts).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink could not be opened.
    #[error("open failed: {reason}")]
    OpenFailed {
        /// Why the sink could not be opened.
        reason: String,
    },

    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The sink was written to while closed.
    #[error("sink is not open")]
    NotOpen,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates an open failed error with the given reason.
    pub fn open_failed(reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            reason: reason.into(),
        }
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by a connector to its caller.
///
/// Sink write faults never appear here; they are absorbed by detaching the
/// sink. A readiness timeout on the source or running out of sinks is not an
/// error either: `transfer` returns the bytes moved so far.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The source failed to open. Nothing else was touched.
    #[error("source '{source_name}' failed to open: {source}")]
    SourceOpen {
        /// Name of the source.
        source_name: String,
        /// The underlying source error.
        #[source]
        source: SourceError,
    },

    /// A sink failed to open. Sinks opened by the same call and the source
    /// have been closed again.
    #[error("sink '{sink_name}' failed to open: {source}")]
    SinkOpen {
        /// Name of the sink that failed.
        sink_name: String,
        /// The underlying sink error.
        #[source]
        source: SinkError,
    },

    /// Reading from the source failed mid-transfer. Not retried.
    #[error("source '{source_name}' read failed after {bytes} bytes: {source}")]
    SourceRead {
        /// Name of the source.
        source_name: String,
        /// Bytes successfully read before the fault.
        bytes: u64,
        /// The underlying source error.
        #[source]
        source: SourceError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_custom() {
        let err = SinkError::custom("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_sink_error_write_failed() {
        let err = SinkError::write_failed("connection reset");
        assert_eq!(err.to_string(), "write failed: connection reset");
    }

    #[test]
    fn test_sink_error_file_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SinkError::file_error("/tmp/dump.raw", io_err);
        assert!(err.to_string().contains("/tmp/dump.raw"));
    }

    #[test]
    fn test_source_error_read_failed() {
        let err = SourceError::read_failed("device unplugged");
        assert_eq!(err.to_string(), "read failed: device unplugged");
    }

    #[test]
    fn test_connector_error_display() {
        let err = ConnectorError::SinkOpen {
            sink_name: "icecast".to_string(),
            source: SinkError::open_failed("connection refused"),
        };
        assert_eq!(
            err.to_string(),
            "sink 'icecast' failed to open: open failed: connection refused"
        );

        let err = ConnectorError::SourceRead {
            source_name: "dsp".to_string(),
            bytes: 8192,
            source: SourceError::read_failed("EIO"),
        };
        assert!(err.to_string().contains("after 8192 bytes"));
    }
}
