//! Sink trait and implementations for audio destinations.
//!
//! A [`Sink`] is any consumer of the byte stream: an encoder chain, a
//! streaming-server publisher, a local file. The crate provides two built-in
//! sinks:
//!
//! - [`ChannelSink`]: Sends chunks to a tokio mpsc channel
//! - [`FileSink`]: Dumps the raw stream to a local file, rotating on `cut()`
//!
//! Implement the [`Sink`] trait for encoders and network publishers.

mod channel;
mod file;

pub use channel::ChannelSink;
pub use file::FileSink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::SinkError;

/// A destination for audio data.
///
/// Connectors hold sinks as `Arc<dyn Sink>` and identify them by pointer:
/// attaching the same `Arc` twice creates two slots, and detaching removes the
/// first slot holding that exact `Arc`.
///
/// # Implementation Notes
///
/// - Methods take `&self` - use interior mutability (`Mutex`, `RwLock`) if needed
/// - `open` is called before any audio flows; connect or create files here
/// - `write` returning `Err` is a hard fault: the connector closes the sink
///   and stops using it (after any reconnect attempts)
/// - `can_write` must wait no longer than `timeout`
/// - A concurrent connector never calls two methods of one sink at once
///
/// # Example
///
/// ```
/// use broadcast_audio::{Sink, SinkError};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
///
/// struct CountingSink {
///     open: AtomicBool,
///     bytes: AtomicU64,
/// }
///
/// #[async_trait]
/// impl Sink for CountingSink {
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn is_open(&self) -> bool {
///         self.open.load(Ordering::SeqCst)
///     }
///
///     async fn open(&self) -> Result<(), SinkError> {
///         self.open.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
///         self.bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
///         Ok(data.len())
///     }
///
///     async fn close(&self) -> Result<(), SinkError> {
///         self.open.store(false, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Returns `true` while the sink is open.
    fn is_open(&self) -> bool;

    /// Opens the sink (connects, creates the output file, ...).
    async fn open(&self) -> Result<(), SinkError>;

    /// Waits up to `timeout` for the sink to accept a write without blocking.
    ///
    /// Default implementation reports ready whenever the sink is open.
    async fn can_write(&self, timeout: Duration) -> bool {
        let _ = timeout;
        self.is_open()
    }

    /// Writes a chunk of the stream, returning how many bytes were accepted.
    async fn write(&self, data: &[u8]) -> Result<usize, SinkError>;

    /// Ends the current output segment and starts a new one.
    ///
    /// Default implementation does nothing, for sinks without segments.
    async fn cut(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Closes the sink. Closing a closed sink is not an error.
    async fn close(&self) -> Result<(), SinkError>;
}

/// Identity comparison for sink handles.
///
/// Compares the data pointers only, so two `Arc<dyn Sink>` to the same
/// object are equal even if their vtable pointers differ.
pub(crate) fn same_sink(a: &Arc<dyn Sink>, b: &Arc<dyn Sink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    #[tokio::test]
    async fn test_sink_lifecycle() {
        let sink = RecordingSink::new("test");

        sink.open().await.unwrap();
        assert!(sink.can_write(Duration::ZERO).await);

        sink.write(&[1, 2, 3]).await.unwrap();
        sink.write(&[4]).await.unwrap();
        assert_eq!(sink.writes(), vec![3, 1]);

        sink.close().await.unwrap();
        assert!(!sink.can_write(Duration::ZERO).await);
    }

    #[test]
    fn test_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<dyn Sink>>();
    }

    #[test]
    fn test_same_sink_is_identity() {
        let a: Arc<dyn Sink> = Arc::new(RecordingSink::new("a"));
        let a2 = Arc::clone(&a);
        let b: Arc<dyn Sink> = Arc::new(RecordingSink::new("a"));

        assert!(same_sink(&a, &a2));
        assert!(!same_sink(&a, &b));
    }
}
