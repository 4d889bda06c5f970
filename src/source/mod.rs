//! Source trait and implementations for audio producers.
//!
//! A [`Source`] is the single producer of raw audio bytes for a session. The
//! crate provides:
//!
//! - [`DeviceSource`]: Captures from an input device via CPAL
//! - [`FileSource`]: Reads raw audio from a file or FIFO
//! - [`MockSource`]: Scripted in-memory source for tests

mod device;
mod file;
mod mock;

pub use device::{default_input_device_name, list_input_devices, DeviceConfig, DeviceSource};
pub use file::FileSource;
pub use mock::MockSource;

use std::time::Duration;

use async_trait::async_trait;

use crate::SourceError;

/// A producer of raw audio bytes.
///
/// A connector reads from its source exclusively: only one task ever polls
/// or reads a given source during a transfer.
///
/// # Implementation Notes
///
/// - Methods take `&self` - use interior mutability (`Mutex`, atomics) if needed
/// - `can_read` must wait no longer than `timeout`
/// - `read` returning `Ok(0)` signals end of stream
/// - After `can_read` returned `true`, `read` should not block further
///
/// # Example
///
/// ```
/// use broadcast_audio::{Source, SourceError};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::time::Duration;
///
/// /// Endless digital silence.
/// struct Silence {
///     open: AtomicBool,
/// }
///
/// #[async_trait]
/// impl Source for Silence {
///     fn name(&self) -> &str {
///         "silence"
///     }
///
///     fn is_open(&self) -> bool {
///         self.open.load(Ordering::SeqCst)
///     }
///
///     async fn open(&self) -> Result<(), SourceError> {
///         self.open.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn close(&self) -> Result<(), SourceError> {
///         self.open.store(false, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn can_read(&self, _timeout: Duration) -> Result<bool, SourceError> {
///         Ok(self.is_open())
///     }
///
///     async fn read(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
///         buf.fill(0);
///         Ok(buf.len())
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Returns `true` while the source is open.
    fn is_open(&self) -> bool;

    /// Opens the source.
    async fn open(&self) -> Result<(), SourceError>;

    /// Closes the source. Closing a closed source is not an error.
    async fn close(&self) -> Result<(), SourceError>;

    /// Waits up to `timeout` for data to become readable.
    ///
    /// Returns `Ok(false)` if nothing became readable in time. An error means
    /// the source itself is broken.
    async fn can_read(&self, timeout: Duration) -> Result<bool, SourceError>;

    /// Reads up to `buf.len()` bytes. `Ok(0)` is end of stream.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, SourceError>;
}
