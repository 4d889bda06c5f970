//! Runtime events for monitoring a broadcast session.
//!
//! Events are non-fatal notifications about connector behavior. The transfer
//! continues after an event is emitted; they're for logging/metrics, not
//! error handling.

use std::sync::Arc;

/// Runtime events emitted by a connector.
///
/// # Example
///
/// ```
/// use broadcast_audio::ConnectorEvent;
///
/// fn handle_event(event: ConnectorEvent) {
///     match event {
///         ConnectorEvent::SinkError { sink_name, error } => {
///             eprintln!("sink '{}' error: {}", sink_name, error);
///         }
///         ConnectorEvent::SinkDetached { sink_name, remaining } => {
///             eprintln!("sink '{}' removed, {} remaining", sink_name, remaining);
///         }
///         ConnectorEvent::SinkReconnected { sink_name, attempt } => {
///             eprintln!("sink '{}' reconnected on attempt {}", sink_name, attempt);
///         }
///         ConnectorEvent::QueueOverflow { sink_name } => {
///             eprintln!("sink '{}' could not keep up", sink_name);
///         }
///         ConnectorEvent::SourceTimeout { bytes } => {
///             eprintln!("source not readable, stopping after {} bytes", bytes);
///         }
///         ConnectorEvent::EndOfStream { bytes } => {
///             eprintln!("source reached EOF after {} bytes", bytes);
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// A sink failed a write or a reconnect attempt.
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
    },

    /// A sink was closed and permanently removed from the active set.
    SinkDetached {
        /// Name of the detached sink.
        sink_name: String,
        /// Number of sinks still attached.
        remaining: usize,
    },

    /// A faulted sink was successfully reopened and resumes with the next chunk.
    SinkReconnected {
        /// Name of the sink.
        sink_name: String,
        /// Which attempt succeeded (1-based).
        attempt: u32,
    },

    /// A sink's queue stayed full for the whole buffering horizon.
    ///
    /// The sink is detached right after this event.
    QueueOverflow {
        /// Name of the sink that fell behind.
        sink_name: String,
    },

    /// The source was not readable within the poll timeout; the transfer ends.
    SourceTimeout {
        /// Bytes read before the timeout.
        bytes: u64,
    },

    /// The source returned EOF; the transfer ends normally.
    EndOfStream {
        /// Bytes read before EOF.
        bytes: u64,
    },
}

/// Callback type for receiving runtime events.
pub type EventCallback = Arc<dyn Fn(ConnectorEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use broadcast_audio::{event_callback, ConnectorEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(ConnectorEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Sends an event to the callback if one is configured.
pub(crate) fn emit(callback: Option<&EventCallback>, event: ConnectorEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}
