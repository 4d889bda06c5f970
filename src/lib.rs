//! # broadcast-audio
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Live audio fan-out: one capture source published to many destinations.
//!
//! `broadcast-audio` pulls raw PCM from a single [`Source`] (a capture device,
//! a file or FIFO) and hands every byte to any number of [`Sink`]s (encoders,
//! streaming-server publishers, local archives). A destination that fails is
//! closed and dropped from the session; capture and every other destination
//! keep going.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use broadcast_audio::{
//!     AudioFormat, ConcurrentConfig, ConcurrentConnector, DeviceConfig, DeviceSource, FileSink,
//!     Session, SessionConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // CD-quality stereo, the default input format of most devices
//! let format = AudioFormat::default();
//! let source = Arc::new(DeviceSource::new(DeviceConfig::default()));
//!
//! let config = ConcurrentConfig::for_format(format, Duration::from_secs(10), 4096);
//! let mut connector = ConcurrentConnector::new(source, config)
//!     .with_event_callback(broadcast_audio::event_callback(|e| {
//!         tracing::warn!(?e, "connector event");
//!     }));
//! connector.attach(Arc::new(FileSink::new("archive.raw").with_date_stamp(true)));
//!
//! let session = Session::new(SessionConfig::timed(format, Duration::from_secs(3600)));
//! let stats = session.run(&mut connector).await?;
//! println!("{} bytes, {} sinks left", stats.bytes_transferred, stats.sinks_remaining);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Two engines implement [`FanOut`]:
//!
//! - **[`Connector`]**: Reads a chunk, writes it to each sink in turn. Simple
//!   and deterministic, but one slow sink holds up the whole session
//! - **[`ConcurrentConnector`]**: A reader task feeds one bounded queue per
//!   sink; one writer task per sink drains it. A sink that falls further
//!   behind than the queue allows is dropped, a sink whose write fails is
//!   reconnected per its [`ReconnectPolicy`]
//!
//! The device source keeps the CPAL callback off the async runtime: the
//! callback only pushes into a lock-free ring buffer that the reader drains.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod chunk;
mod config;
mod error;
mod event;
pub mod format;
mod pipeline;
mod session;
mod sink;
pub mod source;
#[cfg(test)]
mod test_support;

pub use chunk::AudioChunk;
pub use config::{AudioFormat, ConcurrentConfig, ReconnectPolicy};
pub use error::{ConnectorError, SinkError, SourceError};
pub use event::{event_callback, ConnectorEvent, EventCallback};
pub use pipeline::{ConcurrentConnector, Connector, FanOut};
pub use session::{Session, SessionConfig, SessionStats};
pub use sink::{ChannelSink, FileSink, Sink};
pub use source::{
    default_input_device_name, list_input_devices, DeviceConfig, DeviceSource, FileSource,
    MockSource, Source,
};
