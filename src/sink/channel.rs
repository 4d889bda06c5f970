//! Tokio mpsc channel sink implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::sink::Sink;
use crate::{AudioChunk, SinkError};

/// A sink that forwards every write as an [`AudioChunk`] to a tokio mpsc channel.
///
/// This is the way to tap the broadcast stream in-process (level meters,
/// transcription, tests). A dropped receiver is a hard fault.
///
/// `can_write` waits for a free slot in the channel and holds on to it, so
/// the `write` that follows never blocks.
///
/// # Example
///
/// ```
/// use broadcast_audio::{AudioChunk, ChannelSink};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<AudioChunk>(100);
/// let sink = ChannelSink::new(tx);
///
/// // Attach the sink to a connector...
/// // Then receive chunks:
/// // while let Some(chunk) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<AudioChunk>,
    /// Slot reserved by the last successful `can_write`.
    permit: Mutex<Option<mpsc::OwnedPermit<AudioChunk>>>,
    open: AtomicBool,
    offset: AtomicU64,
    sequence: AtomicU64,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    ///
    /// A full channel makes the sink report not ready, so a slow receiver
    /// misses chunks instead of stalling the connector.
    pub fn new(sender: mpsc::Sender<AudioChunk>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<AudioChunk>) -> Self {
        Self {
            name: name.into(),
            sender,
            permit: Mutex::new(None),
            open: AtomicBool::new(false),
            offset: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), SinkError> {
        if self.sender.is_closed() {
            return Err(SinkError::ChannelClosed);
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn can_write(&self, timeout: Duration) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.permit.lock().is_some() {
            return true;
        }

        match tokio::time::timeout(timeout, self.sender.clone().reserve_owned()).await {
            Ok(Ok(permit)) => {
                *self.permit.lock() = Some(permit);
                true
            }
            // Let the write report the closed channel
            Ok(Err(_)) => true,
            Err(_) => {
                tracing::trace!(sink = %self.name, "channel full");
                false
            }
        }
    }

    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        if !self.is_open() {
            return Err(SinkError::NotOpen);
        }

        let offset = self.offset.fetch_add(data.len() as u64, Ordering::SeqCst);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let chunk = AudioChunk::from_slice(data, offset, sequence);

        let permit = self.permit.lock().take();
        match permit {
            Some(permit) if !self.sender.is_closed() => {
                permit.send(chunk);
            }
            Some(_) => return Err(SinkError::ChannelClosed),
            None => self
                .sender
                .send(chunk)
                .await
                .map_err(|_| SinkError::ChannelClosed)?,
        }
        Ok(data.len())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.open.store(false, Ordering::SeqCst);
        self.permit.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_sends_chunks() {
        let (tx, mut rx) = mpsc::channel::<AudioChunk>(10);
        let sink = ChannelSink::new(tx);
        sink.open().await.unwrap();

        sink.write(&[1, 2, 3]).await.unwrap();
        sink.write(&[4, 5]).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.as_bytes(), &[1, 2, 3]);
        assert_eq!(first.offset, 0);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.offset, 3);
        assert_eq!(second.sequence, 1);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel::<AudioChunk>(10);
        let sink = ChannelSink::new(tx);
        sink.open().await.unwrap();

        // Drop the receiver
        drop(rx);

        let result = sink.write(&[1, 2, 3]).await;
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
        assert!(matches!(sink.open().await, Err(SinkError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_channel_sink_write_before_open() {
        let (tx, _rx) = mpsc::channel::<AudioChunk>(10);
        let sink = ChannelSink::new(tx);
        assert!(matches!(sink.write(&[1]).await, Err(SinkError::NotOpen)));
    }

    #[tokio::test]
    async fn test_channel_sink_full_channel_is_not_ready() {
        let (tx, mut rx) = mpsc::channel::<AudioChunk>(1);
        let sink = ChannelSink::new(tx);
        sink.open().await.unwrap();

        assert!(sink.can_write(Duration::from_millis(10)).await);
        sink.write(&[1]).await.unwrap();
        assert!(!sink.can_write(Duration::from_millis(10)).await);

        rx.recv().await.unwrap();
        assert!(sink.can_write(Duration::from_millis(10)).await);
        sink.write(&[2]).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().as_bytes(), &[2]);
    }

    #[tokio::test]
    async fn test_channel_sink_undrained_receiver_does_not_stall_connector() {
        use std::sync::Arc;

        use crate::source::MockSource;
        use crate::Connector;

        let (tx, _rx) = mpsc::channel::<AudioChunk>(1);
        let mut connector = Connector::new(Arc::new(MockSource::from_bytes("src", &[0u8; 1024], 256)));
        connector.attach(Arc::new(ChannelSink::new(tx)));
        connector.open().await.unwrap();

        let bytes = tokio::time::timeout(
            Duration::from_secs(2),
            connector.transfer(0, 256, Duration::from_millis(50)),
        )
        .await
        .expect("transfer stalled on a full channel")
        .unwrap();

        assert_eq!(bytes, 1024);
        assert_eq!(connector.sink_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel::<AudioChunk>(10);
        let sink = ChannelSink::with_name("meter", tx);
        assert_eq!(sink.name(), "meter");
    }
}
