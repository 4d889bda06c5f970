//! Configuration types for connectors and sessions.

use std::time::Duration;

/// Raw PCM layout produced by a source.
///
/// Used to turn wall-clock durations into byte counts: the session length
/// into a transfer bound, and the buffering horizon into a queue size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample (8, 16, 24, 32).
    pub bits_per_sample: u16,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bits_per_sample: 16,
            channels: 2,
        }
    }
}

impl AudioFormat {
    /// Creates a format description.
    #[must_use]
    pub fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// Bytes per second of audio in this format.
    #[must_use]
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate)
            * (u64::from(self.bits_per_sample) / 8)
            * u64::from(self.channels)
    }

    /// Number of bytes covering `duration` of audio.
    #[must_use]
    pub fn bytes_for(&self, duration: Duration) -> u64 {
        let whole = self.byte_rate() * duration.as_secs();
        let frac = self.byte_rate() * u64::from(duration.subsec_micros()) / 1_000_000;
        whole + frac
    }
}

/// How a concurrent connector handles a sink whose write failed.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Whether faulted sinks get reopen attempts before being detached.
    ///
    /// Default: true
    pub enabled: bool,

    /// Number of close/open attempts before the sink is detached.
    ///
    /// Default: 3
    pub attempts: u32,

    /// Delay before the first reopen attempt.
    ///
    /// Doubles after every failed attempt.
    /// Default: 100ms
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl ReconnectPolicy {
    /// A policy that detaches a sink on its first fault.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Number of reopen attempts this policy allows.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.attempts
        } else {
            0
        }
    }
}

/// Configuration for the [`ConcurrentConnector`](crate::ConcurrentConnector).
///
/// # Example
///
/// ```
/// use broadcast_audio::{AudioFormat, ConcurrentConfig};
/// use std::time::Duration;
///
/// // 10 seconds of CD audio, moved in 4 KiB chunks
/// let config = ConcurrentConfig::for_format(
///     AudioFormat::default(),
///     Duration::from_secs(10),
///     4096,
/// );
/// assert_eq!(config.queue_capacity, 431);
/// ```
#[derive(Debug, Clone)]
pub struct ConcurrentConfig {
    /// Capacity of each sink's queue, in chunks.
    ///
    /// Default: 256
    pub queue_capacity: usize,

    /// How long the reader waits on a full queue before the sink is
    /// considered failed and detached.
    ///
    /// Default: 10 seconds
    pub push_timeout: Duration,

    /// How long `close()` waits for each writer to drain its queue before
    /// aborting it.
    ///
    /// Default: 5 seconds
    pub drain_timeout: Duration,

    /// What happens when a sink write fails.
    pub reconnect: ReconnectPolicy,
}

impl Default for ConcurrentConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            push_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConcurrentConfig {
    /// Sizes the queues to hold `buffer` worth of audio in `format`, split
    /// into chunks of `chunk_size` bytes.
    ///
    /// The push timeout is set to the same horizon, so a sink may lag behind
    /// by at most `buffer` before it is dropped.
    #[must_use]
    pub fn for_format(format: AudioFormat, buffer: Duration, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1) as u64;
        let capacity = format.bytes_for(buffer).div_ceil(chunk_size).max(1);

        Self {
            queue_capacity: capacity as usize,
            push_timeout: buffer,
            ..Self::default()
        }
    }

    /// Sets the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
