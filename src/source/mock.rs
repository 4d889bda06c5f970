//! Mock audio source for testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::format::i16_to_le_bytes;
use crate::source::Source;
use crate::{AudioFormat, SourceError};

/// One scripted step of a [`MockSource`].
#[derive(Debug, Clone)]
enum Step {
    /// Bytes handed out by the next read(s).
    Data(Vec<u8>),
    /// The next readiness poll reports "not ready".
    Timeout,
    /// The next read fails.
    Fault(String),
}

/// A scripted audio source that replays queued bytes, timeouts and faults.
///
/// Each queued block of data is returned by exactly one `read` if it fits the
/// caller's buffer; larger blocks are split across reads. Once the script is
/// exhausted the source reports end of stream. Timeouts are reported
/// immediately rather than waiting out the poll timeout.
///
/// # Example
///
/// ```
/// use broadcast_audio::source::MockSource;
///
/// let mock = MockSource::new("mock")
///     .with_data(vec![1u8; 4096])
///     .with_data(vec![2u8; 1808])
///     .with_timeout();
///
/// assert_eq!(mock.remaining_bytes(), 5904);
/// ```
pub struct MockSource {
    name: String,
    format: AudioFormat,
    steps: Mutex<VecDeque<Step>>,
    endless_chunk: Option<usize>,
    read_interval: Duration,
    open: AtomicBool,
    fail_open: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl MockSource {
    /// Creates an empty mock source (reads EOF immediately).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: AudioFormat::default(),
            steps: Mutex::new(VecDeque::new()),
            endless_chunk: None,
            read_interval: Duration::ZERO,
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Creates a source that yields `data` split into reads of `read_size`.
    pub fn from_bytes(name: impl Into<String>, data: &[u8], read_size: usize) -> Self {
        let source = Self::new(name);
        for block in data.chunks(read_size.max(1)) {
            source.push_data(block.to_vec());
        }
        source
    }

    /// Creates a source that never reaches EOF, producing `chunk_size`
    /// bytes per read.
    pub fn endless(name: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            endless_chunk: Some(chunk_size.max(1)),
            ..Self::new(name)
        }
    }

    /// Sets the PCM format used by the signal generators.
    #[must_use]
    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    /// Paces the source: every readiness poll first waits `interval`,
    /// emulating a device that delivers audio in real time.
    #[must_use]
    pub fn with_read_interval(mut self, interval: Duration) -> Self {
        self.read_interval = interval;
        self
    }

    /// Queues a block of bytes.
    #[must_use]
    pub fn with_data(self, data: Vec<u8>) -> Self {
        self.push_data(data);
        self
    }

    /// Queues a readiness timeout.
    #[must_use]
    pub fn with_timeout(self) -> Self {
        self.steps.lock().push_back(Step::Timeout);
        self
    }

    /// Queues a read fault.
    #[must_use]
    pub fn with_fault(self, reason: impl Into<String>) -> Self {
        self.steps.lock().push_back(Step::Fault(reason.into()));
        self
    }

    /// Queues a block of bytes on a shared source.
    pub fn push_data(&self, data: Vec<u8>) {
        self.steps.lock().push_back(Step::Data(data));
    }

    /// Makes subsequent `open()` calls fail (or succeed again).
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Queues `duration_ms` of 16-bit silence in the configured format.
    pub fn generate_silence(&self, duration_ms: u64) {
        let samples = vec![0i16; self.samples_for_duration(duration_ms)];
        self.push_data(i16_to_le_bytes(&samples));
    }

    /// Queues `duration_ms` of a 16-bit sine tone in the configured format.
    pub fn generate_sine(&self, frequency: f64, duration_ms: u64) {
        let channels = usize::from(self.format.channels.max(1));
        let frames = self.samples_for_duration(duration_ms) / channels;
        let sample_rate = f64::from(self.format.sample_rate);

        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = (value * 32767.0) as i16;
            // Write same sample to all channels
            samples.extend(std::iter::repeat(sample).take(channels));
        }
        self.push_data(i16_to_le_bytes(&samples));
    }

    /// Bytes still queued (excluding endless mode).
    pub fn remaining_bytes(&self) -> usize {
        self.steps
            .lock()
            .iter()
            .map(|step| match step {
                Step::Data(data) => data.len(),
                _ => 0,
            })
            .sum()
    }

    /// How many times `open()` succeeded.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many times `close()` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        let frames = (u64::from(self.format.sample_rate) * duration_ms / 1000) as usize;
        frames * usize::from(self.format.channels)
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), SourceError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SourceError::open_failed("scripted open failure"));
        }
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(SourceError::AlreadyOpen);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn can_read(&self, _timeout: Duration) -> Result<bool, SourceError> {
        if !self.is_open() {
            return Ok(false);
        }
        if !self.read_interval.is_zero() {
            tokio::time::sleep(self.read_interval).await;
        }

        let mut steps = self.steps.lock();
        if matches!(steps.front(), Some(Step::Timeout)) {
            steps.pop_front();
            return Ok(false);
        }
        Ok(true)
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if !self.is_open() {
            return Err(SourceError::NotOpen);
        }

        let mut steps = self.steps.lock();
        // A timeout step only matters to `can_read`
        while matches!(steps.front(), Some(Step::Timeout)) {
            steps.pop_front();
        }
        match steps.pop_front() {
            Some(Step::Data(mut data)) => {
                if data.len() > buf.len() {
                    let rest = data.split_off(buf.len());
                    steps.push_front(Step::Data(rest));
                }
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(Step::Fault(reason)) => Err(SourceError::read_failed(reason)),
            Some(Step::Timeout) | None => match self.endless_chunk {
                Some(size) => {
                    let n = size.min(buf.len());
                    buf[..n].fill(0x55);
                    Ok(n)
                }
                None => Ok(0),
            },
        }
    }
}
