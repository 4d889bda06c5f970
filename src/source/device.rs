//! CPAL input device source.
//!
//! The CPAL callback runs on a real-time thread and must never block, so it
//! only pushes little-endian PCM bytes into a lock-free SPSC ring buffer. The
//! connector's reader drains that ring through `can_read`/`read`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each open session owns a
//! small capture thread that builds the stream, keeps it alive, and drops it
//! when told to stop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio::sync::oneshot;

use crate::format::f32_to_i16;
use crate::source::Source;
use crate::{AudioFormat, SourceError};

/// Lists all available input devices.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_input_devices() -> Result<Vec<String>, SourceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| SourceError::BackendError(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Gets the name of the default input device, if any.
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}

/// Configuration for device capture.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device to open by name; `None` uses the system default input.
    pub device_name: Option<String>,

    /// How much audio the ring buffer holds before the callback starts
    /// dropping samples.
    ///
    /// Default: 10 seconds
    pub buffer_duration: Duration,

    /// Granularity of the readiness poll while the ring is empty.
    ///
    /// Default: 5ms
    pub poll_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            buffer_duration: Duration::from_secs(10),
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// A running capture: the ring consumer plus the thread keeping the stream alive.
struct Capture {
    consumer: HeapCons<u8>,
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// A source capturing 16-bit PCM from an audio input device.
///
/// # Example
///
/// ```no_run
/// use broadcast_audio::{DeviceConfig, DeviceSource};
///
/// let source = DeviceSource::new(DeviceConfig::default());
/// // Attach to a connector, then open it...
/// ```
pub struct DeviceSource {
    name: String,
    config: DeviceConfig,
    capture: Mutex<Option<Capture>>,
    format: Mutex<Option<AudioFormat>>,
    stream_failed: Arc<AtomicBool>,
    overrun_bytes: Arc<AtomicU64>,
}

impl DeviceSource {
    /// Creates a device source. The device is opened by `open()`.
    pub fn new(config: DeviceConfig) -> Self {
        let name = match &config.device_name {
            Some(device) => format!("device:{device}"),
            None => "device:default".to_string(),
        };

        Self {
            name,
            config,
            capture: Mutex::new(None),
            format: Mutex::new(None),
            stream_failed: Arc::new(AtomicBool::new(false)),
            overrun_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The PCM format being captured, known once the device is open.
    pub fn format(&self) -> Option<AudioFormat> {
        *self.format.lock()
    }

    /// Bytes dropped by the capture callback because the ring was full.
    pub fn overrun_bytes(&self) -> u64 {
        self.overrun_bytes.load(Ordering::Relaxed)
    }

    fn find_device(name: Option<&str>) -> Result<Device, SourceError> {
        let host = cpal::default_host();
        let Some(name) = name else {
            return host
                .default_input_device()
                .ok_or_else(|| SourceError::open_failed("no default input device configured"));
        };

        let devices = host
            .input_devices()
            .map_err(|e| SourceError::BackendError(e.to_string()))?;
        for device in devices {
            if device.name().is_ok_and(|n| n == name) {
                return Ok(device);
            }
        }
        Err(SourceError::open_failed(format!("device not found: {name}")))
    }

    /// Builds and starts the CPAL stream. Runs on the capture thread.
    fn start_stream(
        device_name: Option<&str>,
        buffer_duration: Duration,
        stream_failed: Arc<AtomicBool>,
        overrun_bytes: Arc<AtomicU64>,
    ) -> Result<(Stream, HeapCons<u8>, AudioFormat), SourceError> {
        let device = Self::find_device(device_name)?;
        let supported_config = device
            .default_input_config()
            .map_err(|e| SourceError::BackendError(e.to_string()))?;

        let sample_format = supported_config.sample_format();
        let cpal_config: CpalStreamConfig = supported_config.into();
        let format = AudioFormat::new(cpal_config.sample_rate.0, 16, cpal_config.channels);

        let capacity = (format.bytes_for(buffer_duration) as usize).max(4096);
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();

        let on_error = move |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
            stream_failed.store(true, Ordering::SeqCst);
        };

        let stream = match sample_format {
            SampleFormat::I16 => {
                Self::build_i16_stream(&device, &cpal_config, producer, overrun_bytes, on_error)?
            }
            SampleFormat::F32 => {
                Self::build_f32_stream(&device, &cpal_config, producer, overrun_bytes, on_error)?
            }
            other => {
                return Err(SourceError::open_failed(format!(
                    "unsupported sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| SourceError::BackendError(e.to_string()))?;

        Ok((stream, consumer, format))
    }

    fn build_i16_stream(
        device: &Device,
        config: &CpalStreamConfig,
        mut producer: HeapProd<u8>,
        overrun_bytes: Arc<AtomicU64>,
        on_error: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<Stream, SourceError> {
        device
            .build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    // Non-blocking push - drops samples if the ring is full
                    for sample in data {
                        let bytes = sample.to_le_bytes();
                        let pushed = producer.push_slice(&bytes);
                        if pushed < bytes.len() {
                            overrun_bytes.fetch_add((bytes.len() - pushed) as u64, Ordering::Relaxed);
                        }
                    }
                },
                on_error,
                None,
            )
            .map_err(|e| SourceError::BackendError(e.to_string()))
    }

    fn build_f32_stream(
        device: &Device,
        config: &CpalStreamConfig,
        mut producer: HeapProd<u8>,
        overrun_bytes: Arc<AtomicU64>,
        on_error: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<Stream, SourceError> {
        device
            .build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        let bytes = f32_to_i16(sample).to_le_bytes();
                        let pushed = producer.push_slice(&bytes);
                        if pushed < bytes.len() {
                            overrun_bytes.fetch_add((bytes.len() - pushed) as u64, Ordering::Relaxed);
                        }
                    }
                },
                on_error,
                None,
            )
            .map_err(|e| SourceError::BackendError(e.to_string()))
    }
}

#[async_trait]
impl Source for DeviceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.capture.lock().is_some()
    }

    async fn open(&self) -> Result<(), SourceError> {
        if self.is_open() {
            return Err(SourceError::AlreadyOpen);
        }
        self.stream_failed.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.config.device_name.clone();
        let buffer_duration = self.config.buffer_duration;
        let stream_failed = Arc::clone(&self.stream_failed);
        let overrun_bytes = Arc::clone(&self.overrun_bytes);

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                match Self::start_stream(
                    device_name.as_deref(),
                    buffer_duration,
                    stream_failed,
                    overrun_bytes,
                ) {
                    Ok((stream, consumer, format)) => {
                        if ready_tx.send(Ok((consumer, format))).is_err() {
                            return;
                        }
                        // Keep the stream alive until close() drops the sender
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| SourceError::open_failed(format!("capture thread: {e}")))?;

        let (consumer, format) = ready_rx
            .await
            .map_err(|_| SourceError::open_failed("capture thread exited"))??;

        tracing::info!(
            source = %self.name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "device capture started"
        );

        *self.format.lock() = Some(format);
        *self.capture.lock() = Some(Capture {
            consumer,
            stop_tx,
            thread,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        let capture = self.capture.lock().take();
        let Some(capture) = capture else {
            return Ok(());
        };

        drop(capture.stop_tx);
        tokio::task::spawn_blocking(move || capture.thread.join())
            .await
            .map_err(|e| SourceError::BackendError(format!("join failed: {e}")))?
            .map_err(|_| SourceError::BackendError("capture thread panicked".to_string()))?;

        tracing::debug!(source = %self.name, "device capture stopped");
        Ok(())
    }

    async fn can_read(&self, timeout: Duration) -> Result<bool, SourceError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stream_failed.load(Ordering::SeqCst) {
                return Err(SourceError::read_failed("audio stream reported an error"));
            }

            let available = self
                .capture
                .lock()
                .as_ref()
                .map(|capture| capture.consumer.occupied_len());
            let Some(available) = available else {
                return Ok(false);
            };
            if available > 0 {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut capture = self.capture.lock();
        let capture = capture.as_mut().ok_or(SourceError::NotOpen)?;
        Ok(capture.consumer.pop_slice(buf))
    }
}
