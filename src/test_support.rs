//! Scriptable sinks shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::sink::Sink;
use crate::SinkError;

/// A sink that records every write and can be scripted to misbehave.
pub struct RecordingSink {
    name: String,
    open: AtomicBool,
    written: Mutex<Vec<Vec<u8>>>,
    write_calls: AtomicUsize,
    fail_writes_from: Option<usize>,
    fail_write_once_at: Option<usize>,
    fail_open: AtomicBool,
    fail_reopen: bool,
    stall_writes: bool,
    never_ready: bool,
    write_delay: Duration,
    opens: AtomicUsize,
    closes: AtomicUsize,
    cuts: AtomicUsize,
    active_calls: AtomicUsize,
    overlapping_calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            open: AtomicBool::new(false),
            written: Mutex::new(Vec::new()),
            write_calls: AtomicUsize::new(0),
            fail_writes_from: None,
            fail_write_once_at: None,
            fail_open: AtomicBool::new(false),
            fail_reopen: false,
            stall_writes: false,
            never_ready: false,
            write_delay: Duration::ZERO,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            cuts: AtomicUsize::new(0),
            active_calls: AtomicUsize::new(0),
            overlapping_calls: AtomicUsize::new(0),
        }
    }

    /// Every write from the `n`th (1-based) on fails.
    pub fn failing_from(mut self, n: usize) -> Self {
        self.fail_writes_from = Some(n);
        self
    }

    /// Only the `n`th (1-based) write fails.
    pub fn failing_once_at(mut self, n: usize) -> Self {
        self.fail_write_once_at = Some(n);
        self
    }

    /// `open()` fails until `set_fail_open(false)`.
    pub fn refusing_open(self) -> Self {
        self.fail_open.store(true, Ordering::SeqCst);
        self
    }

    /// Any `open()` after the first one fails.
    pub fn refusing_reopen(mut self) -> Self {
        self.fail_reopen = true;
        self
    }

    /// Writes never complete.
    pub fn stalling(mut self) -> Self {
        self.stall_writes = true;
        self
    }

    /// `can_write` always reports not ready.
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Every write takes `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Sizes of the successful writes, in order.
    pub fn writes(&self) -> Vec<usize> {
        self.written.lock().iter().map(Vec::len).collect()
    }

    /// All successfully written bytes, concatenated.
    pub fn bytes(&self) -> Vec<u8> {
        self.written.lock().concat()
    }

    pub fn total_bytes(&self) -> usize {
        self.written.lock().iter().map(Vec::len).sum()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn cuts(&self) -> usize {
        self.cuts.load(Ordering::SeqCst)
    }

    /// How many calls started while another call on this sink was running.
    pub fn overlapping_calls(&self) -> usize {
        self.overlapping_calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> CallGuard<'_> {
        if self.active_calls.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapping_calls.fetch_add(1, Ordering::SeqCst);
        }
        CallGuard(&self.active_calls)
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), SinkError> {
        let _guard = self.enter();
        if self.fail_open.load(Ordering::SeqCst) || (self.fail_reopen && self.opens() > 0) {
            return Err(SinkError::open_failed("scripted open failure"));
        }
        self.open.store(true, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn can_write(&self, _timeout: Duration) -> bool {
        self.is_open() && !self.never_ready
    }

    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let _guard = self.enter();
        if !self.is_open() {
            return Err(SinkError::NotOpen);
        }

        let call = self.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.stall_writes {
            std::future::pending::<()>().await;
        }
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        if self.fail_writes_from.is_some_and(|n| call >= n) || self.fail_write_once_at == Some(call)
        {
            return Err(SinkError::write_failed(format!("scripted failure on write {call}")));
        }

        self.written.lock().push(data.to_vec());
        Ok(data.len())
    }

    async fn cut(&self) -> Result<(), SinkError> {
        let _guard = self.enter();
        self.cuts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        let _guard = self.enter();
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Upcasts a recording sink handle for attaching to a connector.
pub fn as_sink(sink: &Arc<RecordingSink>) -> Arc<dyn Sink> {
    Arc::clone(sink) as Arc<dyn Sink>
}
