//! Local file sink implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::sink::Sink;
use crate::SinkError;

/// Timestamp format appended to file names when date stamping is enabled.
const DATE_STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// A sink that dumps the raw stream into a local file.
///
/// `cut()` finishes the current file and continues in a new one. Without
/// date stamping the first segment is written to the configured path and
/// later segments get a counter (`show.raw`, `show-1.raw`, `show-2.raw`).
/// With date stamping every segment carries its opening time
/// (`show-2024-05-01-20-00-00.raw`).
///
/// All file I/O is performed in the blocking thread pool to avoid blocking
/// the async runtime.
///
/// # Example
///
/// ```no_run
/// use broadcast_audio::FileSink;
///
/// let sink = FileSink::new("archive/show.raw").with_date_stamp(true);
/// // Attach to a connector...
/// ```
pub struct FileSink {
    name: String,
    path: Arc<PathBuf>,
    date_stamp: bool,
    open: AtomicBool,
    state: Arc<Mutex<FileState>>,
}

#[derive(Default)]
struct FileState {
    writer: Option<BufWriter<File>>,
    current: Option<PathBuf>,
    /// Segments opened so far; names the next counter suffix.
    segment: u32,
    /// Date stamp of the newest segment, if stamped.
    last_stamp: Option<String>,
    bytes_written: u64,
}

impl FileSink {
    /// Creates a file sink writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("file:{}", path.as_ref().display()),
            path: Arc::new(path.as_ref().to_path_buf()),
            date_stamp: false,
            open: AtomicBool::new(false),
            state: Arc::new(Mutex::new(FileState::default())),
        }
    }

    /// Inserts the local date and time into every segment's file name.
    #[must_use]
    pub fn with_date_stamp(mut self, enabled: bool) -> Self {
        self.date_stamp = enabled;
        self
    }

    /// The file currently being written, if open.
    pub async fn current_path(&self) -> Option<PathBuf> {
        self.state.lock().await.current.clone()
    }

    /// Number of files this sink has created.
    pub async fn segment_count(&self) -> u32 {
        self.state.lock().await.segment
    }

    /// Total bytes written across all segments.
    pub async fn bytes_written(&self) -> u64 {
        self.state.lock().await.bytes_written
    }

    /// Builds the file name for a segment.
    fn segment_path(base: &Path, segment: u32, date: Option<&str>) -> PathBuf {
        let suffix = match (date, segment) {
            (None, 0) => return base.to_path_buf(),
            (None, n) => n.to_string(),
            (Some(date), 0) => date.to_string(),
            (Some(date), n) => format!("{date}-{n}"),
        };

        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = match base.extension() {
            Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
            None => format!("{stem}-{suffix}"),
        };
        base.with_file_name(file_name)
    }

    /// Creates the next segment's file. Runs in a blocking context.
    fn open_segment_blocking(
        state: &mut FileState,
        base: &Path,
        date_stamp: bool,
    ) -> Result<(), SinkError> {
        let date = date_stamp.then(|| chrono::Local::now().format(DATE_STAMP_FORMAT).to_string());
        let path = match &date {
            // Several segments within the same second: add the counter
            Some(date) if state.last_stamp.as_ref() == Some(date) => {
                Self::segment_path(base, state.segment, Some(date))
            }
            Some(date) => Self::segment_path(base, 0, Some(date)),
            None => Self::segment_path(base, state.segment, None),
        };

        let file = File::create(&path).map_err(|e| SinkError::file_error(&path, e))?;
        tracing::debug!(path = %path.display(), "file sink segment opened");

        state.writer = Some(BufWriter::new(file));
        state.current = Some(path);
        state.last_stamp = date;
        state.segment += 1;
        Ok(())
    }

    /// Flushes and drops the current writer. Runs in a blocking context.
    fn finish_segment_blocking(state: &mut FileState) -> Result<(), SinkError> {
        if let Some(mut writer) = state.writer.take() {
            let path = state.current.take().unwrap_or_default();
            writer.flush().map_err(|e| SinkError::file_error(&path, e))?;
            tracing::debug!(path = %path.display(), "file sink segment closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), SinkError> {
        if self.is_open() {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);
        let date_stamp = self.date_stamp;

        tokio::task::spawn_blocking(move || {
            // Reopening continues in a fresh segment instead of truncating
            let mut state = state.blocking_lock();
            Self::open_segment_blocking(&mut state, &path, date_stamp)
        })
        .await
        .map_err(|e| SinkError::custom(format!("open task panicked: {e}")))??;

        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        if !self.is_open() {
            return Err(SinkError::NotOpen);
        }

        tracing::trace!("FileSink {}: writing {} bytes", self.name, data.len());

        let data = data.to_vec();
        let state = Arc::clone(&self.state);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            let state = &mut *state;
            let writer = state.writer.as_mut().ok_or(SinkError::NotOpen)?;
            writer.write_all(&data).map_err(|e| {
                SinkError::file_error(state.current.clone().unwrap_or_default(), e)
            })?;
            state.bytes_written += data.len() as u64;
            Ok(data.len())
        })
        .await
        .map_err(|e| SinkError::custom(format!("write task panicked: {e}")))?
    }

    async fn cut(&self) -> Result<(), SinkError> {
        if !self.is_open() {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);
        let date_stamp = self.date_stamp;

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::finish_segment_blocking(&mut state)?;
            Self::open_segment_blocking(&mut state, &path, date_stamp)
        })
        .await
        .map_err(|e| SinkError::custom(format!("cut task panicked: {e}")))?
    }

    async fn close(&self) -> Result<(), SinkError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::finish_segment_blocking(&mut state)
        })
        .await
        .map_err(|e| SinkError::custom(format!("close task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_sink_writes_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("show.raw");

        let sink = FileSink::new(&path);
        sink.open().await.unwrap();
        assert_eq!(sink.write(&[1, 2, 3]).await.unwrap(), 3);
        sink.write(&[4, 5]).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(sink.bytes_written().await, 5);
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn test_file_sink_cut_rotates_segments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("show.raw");

        let sink = FileSink::new(&path);
        sink.open().await.unwrap();
        sink.write(b"first").await.unwrap();
        sink.cut().await.unwrap();
        sink.write(b"second").await.unwrap();
        sink.cut().await.unwrap();
        sink.write(b"third").await.unwrap();
        assert_eq!(sink.current_path().await, Some(dir.path().join("show-2.raw")));
        sink.close().await.unwrap();

        assert_eq!(sink.segment_count().await, 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("show-1.raw")).unwrap(), b"second");
        assert_eq!(std::fs::read(dir.path().join("show-2.raw")).unwrap(), b"third");
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_file_sink_date_stamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("show.raw");

        let sink = FileSink::new(&path).with_date_stamp(true);
        sink.open().await.unwrap();
        sink.cut().await.unwrap();
        sink.close().await.unwrap();

        let names = file_names(dir.path());
        assert_eq!(names.len(), 2);
        for name in &names {
            assert!(name.starts_with("show-20"), "unexpected name {name}");
            assert!(name.ends_with(".raw"));
        }
    }

    #[tokio::test]
    async fn test_file_sink_rapid_cuts_never_reuse_a_name() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("show.raw")).with_date_stamp(true);

        sink.open().await.unwrap();
        for i in 0..5u8 {
            sink.write(&[i]).await.unwrap();
            sink.cut().await.unwrap();
        }
        sink.close().await.unwrap();

        // Every segment survives, none was truncated by a later one
        let names = file_names(dir.path());
        assert_eq!(names.len(), 6);
        let mut contents: Vec<Vec<u8>> = names
            .iter()
            .map(|name| std::fs::read(dir.path().join(name)).unwrap())
            .filter(|bytes| !bytes.is_empty())
            .collect();
        contents.sort();
        assert_eq!(contents, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[tokio::test]
    async fn test_file_sink_reopen_starts_new_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("show.raw");

        let sink = FileSink::new(&path);
        sink.open().await.unwrap();
        sink.write(b"one").await.unwrap();
        sink.close().await.unwrap();
        sink.open().await.unwrap();
        sink.write(b"two").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("show-1.raw")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_file_sink_invalid_path_error() {
        let sink = FileSink::new("/nonexistent/directory/show.raw");
        let err = sink.open().await.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn test_file_sink_cut_when_closed_is_noop() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("show.raw"));
        sink.cut().await.unwrap();
        assert_eq!(sink.segment_count().await, 0);
        assert!(matches!(sink.write(&[1]).await, Err(SinkError::NotOpen)));
    }

    #[test]
    fn test_segment_path_naming() {
        let base = Path::new("/srv/show.mp3");
        assert_eq!(FileSink::segment_path(base, 0, None), base);
        assert_eq!(
            FileSink::segment_path(base, 3, None),
            PathBuf::from("/srv/show-3.mp3")
        );
        assert_eq!(
            FileSink::segment_path(base, 0, Some("2024-05-01-20-00-00")),
            PathBuf::from("/srv/show-2024-05-01-20-00-00.mp3")
        );
        assert_eq!(
            FileSink::segment_path(Path::new("/srv/show"), 1, None),
            PathBuf::from("/srv/show-1")
        );
    }

    #[test]
    fn test_file_sink_name() {
        let sink = FileSink::new("/path/to/show.raw");
        assert_eq!(sink.name(), "file:/path/to/show.raw");
    }
}
