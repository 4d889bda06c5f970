//! File (or FIFO) source implementation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use crate::source::Source;
use crate::SourceError;

/// A source that reads raw audio bytes from a file.
///
/// Regular files are always readable while open, so `can_read` never waits.
/// Reading past the end of the file yields EOF, which ends the transfer.
///
/// # Example
///
/// ```
/// use broadcast_audio::FileSource;
///
/// // A FIFO fed by an external capture process works the same way
/// let source = FileSource::new("/tmp/capture.fifo");
/// assert!(source.path().ends_with("capture.fifo"));
/// ```
pub struct FileSource {
    name: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
    open: AtomicBool,
}

impl FileSource {
    /// Creates a file source for the given path. The file is opened by `open()`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("file:{}", path.as_ref().display()),
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    /// The path this source reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<(), SourceError> {
        let mut file = self.file.lock().await;
        if file.is_some() {
            return Err(SourceError::AlreadyOpen);
        }

        let opened = File::open(&self.path)
            .await
            .map_err(|e| SourceError::file_error(&self.path, e))?;
        *file = Some(opened);
        self.open.store(true, Ordering::SeqCst);

        tracing::debug!(path = %self.path.display(), "file source opened");
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        let mut file = self.file.lock().await;
        if file.take().is_some() {
            tracing::debug!(path = %self.path.display(), "file source closed");
        }
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn can_read(&self, _timeout: Duration) -> Result<bool, SourceError> {
        Ok(self.is_open())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let mut file = self.file.lock().await;
        let file = file.as_mut().ok_or(SourceError::NotOpen)?;
        file.read(buf)
            .await
            .map_err(|e| SourceError::file_error(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_source_reads_until_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.raw");
        std::fs::write(&path, vec![9u8; 10_000]).unwrap();

        let source = FileSource::new(&path);
        source.open().await.unwrap();

        let mut buf = vec![0u8; 4096];
        let mut total = 0;
        loop {
            assert!(source.can_read(Duration::from_secs(1)).await.unwrap());
            let n = source.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 10_000);
        source.close().await.unwrap();
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let source = FileSource::new("/nonexistent/directory/input.raw");
        assert!(!source.exists());

        let err = source.open().await.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn test_file_source_open_twice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.raw");
        std::fs::write(&path, b"abc").unwrap();

        let source = FileSource::new(&path);
        source.open().await.unwrap();
        assert!(matches!(source.open().await, Err(SourceError::AlreadyOpen)));
    }

    #[tokio::test]
    async fn test_file_source_read_when_closed() {
        let source = FileSource::new("unused.raw");
        let mut buf = [0u8; 8];
        assert!(matches!(
            source.read(&mut buf).await,
            Err(SourceError::NotOpen)
        ));
        assert!(!source.can_read(Duration::ZERO).await.unwrap());
    }

    #[test]
    fn test_file_source_name() {
        let source = FileSource::new("/path/to/capture.raw");
        assert_eq!(source.name(), "file:/path/to/capture.raw");
    }
}
