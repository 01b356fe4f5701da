use std::io::{Cursor, SeekFrom};
use std::path::Path;

use reelup_protocol::OffsetWindow;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::error::UploadError;

/// Random-access source of upload bytes.
///
/// The server may re-request any range, so reads always seek to the
/// window start instead of streaming sequentially.
pub struct SourceFile<R = tokio::fs::File> {
    reader: R,
    size: u64,
}

impl SourceFile<tokio::fs::File> {
    /// Opens `path` and checks its length against `declared_size`.
    pub async fn open(path: &Path, declared_size: u64) -> Result<Self, UploadError> {
        let file = tokio::fs::File::open(path).await?;
        let actual = file.metadata().await?.len();
        if actual != declared_size {
            return Err(UploadError::SizeMismatch {
                declared: declared_size,
                actual,
            });
        }
        Ok(Self {
            reader: file,
            size: actual,
        })
    }
}

impl SourceFile<Cursor<Vec<u8>>> {
    /// Wraps an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            reader: Cursor::new(data),
            size,
        }
    }
}

impl<R> SourceFile<R>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    /// Wraps any seekable reader of exactly `size` bytes.
    pub fn from_reader(reader: R, size: u64) -> Self {
        Self { reader, size }
    }

    /// Reads exactly the bytes of `window`.
    ///
    /// Fails with [`UploadError::SizeMismatch`] if the window extends past
    /// the source, and with an I/O error if the source turns out shorter
    /// than declared.
    pub async fn read_range(&mut self, window: OffsetWindow) -> Result<Vec<u8>, UploadError> {
        if window.end_offset > self.size {
            return Err(UploadError::SizeMismatch {
                declared: window.end_offset,
                actual: self.size,
            });
        }
        let len = usize::try_from(window.len()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("window {window} does not fit in memory"),
            )
        })?;

        let mut buf = vec![0u8; len];
        if len > 0 {
            self.reader
                .seek(SeekFrom::Start(window.start_offset))
                .await?;
            self.reader.read_exact(&mut buf).await?;
        }
        Ok(buf)
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[tokio::test]
    async fn open_checks_declared_size() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.mp4", b"0123456789");

        let source = SourceFile::open(&path, 10).await.unwrap();
        assert_eq!(source.size(), 10);

        let err = SourceFile::open(&path, 11).await.err().unwrap();
        assert!(matches!(
            err,
            UploadError::SizeMismatch {
                declared: 11,
                actual: 10
            }
        ));
    }

    #[tokio::test]
    async fn open_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = SourceFile::open(&dir.path().join("nope.mp4"), 0)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[tokio::test]
    async fn read_range_is_random_access() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.mp4", b"AABBCCDDEE");
        let mut source = SourceFile::open(&path, 10).await.unwrap();

        assert_eq!(
            source.read_range(OffsetWindow::new(6, 10)).await.unwrap(),
            b"DDEE"
        );
        // Going backwards re-reads the same bytes.
        assert_eq!(
            source.read_range(OffsetWindow::new(0, 4)).await.unwrap(),
            b"AABB"
        );
        assert_eq!(
            source.read_range(OffsetWindow::new(0, 4)).await.unwrap(),
            b"AABB"
        );
    }

    #[tokio::test]
    async fn read_range_empty_window() {
        let mut source = SourceFile::from_bytes(b"abc".to_vec());
        assert!(
            source
                .read_range(OffsetWindow::new(3, 3))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn read_range_past_end_is_rejected() {
        let mut source = SourceFile::from_bytes(b"abc".to_vec());
        let err = source
            .read_range(OffsetWindow::new(1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn truncated_reader_is_io_error() {
        // Declares more bytes than the reader holds.
        let mut source = SourceFile::from_reader(Cursor::new(b"ab".to_vec()), 4);
        let err = source
            .read_range(OffsetWindow::new(0, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
