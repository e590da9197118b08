use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read-only access to the data being uploaded.
///
/// The uploader only ever asks for ranges inside `[0, size())`, one part at a
/// time unless concurrent transfers are enabled.
pub trait FileHandle: Send + Sync + 'static {
    fn size(&self) -> u64;

    fn read_range(&self, start: u64, end: u64)
    -> impl Future<Output = io::Result<Bytes>> + Send;
}

/// A file on the local filesystem.
///
/// Every read opens its own descriptor, so no read state outlives a part.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    size: u64,
}

impl LocalFile {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        Ok(Self {
            path,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The final path component, used as the upload's filename.
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

impl FileHandle for LocalFile {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.size)?;

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }
}

impl FileHandle for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.len() as u64)?;
        Ok(self.slice(start as usize..end as usize))
    }
}

impl FileHandle for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.len() as u64)?;
        Ok(Bytes::copy_from_slice(&self[start as usize..end as usize]))
    }
}

fn check_range(start: u64, end: u64, size: u64) -> io::Result<()> {
    if start > end || end > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {}..{} is outside of 0..{}", start, end, size),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_local_file_reads_range() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let file = LocalFile::open(tmp.path()).await.unwrap();
        assert_eq!(file.size(), 10);
        assert_eq!(file.read_range(3, 7).await.unwrap(), Bytes::from_static(b"3456"));
        assert_eq!(file.read_range(10, 10).await.unwrap(), Bytes::new());
    }

    #[tokio::test]
    async fn test_local_file_rejects_out_of_bounds() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();

        let file = LocalFile::open(tmp.path()).await.unwrap();
        let err = file.read_range(1, 4).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_local_file_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalFile::open(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_in_memory_sources() {
        let bytes = Bytes::from_static(b"hello world");
        assert_eq!(bytes.read_range(6, 11).await.unwrap(), Bytes::from_static(b"world"));

        let vec = b"hello world".to_vec();
        assert_eq!(vec.read_range(0, 5).await.unwrap(), Bytes::from_static(b"hello"));
        assert!(vec.read_range(5, 4).await.is_err());
    }
}
