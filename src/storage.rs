//! # Local Chunked Storage
//!
//! The replica manager treats local storage as an external collaborator
//! behind the [`ChunkStore`] trait: read a whole file for upload, write an
//! incoming replica chunk, read a held replica back out, remove a replica.
//!
//! [`FsStore`] is the filesystem implementation, rooted at one data
//! directory. The baseline protocol ships whole files as chunk 1 of 1, but
//! chunked writes are represented: partial chunks land in `.part` files and
//! are assembled into the final file once every index has arrived.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

/// Storage failures, kept apart from transport errors so callers can apply
/// different policies.
#[derive(Debug)]
pub enum StorageError {
    /// The requested file does not exist.
    NotFound(String),
    /// A replica filename tried to escape the data directory or was empty.
    InvalidName(String),
    /// Underlying filesystem failure.
    Io(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(name) => write!(f, "file not found: {name}"),
            StorageError::InvalidName(name) => write!(f, "invalid replica filename: {name}"),
            StorageError::Io(e) => write!(f, "storage I/O error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Chunk-level storage consumed by the replica manager.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Read an arbitrary local file (the upload source).
    async fn read_whole_file(&self, path: &Path) -> Result<Vec<u8>, StorageError>;

    /// Write chunk `index` of `total` for a replica we are accepting.
    async fn write_chunk(
        &self,
        filename: &str,
        index: u32,
        total: u32,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Read a fully assembled replica we hold.
    async fn read_replica(&self, filename: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a replica and any stray partial chunks. Removing a replica
    /// that was never stored is not an error.
    async fn remove_file(&self, filename: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed store rooted at a single data directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create the store, making the data directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Replica names are bare filenames; anything with a path component is
    /// rejected so peers cannot write outside the data directory.
    fn replica_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        let name = Path::new(filename);
        let valid = !filename.is_empty()
            && name.components().count() == 1
            && name.file_name().is_some_and(|f| f == name.as_os_str());
        if !valid {
            return Err(StorageError::InvalidName(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    fn part_path(&self, filename: &str, index: u32, total: u32) -> Result<PathBuf, StorageError> {
        let final_path = self.replica_path(filename)?;
        Ok(final_path.with_extension(format!("part-{index}-of-{total}")))
    }

    /// Once all parts of a multi-chunk replica exist, concatenate them in
    /// index order and remove the part files.
    async fn try_assemble(&self, filename: &str, total: u32) -> Result<(), StorageError> {
        let mut parts = Vec::with_capacity(total as usize);
        for index in 1..=total {
            parts.push(self.part_path(filename, index, total)?);
        }
        for part in &parts {
            if !tokio::fs::try_exists(part).await? {
                return Ok(());
            }
        }

        let mut assembled = Vec::new();
        for part in &parts {
            assembled.extend(tokio::fs::read(part).await?);
        }
        tokio::fs::write(self.replica_path(filename)?, &assembled).await?;
        for part in &parts {
            let _ = tokio::fs::remove_file(part).await;
        }
        debug!(filename, total, "assembled chunked replica");
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for FsStore {
    async fn read_whole_file(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_chunk(
        &self,
        filename: &str,
        index: u32,
        total: u32,
        data: &[u8],
    ) -> Result<(), StorageError> {
        if total <= 1 {
            tokio::fs::write(self.replica_path(filename)?, data).await?;
            return Ok(());
        }
        tokio::fs::write(self.part_path(filename, index, total)?, data).await?;
        self.try_assemble(filename, total).await
    }

    async fn read_replica(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.replica_path(filename)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, filename: &str) -> Result<(), StorageError> {
        let path = self.replica_path(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("data")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn single_chunk_write_read_remove() {
        let (_dir, store) = store().await;
        store.write_chunk("report.txt", 1, 1, b"hello").await.unwrap();
        assert_eq!(store.read_replica("report.txt").await.unwrap(), b"hello");
        store.remove_file("report.txt").await.unwrap();
        assert!(matches!(
            store.read_replica("report.txt").await,
            Err(StorageError::NotFound(_))
        ));
        // Removing again is fine.
        store.remove_file("report.txt").await.unwrap();
    }

    #[tokio::test]
    async fn multi_chunk_assembly_in_any_order() {
        let (_dir, store) = store().await;
        store.write_chunk("big.bin", 2, 2, b"world").await.unwrap();
        assert!(matches!(
            store.read_replica("big.bin").await,
            Err(StorageError::NotFound(_))
        ));
        store.write_chunk("big.bin", 1, 2, b"hello ").await.unwrap();
        assert_eq!(store.read_replica("big.bin").await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn path_escape_rejected() {
        let (_dir, store) = store().await;
        for name in ["../evil", "/etc/passwd", "a/b", ""] {
            assert!(matches!(
                store.write_chunk(name, 1, 1, b"x").await,
                Err(StorageError::InvalidName(_))
            ));
        }
    }

    #[tokio::test]
    async fn read_whole_file_missing_is_not_found() {
        let (dir, store) = store().await;
        let missing = dir.path().join("nope.txt");
        assert!(matches!(
            store.read_whole_file(&missing).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
