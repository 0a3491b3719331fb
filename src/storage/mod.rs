//! Blob storage
//!
//! One file per upload id under a base directory. Only the primitives the
//! protocol needs are offered: create empty, open a writer at an offset, open a
//! reader.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncSeekExt;

/// Blob storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage directory {0} doesn't exist or isn't writable")]
    NotWritable(PathBuf),

    #[error("No stored content for {0}")]
    NotFound(String),

    #[error("Stored content already exists for {0}")]
    AlreadyExists(String),

    #[error("Failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Seek to {expected} in {path} landed at {actual}")]
    Seek {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Filesystem blob storage rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Use `root` as the storage directory
    ///
    /// The directory must exist and must not be read-only.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => Ok(Self { root }),
            _ => Err(StorageError::NotWritable(root)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob for `id`
    pub fn path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.path(id)).await.unwrap_or(false)
    }

    /// Create an empty blob; fails if one already exists
    pub async fn create(&self, id: &str) -> Result<(), StorageError> {
        let path = self.path(id);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(id.to_string()))
            }
            Err(source) => Err(StorageError::Io {
                op: "create",
                path,
                source,
            }),
        }
    }

    /// Open a writer positioned at `offset`
    ///
    /// Bytes past `offset` left behind by an interrupted write are overwritten.
    pub async fn open_writer(&self, id: &str, offset: u64) -> Result<File, StorageError> {
        let path = self.path(id);
        let mut file = match OpenOptions::new().write(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()))
            }
            Err(source) => {
                return Err(StorageError::Io {
                    op: "open",
                    path,
                    source,
                })
            }
        };

        let actual = file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|source| StorageError::Io {
                op: "seek",
                path: path.clone(),
                source,
            })?;
        if actual != offset {
            return Err(StorageError::Seek {
                path,
                expected: offset,
                actual,
            });
        }

        Ok(file)
    }

    /// Open the blob for reading, returning it with its length
    pub async fn open_reader(&self, id: &str) -> Result<(File, u64), StorageError> {
        let path = self.path(id);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                return Err(StorageError::NotFound(id.to_string()))
            }
            Err(source) => {
                return Err(StorageError::Io {
                    op: "open",
                    path,
                    source,
                })
            }
        };

        let meta = file.metadata().await.map_err(|source| StorageError::Io {
            op: "stat",
            path: path.clone(),
            source,
        })?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(id.to_string()));
        }

        Ok((file, meta.len()))
    }

    /// Delete the blob for `id`; a missing blob is not an error
    pub async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let path = self.path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                op: "remove",
                path,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_new_rejects_missing_directory() {
        let result = FileStorage::new("/definitely/not/here");
        assert!(matches!(result, Err(StorageError::NotWritable(_))));
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        storage.create("abc").await.unwrap();
        assert!(storage.exists("abc").await);
        assert!(matches!(
            storage.create("abc").await,
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_writer_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.create("abc").await.unwrap();

        let mut writer = storage.open_writer("abc", 0).await.unwrap();
        writer.write_all(b"hello").await.unwrap();
        writer.flush().await.unwrap();

        let mut writer = storage.open_writer("abc", 5).await.unwrap();
        writer.write_all(b" world").await.unwrap();
        writer.flush().await.unwrap();

        let (mut reader, length) = storage.open_reader("abc").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(length, 11);
        assert_eq!(content, "hello world");
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.create("abc").await.unwrap();

        storage.remove("abc").await.unwrap();
        assert!(!storage.exists("abc").await);
        storage.remove("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert!(matches!(
            storage.open_reader("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.open_writer("nope", 0).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
