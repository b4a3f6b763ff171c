//! 本地文件系统存储

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ObjectStore, StorageError, validate_name};

/// 以目录为根的本地文件存储
///
/// 写入先落到临时文件再重命名，读取方不会看到写了一半的内容。
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

fn partial_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!(".{}.partial", name))
}

fn map_not_found(name: &str, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let partial = partial_path(&self.root, name);
        let written = async {
            tokio::fs::write(&partial, bytes).await?;
            tokio::fs::rename(&partial, &path).await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!(name, size = bytes.len(), "文件已写入本地存储");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_not_found(name, e))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_not_found(name, e))?;
        debug!(name, "文件已从本地存储删除");
        Ok(())
    }
}
