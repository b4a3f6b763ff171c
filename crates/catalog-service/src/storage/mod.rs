//! 对象存储
//!
//! 资源的二进制内容保存在对象存储中，与数据库事务无关。
//! 上传后的撤销、资源删除后的清理都需要显式调用 `delete`。

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("存储对象不存在: {0}")]
    NotFound(String),

    #[error("非法的存储对象名称: {0}")]
    InvalidName(String),

    #[error("存储 IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("存储服务不可用: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_))
    }
}

/// 对象存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// 删除对象，对象不存在时返回 `NotFound`
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

/// 校验存储对象名称，只允许单层文件名
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= 255
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("0f8e2c1a9b.png").is_ok());
        assert!(validate_name("report_v2-final.pdf").is_ok());

        for bad in ["", ".", "..", "../etc/passwd", "a/b.png", "a\\b", ".hidden", "名字.png"] {
            assert!(
                matches!(validate_name(bad), Err(StorageError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
