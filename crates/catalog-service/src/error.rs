//! 目录服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use storefront_shared::error::SharedError;
use thiserror::Error;

use crate::storage::StorageError;

/// 目录服务错误类型
#[derive(Debug, Error)]
pub enum CatalogError {
    // === 资源相关错误 ===
    #[error("资源不存在: {0}")]
    ResourceNotFound(String),

    /// 资源不存在、已过期或已归属其他对象，无法转正
    #[error("资源不可用: {}", .0.join(","))]
    ResourceUnavailable(Vec<String>),

    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("存储操作超时: {0}")]
    StorageTimeout(String),

    // === 分类相关错误 ===
    #[error("分类不存在: {0}")]
    CategoryNotFound(i64),

    #[error("分类名称已存在: {0}")]
    CategoryNameTaken(String),

    // === 后台任务错误 ===
    #[error("清理任务未能在 {0:?} 内停止")]
    ReaperStopTimeout(std::time::Duration),

    // === 系统错误 ===
    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl From<validator::ValidationErrors> for CatalogError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl CatalogError {
    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            Self::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
            Self::Storage(StorageError::NotFound(_)) => "STORAGE_OBJECT_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::StorageTimeout(_) => "STORAGE_TIMEOUT",
            Self::CategoryNotFound(_) => "CATEGORY_NOT_FOUND",
            Self::CategoryNameTaken(_) => "CATEGORY_NAME_TAKEN",
            Self::ReaperStopTimeout(_) => "REAPER_STOP_TIMEOUT",
            Self::Shared(e) => e.code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::StorageTimeout(_) => true,
            Self::Storage(e) => e.is_retryable(),
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }
}
