//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，业务服务在各自的错误类型中包装它。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== 事务错误 ====================
    #[error("事务已开启，无法重复开启")]
    TransactionAlreadyStarted,

    #[error("当前上下文没有活动事务")]
    TransactionNotStarted,

    #[error("操作超过截止时间")]
    DeadlineExceeded,

    // ==================== 仓储注册错误 ====================
    #[error("仓储未注册: {0}")]
    RepositoryNotFound(String),

    #[error("仓储类型不匹配: {name} 注册为 {registered}，请求类型为 {requested}")]
    RepositoryTypeMismatch {
        name: String,
        registered: &'static str,
        requested: &'static str,
    },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::TransactionAlreadyStarted => "TRANSACTION_ALREADY_STARTED",
            Self::TransactionNotStarted => "TRANSACTION_NOT_STARTED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::RepositoryNotFound(_) => "REPOSITORY_NOT_FOUND",
            Self::RepositoryTypeMismatch { .. } => "REPOSITORY_TYPE_MISMATCH",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 事务状态和仓储注册错误属于编程错误，重试没有意义。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(
            SharedError::TransactionAlreadyStarted.code(),
            "TRANSACTION_ALREADY_STARTED"
        );
        assert_eq!(
            SharedError::RepositoryNotFound("resources".to_string()).code(),
            "REPOSITORY_NOT_FOUND"
        );
    }

    #[test]
    fn test_is_retryable() {
        let db_err = SharedError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());
        assert!(SharedError::DeadlineExceeded.is_retryable());

        assert!(!SharedError::TransactionNotStarted.is_retryable());
        assert!(!SharedError::RepositoryNotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = SharedError::RepositoryTypeMismatch {
            name: "resources".to_string(),
            registered: "dyn ResourceRepository",
            requested: "dyn CategoryRepository",
        };
        let message = err.to_string();
        assert!(message.contains("resources"));
        assert!(message.contains("dyn CategoryRepository"));
    }
}
