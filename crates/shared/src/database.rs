//! 数据库连接管理模块
//!
//! 提供 PostgreSQL 连接池管理，支持健康检查和连接配置，
//! 并作为工作单元的 PostgreSQL 事务后端。

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use crate::uow::{Binding, TransactionBackend, TxGuard};

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建数据库连接池
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("Database connection pool created");

        Ok(Self { pool })
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(SharedError::from)
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }

    /// 运行工作区根目录 migrations/ 下的迁移
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}

impl std::ops::Deref for Database {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

#[async_trait]
impl TransactionBackend for Database {
    type Transaction = Transaction<'static, Postgres>;
    type Connection = PgPool;

    async fn begin(&self) -> Result<Self::Transaction> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Transaction) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Transaction) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }

    fn connection(&self) -> Self::Connection {
        self.pool.clone()
    }
}

/// PostgreSQL 仓储绑定
pub type PgBinding = Binding<Database>;

/// 按绑定取得的可执行连接
///
/// 事务绑定时持有事务锁，语句在事务内执行；否则从连接池借出一个连接。
pub enum PgExecutor {
    Pooled(PoolConnection<Postgres>),
    Scoped(TxGuard<Database>),
}

impl PgExecutor {
    pub async fn acquire(binding: &PgBinding) -> Result<Self> {
        match binding {
            Binding::Unscoped(pool) => Ok(Self::Pooled(pool.acquire().await?)),
            Binding::Scoped(handle) => Ok(Self::Scoped(handle.lock().await?)),
        }
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        match self {
            Self::Pooled(conn) => &mut **conn,
            Self::Scoped(tx) => &mut ***tx,
        }
    }
}
