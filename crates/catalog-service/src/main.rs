//! 目录服务
//!
//! 进程入口：加载配置、初始化可观测性和数据库，启动过期资源清理任务，
//! 收到退出信号后依次停止清理任务并关闭连接池。

use std::sync::Arc;

use anyhow::Result;
use storefront_shared::clock::SystemClock;
use storefront_shared::config::AppConfig;
use storefront_shared::database::Database;
use storefront_shared::observability;
use storefront_shared::uow::UnitOfWork;
use tracing::{error, info, warn};

use catalog_service::CatalogState;
use catalog_service::repository::register_postgres_repositories;
use catalog_service::storage::LocalObjectStore;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载 .env 与分层配置
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }
    let config = AppConfig::load("catalog-service")?;

    // 2. 初始化可观测性并注入服务名
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        storage_root = %config.resources.storage_root.display(),
        "Starting catalog-service..."
    );

    // 3. 初始化数据库连接
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    if config.database.run_migrations {
        if config.is_production() {
            warn!("Running migrations automatically in production");
        }
        db.run_migrations().await?;
    }
    info!("Database connection established");

    // 4. 组装工作单元和服务
    let uow = Arc::new(UnitOfWork::new(db.clone()));
    register_postgres_repositories(&uow);
    info!(repositories = ?uow.registry().registered_names(), "Repositories registered");

    let store = Arc::new(LocalObjectStore::new(config.resources.storage_root.clone()));
    let state = CatalogState::new(
        uow,
        store,
        Arc::new(SystemClock),
        config.resources.clone(),
    );

    // 5. 启动过期资源清理任务
    let reaper = state.reaper(config.reaper.clone()).start();

    shutdown_signal().await;

    // 6. 依次停止清理任务并关闭连接池
    if let Err(e) = reaper.stop().await {
        warn!(error = %e, "Reaper did not stop cleanly");
    }
    db.close().await;

    info!("catalog-service shutdown complete");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
