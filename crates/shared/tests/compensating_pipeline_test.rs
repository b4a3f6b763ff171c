//! 工作单元与补偿日志组合使用的集成测试
//!
//! 模拟"事务写入 + 多个外部副作用"的业务操作，验证失败时
//! 数据库回滚且已完成的外部副作用按相反顺序撤销。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use storefront_shared::compensation::CompensationLog;
use storefront_shared::error::{Result, SharedError};
use storefront_shared::test_utils::RecordingBackend;
use storefront_shared::uow::{Binding, RepositoryKey, TxContext, UnitOfWork};

#[async_trait]
trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &str) -> Result<()>;
}

struct RecordingOrders {
    binding: Binding<RecordingBackend>,
}

#[async_trait]
impl OrderRepository for RecordingOrders {
    async fn insert(&self, order: &str) -> Result<()> {
        match &self.binding {
            Binding::Unscoped(backend) => backend.write_unscoped(order),
            Binding::Scoped(handle) => handle.lock().await?.writes.push(order.to_string()),
        }
        Ok(())
    }
}

const ORDERS: RepositoryKey<dyn OrderRepository> = RepositoryKey::new("orders");

/// 外部副作用：带撤销记录的简单存储
#[derive(Default)]
struct ExternalStore {
    objects: Mutex<BTreeSet<String>>,
    undo_order: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl ExternalStore {
    fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn put(&self, name: &str) -> std::result::Result<(), String> {
        if self.fail_on.as_deref() == Some(name) {
            return Err(format!("store rejected {name}"));
        }
        self.objects.lock().insert(name.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) {
        self.objects.lock().remove(name);
        self.undo_order.lock().push(name.to_string());
    }
}

#[derive(Debug)]
enum PipelineError {
    Shared(SharedError),
    Effect(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared(e) => write!(f, "{e}"),
            Self::Effect(e) => write!(f, "{e}"),
        }
    }
}

impl From<SharedError> for PipelineError {
    fn from(e: SharedError) -> Self {
        Self::Shared(e)
    }
}

async fn place_order(
    uow: &UnitOfWork<RecordingBackend>,
    store: Arc<ExternalStore>,
    ctx: &TxContext<RecordingBackend>,
    effects: &[&str],
) -> std::result::Result<(), PipelineError> {
    uow.run(ctx, |tx| async move {
        let mut compensations = CompensationLog::new("place_order");
        let result = async {
            uow.repository(&tx, &ORDERS)?.insert("order-1").await?;
            for effect in effects {
                store.put(effect).map_err(PipelineError::Effect)?;
                let store = store.clone();
                let name = effect.to_string();
                compensations.push(format!("remove {name}"), move || async move {
                    store.remove(&name);
                    Ok(())
                });
            }
            Ok::<(), PipelineError>(())
        }
        .await;
        compensations.settle(result).await
    })
    .await
}

fn unit_of_work() -> (UnitOfWork<RecordingBackend>, RecordingBackend) {
    let backend = RecordingBackend::new();
    let uow = UnitOfWork::new(backend.clone());
    uow.register_repository(ORDERS, |binding| -> Arc<dyn OrderRepository> {
        Arc::new(RecordingOrders { binding })
    });
    (uow, backend)
}

#[tokio::test]
async fn test_all_effects_succeed_commits_and_keeps_effects() {
    let (uow, backend) = unit_of_work();
    let store = Arc::new(ExternalStore::default());

    place_order(&uow, store.clone(), &TxContext::background(), &["a", "b", "c"])
        .await
        .unwrap();

    assert_eq!(backend.committed(), vec!["order-1".to_string()]);
    assert_eq!(store.objects.lock().len(), 3);
    assert!(store.undo_order.lock().is_empty());
}

#[tokio::test]
async fn test_effect_failure_undoes_previous_effects_in_reverse() {
    let (uow, backend) = unit_of_work();
    let store = Arc::new(ExternalStore::failing_on("c"));

    let result = place_order(&uow, store.clone(), &TxContext::background(), &["a", "b", "c"]).await;

    assert!(matches!(result, Err(PipelineError::Effect(ref e)) if e.contains("c")));
    assert!(backend.committed().is_empty());
    assert_eq!(backend.rollbacks(), 1);
    assert!(store.objects.lock().is_empty());
    assert_eq!(
        *store.undo_order.lock(),
        vec!["b".to_string(), "a".to_string()]
    );
}

#[tokio::test]
async fn test_first_effect_failure_has_nothing_to_undo() {
    let (uow, backend) = unit_of_work();
    let store = Arc::new(ExternalStore::failing_on("a"));

    let result = place_order(&uow, store.clone(), &TxContext::background(), &["a", "b"]).await;

    assert!(result.is_err());
    assert!(backend.committed().is_empty());
    assert!(store.undo_order.lock().is_empty());
}

#[tokio::test]
async fn test_pipeline_inside_outer_transaction_runs_inline() {
    let (uow, backend) = unit_of_work();
    let store = Arc::new(ExternalStore::failing_on("b"));

    let outer = uow.begin(&TxContext::background()).await.unwrap();
    tokio_test::assert_err!(place_order(&uow, store.clone(), &outer, &["a", "b"]).await);

    // 内联执行不开启第二个事务，外层事务仍由调用方决定提交或回滚
    assert_eq!(backend.begun(), 1);
    assert!(outer.handle().unwrap().is_active().await);
    uow.rollback(&outer).await.unwrap();

    assert!(backend.committed().is_empty());
    assert_eq!(*store.undo_order.lock(), vec!["a".to_string()]);
}
