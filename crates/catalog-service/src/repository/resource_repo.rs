//! 资源仓储（PostgreSQL）
//!
//! 语句在绑定的事务内执行；未绑定事务时直接使用连接池。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storefront_shared::database::{PgBinding, PgExecutor};

use super::traits::ResourceRepository;
use crate::error::Result;
use crate::models::Resource;

pub struct PgResourceRepository {
    binding: PgBinding,
}

impl PgResourceRepository {
    pub fn new(binding: PgBinding) -> Self {
        Self { binding }
    }

    async fn executor(&self) -> Result<PgExecutor> {
        Ok(PgExecutor::acquire(&self.binding).await?)
    }
}

#[async_trait]
impl ResourceRepository for PgResourceRepository {
    async fn create(&self, resource: &Resource) -> Result<()> {
        let mut executor = self.executor().await?;
        sqlx::query(
            r#"
            INSERT INTO resources (id, name, original_name, content_type, size_bytes,
                                   owner_id, owner_type, state, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&resource.id)
        .bind(&resource.name)
        .bind(&resource.original_name)
        .bind(&resource.content_type)
        .bind(resource.size_bytes)
        .bind(&resource.owner_id)
        .bind(&resource.owner_type)
        .bind(resource.state)
        .bind(resource.expires_at)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(executor.conn())
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Resource>> {
        let mut executor = self.executor().await?;
        let resource = sqlx::query_as::<_, Resource>(
            r#"
            SELECT id, name, original_name, content_type, size_bytes, owner_id, owner_type,
                   state, expires_at, created_at, updated_at
            FROM resources
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor.conn())
        .await?;

        Ok(resource)
    }

    async fn list_by_owner(&self, owner_type: &str, owner_id: &str) -> Result<Vec<Resource>> {
        let mut executor = self.executor().await?;
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT id, name, original_name, content_type, size_bytes, owner_id, owner_type,
                   state, expires_at, created_at, updated_at
            FROM resources
            WHERE owner_type = $1 AND owner_id = $2
            ORDER BY created_at, id
            "#,
        )
        .bind(owner_type)
        .bind(owner_id)
        .fetch_all(executor.conn())
        .await?;

        Ok(resources)
    }

    async fn make_permanent(
        &self,
        ids: &[String],
        owner_id: &str,
        owner_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut executor = self.executor().await?;

        // 先锁定可转正的行，全部可用时才更新
        let eligible: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM resources
            WHERE id = ANY($1)
              AND ((state = 'temporary' AND expires_at > $4)
                   OR (state = 'permanent' AND owner_id = $2 AND owner_type = $3))
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .bind(owner_id)
        .bind(owner_type)
        .bind(now)
        .fetch_all(executor.conn())
        .await?;

        let unavailable: Vec<String> = ids
            .iter()
            .filter(|id| !eligible.contains(id))
            .cloned()
            .collect();
        if !unavailable.is_empty() {
            return Ok(unavailable);
        }

        sqlx::query(
            r#"
            UPDATE resources
            SET state = 'permanent', expires_at = NULL,
                owner_id = $2, owner_type = $3, updated_at = $4
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(owner_id)
        .bind(owner_type)
        .bind(now)
        .execute(executor.conn())
        .await?;

        Ok(Vec::new())
    }

    async fn get_expired(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Resource>> {
        let mut executor = self.executor().await?;
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT id, name, original_name, content_type, size_bytes, owner_id, owner_type,
                   state, expires_at, created_at, updated_at
            FROM resources
            WHERE state = 'temporary' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(before)
        .bind(limit)
        .fetch_all(executor.conn())
        .await?;

        Ok(resources)
    }

    async fn claim_expired(&self, id: &str, before: DateTime<Utc>) -> Result<Option<Resource>> {
        let mut executor = self.executor().await?;
        // SKIP LOCKED：正在被转正事务锁定的行直接跳过，多实例部署时也不会重复处理
        let resource = sqlx::query_as::<_, Resource>(
            r#"
            SELECT id, name, original_name, content_type, size_bytes, owner_id, owner_type,
                   state, expires_at, created_at, updated_at
            FROM resources
            WHERE id = $1 AND state = 'temporary' AND expires_at < $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(id)
        .bind(before)
        .fetch_optional(executor.conn())
        .await?;

        Ok(resource)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut executor = self.executor().await?;
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(executor.conn())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_owner(&self, owner_type: &str, owner_id: &str) -> Result<Vec<Resource>> {
        let mut executor = self.executor().await?;
        let resources = sqlx::query_as::<_, Resource>(
            r#"
            DELETE FROM resources
            WHERE owner_type = $1 AND owner_id = $2
            RETURNING id, name, original_name, content_type, size_bytes, owner_id, owner_type,
                      state, expires_at, created_at, updated_at
            "#,
        )
        .bind(owner_type)
        .bind(owner_id)
        .fetch_all(executor.conn())
        .await?;

        Ok(resources)
    }
}
