//! 分类仓储（PostgreSQL）

use async_trait::async_trait;
use storefront_shared::database::{PgBinding, PgExecutor};

use super::traits::CategoryRepository;
use crate::error::{CatalogError, Result};
use crate::models::{Category, NewCategory};

pub struct PgCategoryRepository {
    binding: PgBinding,
}

impl PgCategoryRepository {
    pub fn new(binding: PgBinding) -> Self {
        Self { binding }
    }

    async fn executor(&self) -> Result<PgExecutor> {
        Ok(PgExecutor::acquire(&self.binding).await?)
    }
}

#[async_trait]
impl CategoryRepository for PgCategoryRepository {
    async fn create(&self, category: &NewCategory) -> Result<Category> {
        let mut executor = self.executor().await?;
        let result = sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (name, description, sort_order)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, sort_order, created_at, updated_at
            "#,
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.sort_order)
        .fetch_one(executor.conn())
        .await;

        match result {
            Ok(created) => Ok(created),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(CatalogError::CategoryNameTaken(category.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: i64) -> Result<Option<Category>> {
        let mut executor = self.executor().await?;
        let category = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, name, description, sort_order, created_at, updated_at
            FROM categories
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor.conn())
        .await?;

        Ok(category)
    }

    async fn list(&self) -> Result<Vec<Category>> {
        let mut executor = self.executor().await?;
        let categories = sqlx::query_as::<_, Category>(
            r#"
            SELECT id, name, description, sort_order, created_at, updated_at
            FROM categories
            ORDER BY sort_order, id
            "#,
        )
        .fetch_all(executor.conn())
        .await?;

        Ok(categories)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut executor = self.executor().await?;
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(executor.conn())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
