//! 分类模型
//!
//! 分类图片是归属类型为 `category` 的资源。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Resource;

/// 分类图片的归属类型
pub const CATEGORY_OWNER_TYPE: &str = "category";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待插入的分类
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
}

/// 分类及其图片
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDetail {
    #[serde(flatten)]
    pub category: Category,
    pub images: Vec<Resource>,
}
