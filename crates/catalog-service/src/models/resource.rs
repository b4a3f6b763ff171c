//! 资源模型
//!
//! 资源上传后处于临时状态并带有过期时间；归属对象在自己的事务中将其转正，
//! 未转正的资源过期后由清理任务回收。
//!
//! 状态转换只允许：temporary → permanent、temporary → 删除、permanent → 删除。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 资源状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ResourceState {
    /// 临时 - 尚未归属任何对象，过期后被回收
    #[default]
    Temporary,
    /// 永久 - 已归属对象，随对象一起删除
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    /// 存储对象名称
    pub name: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub owner_id: Option<String>,
    pub owner_type: Option<String>,
    pub state: ResourceState,
    /// 仅临时资源有过期时间
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// 创建临时资源
    pub fn new_temporary(
        original_name: &str,
        content_type: Option<String>,
        size_bytes: i64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: storage_name(original_name),
            original_name: original_name.to_string(),
            content_type,
            size_bytes,
            owner_id: None,
            owner_type: None,
            state: ResourceState::Temporary,
            expires_at: Some(now + ttl),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.state == ResourceState::Temporary
    }

    pub fn is_permanent(&self) -> bool {
        self.state == ResourceState::Permanent
    }

    /// 已过期的临时资源，可被清理任务回收
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_temporary() && self.expires_at.is_some_and(|at| at < now)
    }

    pub fn is_owned_by(&self, owner_id: &str, owner_type: &str) -> bool {
        self.owner_id.as_deref() == Some(owner_id) && self.owner_type.as_deref() == Some(owner_type)
    }

    /// 是否可以转正给指定归属对象
    ///
    /// 未过期的临时资源可以转正；已归属同一对象的永久资源视为重复转正。
    pub fn can_promote_to(&self, owner_id: &str, owner_type: &str, now: DateTime<Utc>) -> bool {
        match self.state {
            ResourceState::Temporary => self.expires_at.is_some_and(|at| at > now),
            ResourceState::Permanent => self.is_owned_by(owner_id, owner_type),
        }
    }

    /// 转正：清除过期时间并设置归属
    ///
    /// 调用前需通过 [`Resource::can_promote_to`] 检查。
    pub fn promote(&mut self, owner_id: &str, owner_type: &str, now: DateTime<Utc>) {
        self.state = ResourceState::Permanent;
        self.expires_at = None;
        self.owner_id = Some(owner_id.to_string());
        self.owner_type = Some(owner_type.to_string());
        self.updated_at = now;
    }

    /// 状态与过期时间、归属字段是否一致
    pub fn is_consistent(&self) -> bool {
        match self.state {
            ResourceState::Temporary => self.expires_at.is_some(),
            ResourceState::Permanent => {
                self.expires_at.is_none() && self.owner_id.is_some() && self.owner_type.is_some()
            }
        }
    }
}

/// 生成存储对象名称：随机 ID 加上规范化后的扩展名
pub fn storage_name(original_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    match extension(original_name) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id,
    }
}

fn extension(original_name: &str) -> Option<String> {
    let (stem, ext) = original_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| ext.to_ascii_lowercase())
}
