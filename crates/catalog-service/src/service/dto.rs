//! 服务层数据传输对象

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Resource;

/// 上传请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadRequest {
    pub fn new(original_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            original_name: original_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// 资源元数据及内容
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub resource: Resource,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// 创建分类请求
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "分类名称长度必须在 1-100 之间"))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    /// 已上传的临时资源 ID，创建成功后转为分类图片
    #[serde(default)]
    pub image_ids: Vec<String>,
}
