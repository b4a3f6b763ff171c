//! 数据模型

mod category;
mod resource;

pub use category::{CATEGORY_OWNER_TYPE, Category, CategoryDetail, NewCategory};
pub use resource::{Resource, ResourceState, storage_name};
