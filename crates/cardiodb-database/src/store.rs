//! 文档存储接口
//!
//! 查询过滤器为按路径（可含 `.`）的等值匹配，嵌入文档整体比较；
//! 更新仅使用 `$set` 与 `$addToSet`（可带 `$each`）。

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use cardiodb_core::{CardioError, Result};
use std::sync::Arc;

/// 文档数据库操作接口
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 查询全部匹配文档
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>>;

    /// 查询第一个匹配文档
    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>>;

    /// 插入文档，返回 `_id`
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson>;

    /// 更新第一个匹配文档，返回匹配数
    async fn update_one(&self, collection: &str, filter: Document, update: Document) -> Result<u64>;

    /// 更新全部匹配文档，返回匹配数
    async fn update_many(&self, collection: &str, filter: Document, update: Document)
        -> Result<u64>;

    async fn list_collection_names(&self) -> Result<Vec<String>>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// 将插入返回的 `_id` 转为 ObjectId
pub fn inserted_object_id(id: Bson) -> Result<ObjectId> {
    match id {
        Bson::ObjectId(oid) => Ok(oid),
        other => Err(CardioError::Database(format!(
            "expected ObjectId for inserted document, got {}",
            other
        ))),
    }
}
