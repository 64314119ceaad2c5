//! JSON 文档载入
//!
//! 文件内容按扩展 JSON 解析，支持 `{"$oid": ...}`、`{"$date": ...}` 等写法。

use crate::store::DocumentStore;
use bson::{Bson, Document};
use cardiodb_core::{CardioError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

pub const CREATION_FIELD: &str = "datetime_creation";

/// 读取 JSON 文件，顶层可以是对象或对象数组
pub fn load_json_documents(path: &Path) -> Result<Vec<Document>> {
    if !path.exists() {
        return Err(CardioError::MissingFile(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let bson = Bson::try_from(value).map_err(|e| {
        CardioError::Bson(format!("{}: {}", path.display(), e))
    })?;

    match bson {
        Bson::Document(doc) => Ok(vec![doc]),
        Bson::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(doc),
                other => Err(CardioError::Validation(format!(
                    "{}: expected JSON objects, found {}",
                    path.display(),
                    other
                ))),
            })
            .collect(),
        other => Err(CardioError::Validation(format!(
            "{}: expected a JSON object or array, found {}",
            path.display(),
            other
        ))),
    }
}

/// 读取单个 JSON 对象
pub fn load_json_document(path: &Path) -> Result<Document> {
    let mut docs = load_json_documents(path)?;
    match docs.len() {
        1 => Ok(docs.remove(0)),
        n => Err(CardioError::Validation(format!(
            "{}: expected exactly one JSON object, found {}",
            path.display(),
            n
        ))),
    }
}

/// 写入创建时间，已有则保留
pub fn stamp_creation(doc: &mut Document, now: DateTime<Utc>) {
    if !doc.contains_key(CREATION_FIELD) {
        doc.insert(
            CREATION_FIELD,
            bson::DateTime::from_millis(now.timestamp_millis()),
        );
    }
}

/// 从 `<seed_dir>/test_<collection>.json` 载入测试数据，缺失文件跳过
pub async fn seed_collections(
    store: &dyn DocumentStore,
    seed_dir: &Path,
    collections: &[String],
) -> Result<usize> {
    let now = Utc::now();
    let mut inserted = 0;

    for collection in collections {
        let path = seed_dir.join(format!("test_{}.json", collection));
        let docs = match load_json_documents(&path) {
            Ok(docs) => docs,
            Err(CardioError::MissingFile(_)) => {
                tracing::debug!("No seed file for collection '{}'", collection);
                continue;
            }
            Err(e) => return Err(e),
        };

        for mut doc in docs {
            stamp_creation(&mut doc, now);
            store.insert_one(collection, doc).await?;
            inserted += 1;
        }
        tracing::info!("Seeded collection '{}' from {}", collection, path.display());
    }

    Ok(inserted)
}
