//! 进程内文档存储
//!
//! 用于 `inmemory` 环境和测试。数值类型按值比较，嵌入文档比较不依赖字段顺序。

use crate::store::DocumentStore;
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use cardiodb_core::models::bson_as_f64;
use cardiodb_core::{CardioError, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 内存文档存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        many: bool,
    ) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut matched = 0;
        for doc in docs.iter_mut() {
            if !matches(doc, &filter)? {
                continue;
            }
            apply_update(doc, &update)?;
            matched += 1;
            if !many {
                break;
            }
        }
        Ok(matched)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        let mut found = Vec::new();
        for doc in collections.get(collection).into_iter().flatten() {
            if matches(doc, &filter)? {
                found.push(doc.clone());
            }
        }
        Ok(found)
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        let collections = self.collections.read().await;
        for doc in collections.get(collection).into_iter().flatten() {
            if matches(doc, &filter)? {
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let (id, document) = match document.get("_id") {
            Some(id) => {
                if docs.iter().any(|d| d.get("_id").is_some_and(|other| bson_eq(other, id))) {
                    return Err(CardioError::Database(format!(
                        "duplicate key in {}: _id {}",
                        collection, id
                    )));
                }
                (id.clone(), document)
            }
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = Document::new();
                with_id.insert("_id", id.clone());
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                (id, with_id)
            }
        };

        docs.push(document);
        Ok(id)
    }

    async fn update_one(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        self.update(collection, filter, update, false).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<u64> {
        self.update(collection, filter, update, true).await
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// 判断文档是否满足过滤器
fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    for (path, expected) in filter {
        if path.starts_with('$') {
            return Err(unsupported("query operator", path));
        }
        if let Bson::Document(inner) = expected {
            if let Some(op) = inner.keys().find(|k| k.starts_with('$')) {
                return Err(unsupported("query operator", op));
            }
        }

        let matched = match (resolve(doc, path), expected) {
            (None, Bson::Null) | (Some(Bson::Null), Bson::Null) => true,
            (None, _) => false,
            (Some(Bson::Array(items)), expected) if !matches!(expected, Bson::Array(_)) => {
                items.iter().any(|item| bson_eq(item, expected))
            }
            (Some(actual), expected) => bson_eq(actual, expected),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn resolve<'d>(doc: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// 值比较，数值按值比较
fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| bson_eq(v, w)))
        }
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| bson_eq(v, w))
        }
        _ => match (bson_as_f64(a), bson_as_f64(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

fn apply_update(doc: &mut Document, update: &Document) -> Result<()> {
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(CardioError::Database(format!(
                "update operator {} expects a document",
                op
            )));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    *slot_mut(doc, path)? = value.clone();
                }
            }
            "$addToSet" => {
                for (path, spec) in fields {
                    let values = match spec {
                        Bson::Document(inner) if inner.contains_key("$each") => {
                            match inner.get("$each") {
                                Some(Bson::Array(items)) => items.clone(),
                                _ => {
                                    return Err(CardioError::Database(
                                        "$each expects an array".to_string(),
                                    ))
                                }
                            }
                        }
                        single => vec![single.clone()],
                    };

                    let slot = slot_mut(doc, path)?;
                    if *slot == Bson::Null {
                        *slot = Bson::Array(Vec::new());
                    }
                    let Bson::Array(items) = slot else {
                        return Err(CardioError::Database(format!(
                            "$addToSet target {} is not an array",
                            path
                        )));
                    };
                    for value in values {
                        if !items.iter().any(|item| bson_eq(item, &value)) {
                            items.push(value);
                        }
                    }
                }
            }
            other => return Err(unsupported("update operator", other)),
        }
    }
    Ok(())
}

/// 定位（必要时创建）路径对应的值
fn slot_mut<'d>(doc: &'d mut Document, path: &str) -> Result<&'d mut Bson> {
    let (parent_path, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };

    let mut parent = doc;
    if let Some(parent_path) = parent_path {
        for segment in parent_path.split('.') {
            let entry = parent
                .entry(segment.to_string())
                .or_insert_with(|| Bson::Document(Document::new()));
            if *entry == Bson::Null {
                *entry = Bson::Document(Document::new());
            }
            parent = match entry {
                Bson::Document(inner) => inner,
                _ => {
                    return Err(CardioError::Database(format!(
                        "cannot traverse non-document field '{}' in path {}",
                        segment, path
                    )))
                }
            };
        }
    }

    Ok(parent.entry(leaf.to_string()).or_insert(Bson::Null))
}

fn unsupported(kind: &str, name: &str) -> CardioError {
    CardioError::Database(format!("unsupported {} in memory store: {}", kind, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn test_insert_assigns_object_id() {
        let store = MemoryStore::new();
        let id = store
            .insert_one("patient", doc! { "age": 46 })
            .await
            .unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let found = store.find_one("patient", doc! { "_id": id.clone() }).await.unwrap();
        assert_eq!(found.unwrap().get_i32("age").unwrap(), 46);

        let dup = store.insert_one("patient", doc! { "_id": id }).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_filter_semantics() {
        let store = MemoryStore::new();
        store
            .insert_one(
                "patient",
                doc! { "internal_info": { "internal_id": 843, "series": "SER00005" } },
            )
            .await
            .unwrap();
        store
            .insert_one(
                "patient",
                doc! { "internal_info": { "internal_id": 843, "series": ["SER00005", "SER00009"] } },
            )
            .await
            .unwrap();

        // 嵌入文档整体比较，不同整数类型视为相等
        let exact = store
            .find(
                "patient",
                doc! { "internal_info": { "series": "SER00005", "internal_id": 843_i64 } },
            )
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);

        let by_id = store
            .find("patient", doc! { "internal_info.internal_id": 843_i64 })
            .await
            .unwrap();
        assert_eq!(by_id.len(), 2);

        // 标量匹配数组元素
        let by_element = store
            .find("patient", doc! { "internal_info.series": "SER00009" })
            .await
            .unwrap();
        assert_eq!(by_element.len(), 1);

        let bad = store.find("patient", doc! { "age": { "$gt": 3 } }).await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_set_and_add_to_set() {
        let store = MemoryStore::new();
        let id = store
            .insert_one(
                "patient-cohort",
                doc! { "patient_ids": ["a"], "height": { "min": Bson::Null, "max": Bson::Null } },
            )
            .await
            .unwrap();

        let matched = store
            .update_one(
                "patient-cohort",
                doc! { "_id": id.clone() },
                doc! {
                    "$addToSet": { "patient_ids": { "$each": ["a", "b"] } },
                    "$set": { "height.min": 160.0, "weight.max": 88 },
                },
            )
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let doc = store
            .find_one("patient-cohort", doc! { "_id": id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_array("patient_ids").unwrap().len(), 2);
        assert_eq!(doc.get_document("height").unwrap().get_f64("min").unwrap(), 160.0);
        assert_eq!(doc.get_document("weight").unwrap().get_i32("max").unwrap(), 88);
    }

    #[tokio::test]
    async fn test_update_many_counts_matches() {
        let store = MemoryStore::new();
        for series in ["SER1", "SER2"] {
            store
                .insert_one(
                    "patient",
                    doc! { "internal_info": { "internal_id": 1, "series": series } },
                )
                .await
                .unwrap();
        }

        let matched = store
            .update_many(
                "patient",
                doc! { "internal_info.internal_id": 1 },
                doc! { "$set": { "age": 50 } },
            )
            .await
            .unwrap();
        assert_eq!(matched, 2);
        assert_eq!(
            store.update_many("missing", doc! {}, doc! { "$set": { "a": 1 } }).await.unwrap(),
            0
        );
        assert_eq!(store.list_collection_names().await.unwrap(), vec!["patient"]);
    }
}
