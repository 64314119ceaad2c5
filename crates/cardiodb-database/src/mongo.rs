//! MongoDB 文档存储

use crate::store::DocumentStore;
use async_trait::async_trait;
use bson::{Bson, Document};
use cardiodb_core::{CardioError, Result};
use futures_util::TryStreamExt;
use mongodb::{Client, Collection, Database};

/// 基于官方驱动的文档存储
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// 连接到指定数据库
    pub async fn connect(conn_str: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(conn_str).await.map_err(db_err)?;
        tracing::info!("Connected to MongoDB database '{}'", database);
        Ok(Self {
            database: client.database(database),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(filter, None)
            .await
            .map_err(db_err)?;
        cursor.try_collect().await.map_err(db_err)
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        self.collection(collection)
            .find_one(filter, None)
            .await
            .map_err(db_err)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        self.collection(collection)
            .insert_one(document, None)
            .await
            .map(|result| result.inserted_id)
            .map_err(db_err)
    }

    async fn update_one(&self, collection: &str, filter: Document, update: Document) -> Result<u64> {
        self.collection(collection)
            .update_one(filter, update, None)
            .await
            .map(|result| result.matched_count)
            .map_err(db_err)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<u64> {
        self.collection(collection)
            .update_many(filter, update, None)
            .await
            .map(|result| result.matched_count)
            .map_err(db_err)
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        self.database
            .list_collection_names(None)
            .await
            .map_err(db_err)
    }
}

fn db_err(err: mongodb::error::Error) -> CardioError {
    CardioError::Database(err.to_string())
}
