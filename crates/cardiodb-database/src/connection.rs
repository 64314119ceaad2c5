//! 数据库连接管理

use crate::config::{Profile, Settings};
use crate::memory::MemoryStore;
use crate::mongo::MongoStore;
use crate::seed::seed_collections;
use crate::store::{DocumentStore, SharedStore};
use cardiodb_core::Result;
use std::sync::Arc;

/// 数据库连接
pub struct DatabasePool {
    store: SharedStore,
    profile: Profile,
}

impl DatabasePool {
    /// 按环境建立连接，`inmemory` 环境会载入测试数据
    pub async fn connect(settings: &Settings, profile: Profile) -> Result<Self> {
        let store: SharedStore = match profile {
            Profile::Dev | Profile::Deploy => {
                let conn_str = settings.connection_string(profile)?;
                Arc::new(MongoStore::connect(conn_str, &settings.database).await?)
            }
            Profile::InMemory => {
                let store = MemoryStore::new();
                if let Some(seed_dir) = &settings.seed_dir {
                    let count = seed_collections(&store, seed_dir, &settings.collections).await?;
                    tracing::info!("Loaded {} seed documents into in-memory store", count);
                }
                Arc::new(store)
            }
        };

        tracing::info!("Database pool ready (profile: {})", profile);
        Ok(Self { store, profile })
    }

    /// 使用已有存储构造
    pub fn from_store(store: SharedStore, profile: Profile) -> Self {
        Self { store, profile }
    }

    /// 空的内存存储
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()), Profile::InMemory)
    }

    pub fn pool(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }
}
