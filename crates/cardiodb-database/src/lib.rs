//! # cardiodb 数据库模块
//!
//! 负责患者记录、影像引用、模型文档和患者队列的存取，提供 MongoDB
//! 与内存两种文档存储后端以及完整的 CRUD 操作。

pub mod cohort;
pub mod config;
pub mod connection;
pub mod demographics;
pub mod memory;
pub mod models;
pub mod mongo;
pub mod queries;
pub mod seed;
pub mod store;

// 重新导出主要类型
pub use config::{Profile, Settings};
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use mongo::MongoStore;
pub use queries::DatabaseQueries;
pub use store::{DocumentStore, SharedStore};
