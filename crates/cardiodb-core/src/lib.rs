//! # cardiodb Core
//!
//! 心脏建模数据系统的核心模块，提供数据模型、错误定义、队列范围聚合和通用工具。

pub mod aggregate;
pub mod error;
pub mod models;
pub mod utils;

pub use error::{CardioError, Result};
pub use models::*;
