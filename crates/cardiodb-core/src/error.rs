//! 错误定义模块

use std::path::PathBuf;
use thiserror::Error;

/// 系统统一错误类型
#[derive(Error, Debug)]
pub enum CardioError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("BSON转换错误: {0}")]
    Bson(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("文件不存在: {}", .0.display())]
    MissingFile(PathBuf),

    /// 同一身份匹配到多条患者记录，属于数据损坏，不可恢复
    #[error("患者记录不唯一: internal_id={internal_id}, series={series}, 匹配 {matches} 条")]
    AmbiguousPatient {
        internal_id: i64,
        series: String,
        matches: usize,
    },

    #[error("患者已存在: internal_id={internal_id}, series={series}")]
    DuplicatePatient { internal_id: i64, series: String },
}

impl From<bson::de::Error> for CardioError {
    fn from(err: bson::de::Error) -> Self {
        CardioError::Bson(err.to_string())
    }
}

impl From<bson::ser::Error> for CardioError {
    fn from(err: bson::ser::Error) -> Self {
        CardioError::Bson(err.to_string())
    }
}

/// 系统统一结果类型
pub type Result<T> = std::result::Result<T, CardioError>;
