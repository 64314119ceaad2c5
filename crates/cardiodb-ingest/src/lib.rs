//! # cardiodb 批量导入模块
//!
//! 从目录树读取每个患者的 JSON 文档（患者、模型、影像），写入数据库并可加入队列。

pub mod layout;
pub mod upload;

pub use layout::{UploadSelection, IMAGING_FILE, MODEL_FILE, PATIENT_FILE};
pub use upload::PatientUploader;
