//! 导入目录结构
//!
//! 按序列导入时：
//!
//! ```text
//! <root>/00122/SER00001/{patient,model,imaging}_collection.json
//! <root>/00122/SER00002/...
//! ```
//!
//! 按 internal_id 导入时：
//!
//! ```text
//! <root>/00122/{patient,model,imaging}_collection.json
//! ```

use cardiodb_core::{CardioError, Result, SeriesKey};
use cardiodb_database::seed::load_json_document;
use std::path::{Path, PathBuf};

pub const PATIENT_FILE: &str = "patient_collection.json";
pub const MODEL_FILE: &str = "model_collection.json";
pub const IMAGING_FILE: &str = "imaging_collection.json";

/// 待导入患者的选择方式
#[derive(Debug, Clone, PartialEq)]
pub enum UploadSelection {
    /// (internal_id, 序列) 列表，使用按序列的目录结构
    Series(Vec<(i64, SeriesKey)>),
    /// internal_id 列表，使用扁平目录结构，序列从患者文档读取
    InternalIds(Vec<i64>),
}

impl UploadSelection {
    pub fn is_empty(&self) -> bool {
        match self {
            UploadSelection::Series(items) => items.is_empty(),
            UploadSelection::InternalIds(ids) => ids.is_empty(),
        }
    }
}

/// 单个患者的导入目录
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEntry {
    pub internal_id: i64,
    pub series: Option<SeriesKey>,
    pub dir: PathBuf,
}

impl UploadEntry {
    pub fn patient_file(&self) -> PathBuf {
        self.dir.join(PATIENT_FILE)
    }

    pub fn model_file(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn imaging_file(&self) -> PathBuf {
        self.dir.join(IMAGING_FILE)
    }
}

/// 患者目录名，internal_id 补零到 5 位
pub fn patient_dir_name(internal_id: i64) -> String {
    format!("{:05}", internal_id)
}

/// 将选择解析为导入目录列表
pub fn resolve_entries(root: &Path, selection: &UploadSelection) -> Result<Vec<UploadEntry>> {
    match selection {
        UploadSelection::Series(items) => items
            .iter()
            .map(|(internal_id, series)| {
                let SeriesKey::Single(name) = series else {
                    return Err(CardioError::Validation(format!(
                        "series pair {} has no directory; upload patient {} by internal id",
                        series, internal_id
                    )));
                };
                Ok(UploadEntry {
                    internal_id: *internal_id,
                    series: Some(series.clone()),
                    dir: root.join(patient_dir_name(*internal_id)).join(name),
                })
            })
            .collect(),
        UploadSelection::InternalIds(ids) => ids
            .iter()
            .map(|internal_id| flat_entry(root, *internal_id))
            .collect(),
    }
}

fn flat_entry(root: &Path, internal_id: i64) -> Result<UploadEntry> {
    let dir = root.join(patient_dir_name(internal_id));
    if !dir.is_dir() {
        return Err(CardioError::MissingFile(dir));
    }

    for entry in std::fs::read_dir(&dir)? {
        if entry?.file_type()?.is_dir() {
            return Err(CardioError::Validation(format!(
                "Directories were found in {}. Provide a series list.",
                dir.display()
            )));
        }
    }

    let patient = load_json_document(&dir.join(PATIENT_FILE))?;
    let info = patient.get_document("internal_info").ok();
    let series = match info.and_then(|i| i.get("series")) {
        Some(value) => SeriesKey::from_bson(value)?,
        None => None,
    };
    if info.and_then(|i| i.get("internal_id")).is_none() {
        tracing::warn!("{} has no internal_info.internal_id", dir.display());
    }

    Ok(UploadEntry {
        internal_id,
        series,
        dir,
    })
}
