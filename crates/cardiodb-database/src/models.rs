//! 集合名称与查询条件

use bson::{doc, Bson, Document};
use cardiodb_core::SeriesKey;

pub const PATIENT_COLLECTION: &str = "patient";
pub const MODELS_COLLECTION: &str = "models";
pub const IMAGING_COLLECTION: &str = "imaging";
pub const COHORT_COLLECTION: &str = "patient-cohort";

/// 患者身份查询条件
///
/// 指定序列时按 `internal_info` 整体匹配，序列必须完全相等；
/// 未指定序列时只按 `internal_id` 匹配。
pub fn patient_identity_filter(internal_id: i64, series: Option<&SeriesKey>) -> Document {
    match series {
        Some(series) => doc! {
            "internal_info": {
                "internal_id": internal_id,
                "series": series.to_bson(),
            }
        },
        None => doc! { "internal_info.internal_id": internal_id },
    }
}

/// 按 `_id` 查询
pub fn id_filter(id: impl Into<Bson>) -> Document {
    doc! { "_id": id.into() }
}
