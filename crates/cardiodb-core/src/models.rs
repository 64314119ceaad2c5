//! 核心数据模型定义

use crate::error::{CardioError, Result};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 序列标识：一个患者可能有一个或两个序列
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesKey {
    Single(String),
    Pair(String, String),
}

impl SeriesKey {
    /// 交换序列对的顺序，单序列返回 None
    pub fn reversed(&self) -> Option<SeriesKey> {
        match self {
            SeriesKey::Single(_) => None,
            SeriesKey::Pair(a, b) => Some(SeriesKey::Pair(b.clone(), a.clone())),
        }
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            SeriesKey::Single(s) => Bson::String(s.clone()),
            SeriesKey::Pair(a, b) => Bson::Array(vec![
                Bson::String(a.clone()),
                Bson::String(b.clone()),
            ]),
        }
    }

    /// 从存储值解析，Null 视为未设置
    pub fn from_bson(value: &Bson) -> Result<Option<SeriesKey>> {
        match value {
            Bson::Null => Ok(None),
            Bson::String(s) => Ok(Some(SeriesKey::Single(s.clone()))),
            Bson::Array(items) => match items.as_slice() {
                [Bson::String(a), Bson::String(b)] => {
                    Ok(Some(SeriesKey::Pair(a.clone(), b.clone())))
                }
                _ => Err(CardioError::Validation(format!(
                    "series array must hold exactly two strings, got {:?}",
                    items
                ))),
            },
            other => Err(CardioError::Validation(format!(
                "unsupported series value: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKey::Single(s) => write!(f, "{}", s),
            SeriesKey::Pair(a, b) => write!(f, "[{}, {}]", a, b),
        }
    }
}

impl From<&str> for SeriesKey {
    fn from(value: &str) -> Self {
        SeriesKey::Single(value.to_string())
    }
}

/// 性别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = CardioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            _ => Err(CardioError::Validation(format!(
                "Gender not male/female: {}",
                s
            ))),
        }
    }
}

/// 来源地区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginLocation {
    Europe,
    AsiaPacific,
    NorthSouthAmerica,
    MiddleEastAfrica,
}

impl OriginLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginLocation::Europe => "europe",
            OriginLocation::AsiaPacific => "asia_pacific",
            OriginLocation::NorthSouthAmerica => "north_south_america",
            OriginLocation::MiddleEastAfrica => "middle_east_africa",
        }
    }
}

impl FromStr for OriginLocation {
    type Err = CardioError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "europe" => Ok(OriginLocation::Europe),
            "asia_pacific" => Ok(OriginLocation::AsiaPacific),
            "north_south_america" => Ok(OriginLocation::NorthSouthAmerica),
            "middle_east_africa" => Ok(OriginLocation::MiddleEastAfrica),
            _ => Err(CardioError::Validation(format!(
                "Origin location not in the accepted values/format: {}",
                s
            ))),
        }
    }
}

/// 患者身份信息
#[derive(Debug, Clone, PartialEq)]
pub struct InternalInfo {
    pub internal_id: i64,
    pub series: Option<SeriesKey>,
}

/// 患者记录
///
/// 类型化字段之外的内容保留在 `document` 中。
#[derive(Debug, Clone, PartialEq)]
pub struct PatientRecord {
    pub id: Option<ObjectId>,
    pub internal_info: Option<InternalInfo>,
    pub age: Option<f64>,
    pub gender: Option<Gender>,
    pub height: Option<f64>,                   // cm
    pub weight: Option<f64>,                   // kg
    pub bmi: Option<f64>,
    pub bsa: Option<f64>,
    pub origin_location: Option<OriginLocation>,
    pub models: Option<ObjectId>,              // models 集合文档ID
    pub imaging_data: Option<Bson>,            // imaging 集合文档ID
    pub document: Document,
}

impl PatientRecord {
    pub fn internal_id(&self) -> Option<i64> {
        self.internal_info.as_ref().map(|info| info.internal_id)
    }

    pub fn series(&self) -> Option<&SeriesKey> {
        self.internal_info.as_ref().and_then(|info| info.series.as_ref())
    }
}

impl TryFrom<Document> for PatientRecord {
    type Error = CardioError;

    fn try_from(doc: Document) -> Result<Self> {
        let internal_info = match doc.get("internal_info") {
            Some(Bson::Document(info)) => {
                let internal_id = info
                    .get("internal_id")
                    .and_then(bson_as_i64)
                    .ok_or_else(|| {
                        CardioError::Validation("internal_info.internal_id missing".to_string())
                    })?;
                let series = match info.get("series") {
                    Some(value) => SeriesKey::from_bson(value)?,
                    None => None,
                };
                Some(InternalInfo {
                    internal_id,
                    series,
                })
            }
            _ => None,
        };

        let models = match doc.get("models") {
            Some(value) => object_id_ref(value),
            None => None,
        };

        Ok(PatientRecord {
            id: doc.get_object_id("_id").ok(),
            internal_info,
            age: get_f64(&doc, "age"),
            gender: doc
                .get_str("gender")
                .ok()
                .and_then(|s| s.parse().ok()),
            height: get_f64(&doc, "height"),
            weight: get_f64(&doc, "weight"),
            bmi: get_f64(&doc, "bmi"),
            bsa: get_f64(&doc, "bsa"),
            origin_location: doc
                .get_str("origin_location")
                .ok()
                .and_then(|s| s.parse().ok()),
            models,
            imaging_data: doc.get("imaging_data").filter(|v| **v != Bson::Null).cloned(),
            document: doc,
        })
    }
}

/// 单个时间点的模型条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub timestamp: f64,                        // 心动周期相位 (帧)
    #[serde(default)]
    pub sub_models: Vec<SubModel>,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
}

/// 子模型文件引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubModel {
    pub name: String,
    pub blob: String,
    /// 其余字段原样保留
    #[serde(flatten)]
    pub extra: Document,
}

/// 解剖标志点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub name: String,
    pub value: Vec<[f64; 3]>,
    pub description: String,
    pub type_of_spline: String,
}

/// 数值区间，缺失值为 None
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl DimensionRange {
    pub fn from_bson(value: Option<&Bson>) -> Self {
        match value {
            Some(Bson::Document(doc)) => DimensionRange {
                min: get_f64(doc, "min"),
                max: get_f64(doc, "max"),
            },
            _ => DimensionRange::default(),
        }
    }
}

/// 队列身高体重范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortDimensions {
    pub height: DimensionRange,
    pub weight: DimensionRange,
}

/// 患者队列
#[derive(Debug, Clone, PartialEq)]
pub struct Cohort {
    pub id: ObjectId,
    pub cohort_name: Option<String>,
    pub patient_ids: Vec<String>,
    pub number_patients: usize,
    pub dimensions: CohortDimensions,
    pub document: Document,
}

impl TryFrom<Document> for Cohort {
    type Error = CardioError;

    fn try_from(doc: Document) -> Result<Self> {
        let id = doc
            .get_object_id("_id")
            .map_err(|_| CardioError::Validation("cohort document without _id".to_string()))?;

        let patient_ids = match doc.get("patient_ids") {
            Some(Bson::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Bson::String(s) => Some(s.clone()),
                    Bson::ObjectId(oid) => Some(oid.to_hex()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let number_patients = doc
            .get("number_patients")
            .and_then(bson_as_i64)
            .map(|n| n.max(0) as usize)
            .unwrap_or(patient_ids.len());

        Ok(Cohort {
            id,
            cohort_name: doc.get_str("cohort_name").ok().map(str::to_string),
            patient_ids,
            number_patients,
            dimensions: CohortDimensions {
                height: DimensionRange::from_bson(doc.get("height")),
                weight: DimensionRange::from_bson(doc.get("weight")),
            },
            document: doc,
        })
    }
}

/// 人口学信息更新请求，所有字段均可选
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemographicsUpdate {
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub origin_location: Option<OriginLocation>,
}

impl DemographicsUpdate {
    pub const MAX_AGE: u32 = 120;

    pub fn is_empty(&self) -> bool {
        self.age.is_none()
            && self.gender.is_none()
            && self.height.is_none()
            && self.weight.is_none()
            && self.origin_location.is_none()
    }

    /// 写入前校验全部字段
    pub fn validate(&self) -> Result<()> {
        if let Some(age) = self.age {
            if age > Self::MAX_AGE {
                return Err(CardioError::Validation(format!(
                    "Age not inside the valid range: {}",
                    age
                )));
            }
        }
        for (field, value) in [("height", self.height), ("weight", self.weight)] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(CardioError::Validation(format!(
                        "{} must be a positive number, got {}",
                        field, v
                    )));
                }
            }
        }
        Ok(())
    }

    /// 生成 `$set` 字段
    pub fn to_set_document(&self) -> Document {
        let mut set = Document::new();
        if let Some(age) = self.age {
            set.insert("age", age as i64);
        }
        if let Some(gender) = self.gender {
            set.insert("gender", gender.as_str());
        }
        if let Some(height) = self.height {
            set.insert("height", height);
        }
        if let Some(weight) = self.weight {
            set.insert("weight", weight);
        }
        if let Some(location) = self.origin_location {
            set.insert("origin_location", location.as_str());
        }
        set
    }
}

/// 将任意数值类型读为 f64
pub fn bson_as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

/// 将整数值读为 i64，整值浮点数也接受
pub fn bson_as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

/// 解析 ObjectId 引用，兼容十六进制字符串
pub fn object_id_ref(value: &Bson) -> Option<ObjectId> {
    match value {
        Bson::ObjectId(oid) => Some(*oid),
        Bson::String(s) => match ObjectId::parse_str(s) {
            Ok(oid) => Some(oid),
            Err(_) => {
                tracing::warn!("Ignoring malformed object id reference: {}", s);
                None
            }
        },
        _ => None,
    }
}

fn get_f64(doc: &Document, key: &str) -> Option<f64> {
    doc.get(key).and_then(bson_as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_sub_model_keeps_extra_fields() {
        let raw = doc! { "name": "Aorta", "blob": "v-patients/00663/aorta.stl", "color": "red" };
        let sub_model: SubModel = bson::from_document(raw).unwrap();
        assert_eq!(sub_model.name, "Aorta");
        assert_eq!(sub_model.extra, doc! { "color": "red" });

        let written = bson::to_document(&sub_model).unwrap();
        assert_eq!(written.get_str("color").unwrap(), "red");
        assert_eq!(written.get_str("blob").unwrap(), "v-patients/00663/aorta.stl");
    }

    #[test]
    fn test_series_key_reversed() {
        let pair = SeriesKey::Pair("SER00008".to_string(), "SER00009".to_string());
        assert_eq!(
            pair.reversed(),
            Some(SeriesKey::Pair("SER00009".to_string(), "SER00008".to_string()))
        );
        assert_eq!(SeriesKey::from("SER00002").reversed(), None);
    }

    #[test]
    fn test_series_key_from_bson() {
        assert_eq!(SeriesKey::from_bson(&Bson::Null).unwrap(), None);
        assert_eq!(
            SeriesKey::from_bson(&Bson::String("SER00002".into())).unwrap(),
            Some(SeriesKey::from("SER00002"))
        );
        let pair = bson::bson!(["SER00005", "SER00009"]);
        assert_eq!(
            SeriesKey::from_bson(&pair).unwrap(),
            Some(SeriesKey::Pair("SER00005".into(), "SER00009".into()))
        );
        assert!(SeriesKey::from_bson(&bson::bson!(["A", "B", "C"])).is_err());
        assert!(SeriesKey::from_bson(&Bson::Int32(4)).is_err());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("male".parse::<Gender>().unwrap(), Gender::Male);
        assert!("unknown".parse::<Gender>().is_err());
        assert_eq!(
            "north_south_america".parse::<OriginLocation>().unwrap(),
            OriginLocation::NorthSouthAmerica
        );
        assert!("antarctica".parse::<OriginLocation>().is_err());
    }

    #[test]
    fn test_patient_record_from_document() {
        let models_id = ObjectId::new();
        let doc = doc! {
            "_id": ObjectId::new(),
            "internal_info": { "internal_id": 740, "series": ["SER00008", "SER00009"] },
            "age": 83,
            "gender": "female",
            "height": 160.5,
            "weight": Bson::Null,
            "models": models_id.to_hex(),
            "ed_timestamp": 0.82,
        };

        let record = PatientRecord::try_from(doc).unwrap();
        assert_eq!(record.internal_id(), Some(740));
        assert_eq!(
            record.series(),
            Some(&SeriesKey::Pair("SER00008".into(), "SER00009".into()))
        );
        assert_eq!(record.age, Some(83.0));
        assert_eq!(record.gender, Some(Gender::Female));
        assert_eq!(record.height, Some(160.5));
        assert_eq!(record.weight, None);
        assert_eq!(record.models, Some(models_id));
        assert_eq!(record.document.get_f64("ed_timestamp").unwrap(), 0.82);
    }

    #[test]
    fn test_cohort_from_document_tolerates_missing_bounds() {
        let doc = doc! {
            "_id": ObjectId::new(),
            "cohort_name": "ED Patients",
            "patient_ids": ["5f7f7ee40bf2b2706460424c"],
            "height": { "min": 160, "max": Bson::Null },
        };

        let cohort = Cohort::try_from(doc).unwrap();
        assert_eq!(cohort.number_patients, 1);
        assert_eq!(cohort.dimensions.height.min, Some(160.0));
        assert_eq!(cohort.dimensions.height.max, None);
        assert_eq!(cohort.dimensions.weight, DimensionRange::default());
    }

    #[test]
    fn test_demographics_validation() {
        let update = DemographicsUpdate {
            age: Some(121),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = DemographicsUpdate {
            height: Some(f64::NAN),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = DemographicsUpdate {
            age: Some(63),
            gender: Some(Gender::Male),
            height: Some(200.0),
            weight: Some(93.0),
            origin_location: Some(OriginLocation::NorthSouthAmerica),
        };
        assert!(update.validate().is_ok());
        let set = update.to_set_document();
        assert_eq!(set.get_str("gender").unwrap(), "male");
        assert_eq!(set.get_str("origin_location").unwrap(), "north_south_america");
        assert_eq!(set.get_i64("age").unwrap(), 63);
    }
}
