//! 数据库查询操作
//!
//! 患者身份解析、影像与模型文档访问。队列和人口学操作分别位于
//! `cohort.rs` 与 `demographics.rs`。

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::DocumentStore;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use cardiodb_core::models::{bson_as_f64, bson_as_i64};
use cardiodb_core::utils::pretty_documents;
use cardiodb_core::{
    CardioError, Landmark, ModelEntry, PatientRecord, Result, SeriesKey, SubModel,
};
use std::collections::BTreeMap;

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pub(crate) pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    // ========== 患者相关操作 ==========

    /// 按身份查找患者
    ///
    /// 序列对先按给定顺序查找，未找到再交换顺序查找。
    /// 匹配到多条记录时立即返回 `AmbiguousPatient`，不再重试。
    pub async fn find_patient(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
    ) -> Result<Option<PatientRecord>> {
        if let Some(found) = self.find_patient_exact(internal_id, series).await? {
            return Ok(Some(found));
        }

        match series.and_then(SeriesKey::reversed) {
            Some(reversed) => {
                tracing::debug!(
                    "Patient {} not found with series {}, retrying with {}",
                    internal_id,
                    series.map(ToString::to_string).unwrap_or_default(),
                    reversed
                );
                self.find_patient_exact(internal_id, Some(&reversed)).await
            }
            None => Ok(None),
        }
    }

    async fn find_patient_exact(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
    ) -> Result<Option<PatientRecord>> {
        let filter = patient_identity_filter(internal_id, series);
        let mut docs = self.pool.pool().find(PATIENT_COLLECTION, filter).await?;

        if docs.len() > 1 {
            tracing::error!(
                "More than one patient entry found for internal_id {}:\n{}",
                internal_id,
                pretty_documents(&docs)
            );
            return Err(CardioError::AmbiguousPatient {
                internal_id,
                series: series.map(ToString::to_string).unwrap_or_else(|| "-".to_string()),
                matches: docs.len(),
            });
        }

        docs.pop().map(PatientRecord::try_from).transpose()
    }

    /// 按身份获取患者，不存在时返回 `NotFound`
    pub async fn get_patient(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
    ) -> Result<PatientRecord> {
        self.find_patient(internal_id, series).await?.ok_or_else(|| {
            CardioError::NotFound(format!(
                "patient {} (series {})",
                internal_id,
                series.map(ToString::to_string).unwrap_or_else(|| "-".to_string())
            ))
        })
    }

    /// 按 `_id` 获取患者
    pub async fn get_patient_by_id(&self, id: &ObjectId) -> Result<Option<PatientRecord>> {
        self.pool
            .pool()
            .find_one(PATIENT_COLLECTION, id_filter(*id))
            .await?
            .map(PatientRecord::try_from)
            .transpose()
    }

    /// 列出所有患者的身份，按 internal_id 排序
    pub async fn list_patients(&self) -> Result<BTreeMap<i64, Option<SeriesKey>>> {
        let docs = self.pool.pool().find(PATIENT_COLLECTION, doc! {}).await?;

        let mut patients = BTreeMap::new();
        for doc in docs {
            let Ok(info) = doc.get_document("internal_info") else {
                continue;
            };
            let Some(internal_id) = info.get("internal_id").and_then(bson_as_i64) else {
                continue;
            };
            let series = match info.get("series") {
                Some(value) => SeriesKey::from_bson(value)?,
                None => None,
            };
            patients.insert(internal_id, series);
        }
        Ok(patients)
    }

    // ========== 影像相关操作 ==========

    /// 获取患者的影像文档
    pub async fn get_patient_imaging(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
    ) -> Result<Option<Document>> {
        let patient = self.get_patient(internal_id, series).await?;
        let Some(imaging_ref) = patient.imaging_data else {
            return Err(CardioError::NotFound(format!(
                "imaging reference for patient {}",
                internal_id
            )));
        };

        let key = match imaging_ref {
            Bson::String(s) => match ObjectId::parse_str(&s) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => Bson::String(s),
            },
            other => other,
        };
        self.pool.pool().find_one(IMAGING_COLLECTION, id_filter(key)).await
    }

    // ========== 模型相关操作 ==========

    async fn models_id(&self, internal_id: i64, series: Option<&SeriesKey>) -> Result<ObjectId> {
        let patient = self.get_patient(internal_id, series).await?;
        patient.models.ok_or_else(|| {
            CardioError::NotFound(format!("models reference for patient {}", internal_id))
        })
    }

    async fn models_document(&self, models_id: ObjectId) -> Result<Document> {
        self.pool
            .pool()
            .find_one(MODELS_COLLECTION, id_filter(models_id))
            .await?
            .ok_or_else(|| CardioError::NotFound(format!("models document {}", models_id)))
    }

    /// 获取患者的模型文档
    pub async fn get_patient_models(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
    ) -> Result<Document> {
        let models_id = self.models_id(internal_id, series).await?;
        self.models_document(models_id).await
    }

    /// 获取患者的模型列表
    pub async fn get_patient_model_list(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
    ) -> Result<Vec<ModelEntry>> {
        let doc = self.get_patient_models(internal_id, series).await?;
        match doc.get("models") {
            Some(models @ Bson::Array(_)) => Ok(bson::from_bson(models.clone())?),
            _ => Ok(Vec::new()),
        }
    }

    /// 替换患者的模型列表
    pub async fn update_patient_model_list(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
        models: &[ModelEntry],
    ) -> Result<Document> {
        let models_id = self.models_id(internal_id, series).await?;
        let value = bson::to_bson(models)?;
        self.pool
            .pool()
            .update_one(
                MODELS_COLLECTION,
                id_filter(models_id),
                doc! { "$set": { "models": value } },
            )
            .await?;

        tracing::info!(
            "Replaced model list of patient {} ({} entries)",
            internal_id,
            models.len()
        );
        self.models_document(models_id).await
    }

    /// 向指定时间点追加子模型
    pub async fn append_blobs_to_submodel(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
        timestamp: f64,
        blobs: &[SubModel],
    ) -> Result<Document> {
        let blobs = bson::to_bson(blobs)?;
        let Bson::Array(blobs) = blobs else {
            return Err(CardioError::Bson("sub-models must serialize to an array".to_string()));
        };

        self.modify_model_entries(internal_id, series, timestamp, "sub_models", |items| {
            items.extend(blobs.iter().cloned())
        })
        .await
    }

    /// 向指定时间点追加标志点
    pub async fn append_landmarks_to_model(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
        timestamp: f64,
        landmark: &Landmark,
    ) -> Result<Document> {
        let landmark = bson::to_bson(landmark)?;

        self.modify_model_entries(internal_id, series, timestamp, "landmarks", |items| {
            items.push(landmark.clone())
        })
        .await
    }

    /// 对时间点匹配的每个模型条目修改其数组字段，然后整体写回
    async fn modify_model_entries<F>(
        &self,
        internal_id: i64,
        series: Option<&SeriesKey>,
        timestamp: f64,
        field: &str,
        mut modify: F,
    ) -> Result<Document>
    where
        F: FnMut(&mut Vec<Bson>) + Send,
    {
        let models_id = self.models_id(internal_id, series).await?;
        let mut doc = self.models_document(models_id).await?;

        let mut touched = 0;
        if let Ok(entries) = doc.get_array_mut("models") {
            for entry in entries.iter_mut() {
                let Bson::Document(entry) = entry else {
                    continue;
                };
                if entry.get("timestamp").and_then(bson_as_f64) != Some(timestamp) {
                    continue;
                }
                let items = entry
                    .entry(field.to_string())
                    .or_insert_with(|| Bson::Array(Vec::new()));
                let Bson::Array(items) = items else {
                    return Err(CardioError::Validation(format!(
                        "model entry field '{}' is not an array",
                        field
                    )));
                };
                modify(items);
                touched += 1;
            }
        }

        if touched == 0 {
            return Err(CardioError::NotFound(format!(
                "model entry at timestamp {} for patient {}",
                timestamp, internal_id
            )));
        }

        let models = doc.get("models").cloned().unwrap_or(Bson::Null);
        self.pool
            .pool()
            .update_one(
                MODELS_COLLECTION,
                id_filter(models_id),
                doc! { "$set": { "models": models } },
            )
            .await?;

        tracing::info!(
            "Updated '{}' of patient {} at timestamp {}",
            field,
            internal_id,
            timestamp
        );
        self.models_document(models_id).await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::io::Write;

    fn pair(a: &str, b: &str) -> SeriesKey {
        SeriesKey::Pair(a.to_string(), b.to_string())
    }

    #[tokio::test]
    async fn test_find_patient_by_identity() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let with_series = queries
            .get_patient(850, Some(&SeriesKey::from("SER00002")))
            .await
            .unwrap();
        let without_series = queries.get_patient(850, None).await.unwrap();
        assert_eq!(with_series, without_series);
        assert_eq!(with_series.age, Some(46.0));
        assert_eq!(with_series.document.get_i32("ed_timestamp").unwrap(), 2);

        let missing = queries.find_patient(999, None).await.unwrap();
        assert!(missing.is_none());
        assert!(matches!(
            queries.get_patient(999, None).await,
            Err(CardioError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_series_pair_is_order_insensitive() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let forward = queries
            .get_patient(740, Some(&pair("SER00008", "SER00009")))
            .await
            .unwrap();
        let backward = queries
            .get_patient(740, Some(&pair("SER00009", "SER00008")))
            .await
            .unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.age, Some(83.0));
    }

    #[tokio::test]
    async fn test_ambiguous_lookup_is_fatal() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let result = queries.find_patient(843, None).await;
        assert!(matches!(
            result,
            Err(CardioError::AmbiguousPatient { internal_id: 843, matches: 2, .. })
        ));

        // 指定序列后可以唯一确定
        let single = queries
            .get_patient(843, Some(&SeriesKey::from("SER00005")))
            .await
            .unwrap();
        assert_eq!(single.series(), Some(&SeriesKey::from("SER00005")));
        let paired = queries
            .get_patient(843, Some(&pair("SER00009", "SER00005")))
            .await
            .unwrap();
        assert_eq!(paired.series(), Some(&pair("SER00005", "SER00009")));
    }

    #[tokio::test]
    async fn test_list_patients() {
        let pool = seeded_pool().await;
        let patients = DatabaseQueries::new(&pool).list_patients().await.unwrap();

        let ids: Vec<i64> = patients.keys().copied().collect();
        assert_eq!(ids, vec![663, 740, 843, 850]);
        assert_eq!(patients[&663], Some(SeriesKey::from("SER00302")));
        assert_eq!(patients[&740], Some(pair("SER00008", "SER00009")));
        assert_eq!(patients[&843], Some(pair("SER00005", "SER00009")));
    }

    #[tokio::test]
    async fn test_get_patient_imaging_and_models() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let imaging = queries.get_patient_imaging(850, None).await.unwrap().unwrap();
        assert_eq!(imaging.get_str("blob").unwrap(), "v-patients/00850/ct.nii.gz");
        assert!(matches!(
            queries.get_patient_imaging(663, None).await,
            Err(CardioError::NotFound(_))
        ));

        let models = queries
            .get_patient_models(740, Some(&pair("SER00009", "SER00008")))
            .await
            .unwrap();
        assert_eq!(models.get_object_id("_id").unwrap().to_hex(), PAT740_MODELS);

        let list = queries.get_patient_model_list(740, None).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].timestamp, 0.82);
        assert_eq!(list[1].timestamp, 0.40);
    }

    #[tokio::test]
    async fn test_update_patient_model_list() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let models = vec![ModelEntry {
            timestamp: 2.0,
            sub_models: vec![SubModel {
                name: "Right Atrium with SVC and IVC".to_string(),
                blob: "v-patients/00850/dec_models/pat850-ser002-RA_SVC_IVC.stl".to_string(),
                extra: doc! { "color": "#4f81bd", "visible": true },
            }],
            landmarks: vec![],
        }];
        queries
            .update_patient_model_list(850, Some(&SeriesKey::from("SER00002")), &models)
            .await
            .unwrap();
        assert_eq!(queries.get_patient_model_list(850, None).await.unwrap(), models);

        // 子模型的附加字段写入后保留
        let stored = queries.get_patient_models(850, None).await.unwrap();
        let sub_model = stored.get_array("models").unwrap()[0]
            .as_document()
            .unwrap()
            .get_array("sub_models")
            .unwrap()[0]
            .as_document()
            .unwrap()
            .clone();
        assert_eq!(sub_model.get_str("color").unwrap(), "#4f81bd");
        assert!(sub_model.get_bool("visible").unwrap());

        assert!(matches!(
            queries.update_patient_model_list(843, None, &models).await,
            Err(CardioError::AmbiguousPatient { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_blobs_to_submodel() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let before = queries.get_patient_model_list(663, None).await.unwrap();
        let blobs = vec![
            SubModel {
                name: "Sternum".to_string(),
                blob: "v-patients/00663/dec_models/sternum.stl".to_string(),
                extra: Document::new(),
            },
            SubModel {
                name: "Lungs".to_string(),
                blob: "v-patients/00663/dec_models/lungs.stl".to_string(),
                extra: Document::new(),
            },
        ];
        queries
            .append_blobs_to_submodel(663, Some(&SeriesKey::from("SER00302")), 0.9, &blobs)
            .await
            .unwrap();

        let after = queries.get_patient_model_list(663, None).await.unwrap();
        assert_eq!(after[0], before[0]);
        let mut expected = before[1].sub_models.clone();
        expected.extend(blobs.clone());
        assert_eq!(after[1].sub_models, expected);

        assert!(matches!(
            queries.append_blobs_to_submodel(663, None, 0.5, &blobs).await,
            Err(CardioError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_append_landmarks_to_model() {
        let pool = seeded_pool().await;
        let queries = DatabaseQueries::new(&pool);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc").unwrap();
        writeln!(file, "1,84.69594,-32.78431,484.6335,0,0,0,1,1,1,0,F-1,").unwrap();

        let landmark =
            Landmark::from_fcsv(file.path(), "LV Apex", "LV Apex", "marker_point").unwrap();
        queries
            .append_landmarks_to_model(850, None, 2.0, &landmark)
            .await
            .unwrap();

        let list = queries.get_patient_model_list(850, None).await.unwrap();
        let entry = list.iter().find(|m| m.timestamp == 2.0).unwrap();
        assert_eq!(entry.landmarks, vec![landmark]);
        assert_eq!(entry.landmarks[0].value, vec![[84.69594, -32.78431, 484.6335]]);
    }
}
