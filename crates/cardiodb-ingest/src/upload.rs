//! 患者批量导入

use crate::layout::{resolve_entries, UploadEntry, UploadSelection};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use cardiodb_core::{CardioError, Cohort, Result, SeriesKey};
use cardiodb_database::seed::{load_json_document, CREATION_FIELD};
use cardiodb_database::store::inserted_object_id;
use cardiodb_database::{
    DatabasePool, DatabaseQueries, DocumentStore, IMAGING_COLLECTION, MODELS_COLLECTION,
    PATIENT_COLLECTION,
};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// 患者导入器
pub struct PatientUploader<'a> {
    pool: &'a DatabasePool,
    root: PathBuf,
}

impl<'a> PatientUploader<'a> {
    pub fn new(pool: &'a DatabasePool, root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            root: root.into(),
        }
    }

    fn queries(&self) -> DatabaseQueries<'a> {
        DatabaseQueries::new(self.pool)
    }

    /// 导入患者，返回新患者文档ID
    ///
    /// 先检查全部患者均不存在，并读取解析全部文件，再逐个写入模型文档和患者文档。
    pub async fn upload_patients(&self, selection: &UploadSelection) -> Result<Vec<String>> {
        if selection.is_empty() {
            return Err(CardioError::Validation(
                "Provide patient list or internal id list.".to_string(),
            ));
        }

        let entries = resolve_entries(&self.root, selection)?;
        let mut prepared = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if entries[..index].iter().any(|other| same_identity(other, entry)) {
                return Err(CardioError::DuplicatePatient {
                    internal_id: entry.internal_id,
                    series: series_label(entry),
                });
            }
            self.ensure_absent(entry).await?;
            prepared.push(PreparedEntry::load(entry)?);
        }

        let now = Utc::now();
        let mut patient_ids = Vec::with_capacity(prepared.len());
        for item in prepared {
            self.ensure_absent(item.entry).await?;
            let id = self.insert_entry(item, now).await?;
            patient_ids.push(id.to_hex());
        }

        Ok(patient_ids)
    }

    /// 导入患者并加入队列，返回更新后的队列
    pub async fn upload_patients_to_cohort(
        &self,
        cohort_id: &ObjectId,
        selection: &UploadSelection,
    ) -> Result<Cohort> {
        let queries = self.queries();
        if queries.get_cohort(cohort_id).await?.is_none() {
            return Err(CardioError::NotFound(format!("cohort {}", cohort_id)));
        }

        let patient_ids = self.upload_patients(selection).await?;
        queries.add_patients_to_cohort(cohort_id, &patient_ids).await?;
        queries
            .get_cohort(cohort_id)
            .await?
            .ok_or_else(|| CardioError::NotFound(format!("cohort {}", cohort_id)))
    }

    async fn ensure_absent(&self, entry: &UploadEntry) -> Result<()> {
        let existing = self
            .queries()
            .find_patient(entry.internal_id, entry.series.as_ref())
            .await?;
        if existing.is_some() {
            return Err(CardioError::DuplicatePatient {
                internal_id: entry.internal_id,
                series: series_label(entry),
            });
        }
        Ok(())
    }

    async fn insert_entry(&self, item: PreparedEntry<'_>, now: DateTime<Utc>) -> Result<ObjectId> {
        let store = self.pool.pool();
        let PreparedEntry {
            entry,
            mut patient,
            mut model,
            imaging,
        } = item;

        set_creation(&mut model, now);
        let model_id = inserted_object_id(store.insert_one(MODELS_COLLECTION, model).await?)?;

        set_creation(&mut patient, now);
        patient.insert("models", model_id.to_hex());

        if let Some(mut imaging) = imaging {
            set_creation(&mut imaging, now);
            let imaging_id = store.insert_one(IMAGING_COLLECTION, imaging).await?;
            patient.insert("imaging_data", imaging_id);
        }

        let id = inserted_object_id(store.insert_one(PATIENT_COLLECTION, patient).await?)?;
        tracing::info!(
            "Uploaded patient {} (series {}) as {}",
            entry.internal_id,
            series_label(entry),
            id
        );
        Ok(id)
    }
}

/// 已读取并解析的导入条目
struct PreparedEntry<'e> {
    entry: &'e UploadEntry,
    patient: Document,
    model: Document,
    imaging: Option<Document>,
}

impl<'e> PreparedEntry<'e> {
    fn load(entry: &'e UploadEntry) -> Result<Self> {
        for path in [entry.patient_file(), entry.model_file()] {
            if !path.is_file() {
                return Err(CardioError::MissingFile(path));
            }
        }

        let patient = load_json_document(&entry.patient_file())?;
        let model = load_json_document(&entry.model_file())?;

        let has_imaging = matches!(patient.get("imaging_data"), Some(v) if *v != Bson::Null);
        let imaging_file = entry.imaging_file();
        let imaging = if !has_imaging && imaging_file.is_file() {
            Some(load_json_document(&imaging_file)?)
        } else {
            None
        };

        Ok(Self {
            entry,
            patient,
            model,
            imaging,
        })
    }
}

fn same_identity(a: &UploadEntry, b: &UploadEntry) -> bool {
    a.internal_id == b.internal_id
        && (a.series == b.series || a.series.as_ref().and_then(SeriesKey::reversed) == b.series)
}

fn set_creation(doc: &mut Document, now: DateTime<Utc>) {
    doc.insert(
        CREATION_FIELD,
        bson::DateTime::from_millis(now.timestamp_millis()),
    );
}

fn series_label(entry: &UploadEntry) -> String {
    entry
        .series
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string())
}
