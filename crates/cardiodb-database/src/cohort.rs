//! 患者队列操作

use crate::models::*;
use crate::queries::DatabaseQueries;
use crate::store::{inserted_object_id, DocumentStore};
use bson::oid::ObjectId;
use bson::{doc, Bson};
use cardiodb_core::{CardioError, Cohort, CohortDimensions, PatientRecord, Result};
use chrono::Utc;

impl<'a> DatabaseQueries<'a> {
    // ========== 队列相关操作 ==========

    /// 创建空队列
    pub async fn create_cohort(&self, cohort_name: &str) -> Result<Cohort> {
        let document = doc! {
            "cohort_name": cohort_name,
            "patient_ids": [],
            "number_patients": 0,
            "height": { "min": Bson::Null, "max": Bson::Null },
            "weight": { "min": Bson::Null, "max": Bson::Null },
            "datetime_creation": bson::DateTime::from_millis(Utc::now().timestamp_millis()),
        };
        let id = self.pool.pool().insert_one(COHORT_COLLECTION, document).await?;
        let id = inserted_object_id(id)?;

        tracing::info!("Created cohort '{}' ({})", cohort_name, id);
        self.require_cohort(&id).await
    }

    /// 按名称查询队列
    pub async fn get_cohorts_by_name(&self, cohort_name: &str) -> Result<Vec<Cohort>> {
        self.pool
            .pool()
            .find(COHORT_COLLECTION, doc! { "cohort_name": cohort_name })
            .await?
            .into_iter()
            .map(Cohort::try_from)
            .collect()
    }

    /// 按 `_id` 查询队列
    pub async fn get_cohort(&self, cohort_id: &ObjectId) -> Result<Option<Cohort>> {
        self.pool
            .pool()
            .find_one(COHORT_COLLECTION, id_filter(*cohort_id))
            .await?
            .map(Cohort::try_from)
            .transpose()
    }

    async fn require_cohort(&self, cohort_id: &ObjectId) -> Result<Cohort> {
        self.get_cohort(cohort_id)
            .await?
            .ok_or_else(|| CardioError::NotFound(format!("cohort {}", cohort_id)))
    }

    /// 向队列添加患者，返回队列全部患者ID
    ///
    /// 写入前先确认每个患者文档存在，新成员的身高体重并入队列已有范围。
    pub async fn add_patients_to_cohort(
        &self,
        cohort_id: &ObjectId,
        patient_ids: &[String],
    ) -> Result<Vec<String>> {
        self.require_cohort(cohort_id).await?;
        let mut members = Vec::with_capacity(patient_ids.len());
        for id in patient_ids {
            members.push(self.member_dimensions(id).await?);
        }

        let store = self.pool.pool();
        store
            .update_one(
                COHORT_COLLECTION,
                id_filter(*cohort_id),
                doc! { "$addToSet": { "patient_ids": { "$each": patient_ids.to_vec() } } },
            )
            .await?;

        let cohort = self.require_cohort(cohort_id).await?;
        store
            .update_one(
                COHORT_COLLECTION,
                id_filter(*cohort_id),
                doc! { "$set": { "number_patients": cohort.patient_ids.len() as i64 } },
            )
            .await?;

        let mut dimensions = cohort.dimensions;
        for (height, weight) in members {
            dimensions.include(height, weight);
        }
        self.write_dimensions(cohort_id, &dimensions).await?;

        tracing::info!(
            "Added {} patient(s) to cohort {} ({} members)",
            patient_ids.len(),
            cohort_id,
            cohort.patient_ids.len()
        );
        Ok(self.require_cohort(cohort_id).await?.patient_ids)
    }

    /// 根据全部成员重新计算队列身高体重范围
    pub async fn recompute_cohort_dimensions(&self, cohort_id: &ObjectId) -> Result<Cohort> {
        let cohort = self.require_cohort(cohort_id).await?;

        let mut members = Vec::with_capacity(cohort.patient_ids.len());
        for id in &cohort.patient_ids {
            members.push(self.member_dimensions(id).await?);
        }
        let dimensions = CohortDimensions::from_members(members);
        self.write_dimensions(cohort_id, &dimensions).await?;

        tracing::info!(
            "Recomputed dimensions of cohort {} from {} members",
            cohort_id,
            cohort.patient_ids.len()
        );
        self.require_cohort(cohort_id).await
    }

    async fn member_dimensions(&self, patient_id: &str) -> Result<(Option<f64>, Option<f64>)> {
        let oid = parse_patient_id(patient_id)?;
        let doc = self
            .pool
            .pool()
            .find_one(PATIENT_COLLECTION, id_filter(oid))
            .await?
            .ok_or_else(|| CardioError::NotFound(format!("patient document {}", patient_id)))?;
        let patient = PatientRecord::try_from(doc)?;
        Ok((patient.height, patient.weight))
    }

    async fn write_dimensions(
        &self,
        cohort_id: &ObjectId,
        dimensions: &CohortDimensions,
    ) -> Result<()> {
        self.pool
            .pool()
            .update_one(
                COHORT_COLLECTION,
                id_filter(*cohort_id),
                doc! { "$set": dimensions.to_set_document() },
            )
            .await?;
        Ok(())
    }
}

fn parse_patient_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id)
        .map_err(|e| CardioError::Validation(format!("invalid patient id '{}': {}", id, e)))
}
