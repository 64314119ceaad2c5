//! 人口学信息更新

use crate::models::*;
use crate::queries::DatabaseQueries;
use crate::store::DocumentStore;
use bson::doc;
use cardiodb_core::utils::{calculate_bmi, calculate_mosteller_bsa};
use cardiodb_core::{CardioError, DemographicsUpdate, PatientRecord, Result};

impl<'a> DatabaseQueries<'a> {
    // ========== 人口学相关操作 ==========

    /// 更新患者的人口学信息，作用于该 internal_id 的全部记录
    ///
    /// 写入前先校验全部字段。身高或体重变化时，若另一项已存在则重新计算
    /// BMI 和 BSA，否则派生字段保持不变。返回匹配的记录数。
    pub async fn update_demographics(
        &self,
        internal_id: i64,
        update: &DemographicsUpdate,
    ) -> Result<u64> {
        update.validate()?;
        if update.is_empty() {
            return Ok(0);
        }

        let store = self.pool.pool();
        let filter = doc! { "internal_info.internal_id": internal_id };
        let matched = store
            .update_many(
                PATIENT_COLLECTION,
                filter.clone(),
                doc! { "$set": update.to_set_document() },
            )
            .await?;
        if matched == 0 {
            return Err(CardioError::NotFound(format!("patient {}", internal_id)));
        }

        if update.height.is_some() || update.weight.is_some() {
            let stored = store
                .find_one(PATIENT_COLLECTION, filter.clone())
                .await?
                .ok_or_else(|| CardioError::NotFound(format!("patient {}", internal_id)))?;
            let stored = PatientRecord::try_from(stored)?;

            let bmi = calculate_bmi(stored.weight, stored.height);
            let bsa = calculate_mosteller_bsa(stored.weight, stored.height);
            if let (Some(bmi), Some(bsa)) = (bmi, bsa) {
                store
                    .update_many(
                        PATIENT_COLLECTION,
                        filter,
                        doc! { "$set": { "bmi": bmi, "bsa": bsa } },
                    )
                    .await?;
                tracing::debug!("Patient {}: bmi={} bsa={}", internal_id, bmi, bsa);
            }
        }

        tracing::info!(
            "Updated demographics of patient {} ({} record(s))",
            internal_id,
            matched
        );
        Ok(matched)
    }
}
