//! DetectionLogService - Detection persistence
//!
//! ## Responsibilities
//!
//! - Record detection results to the external store
//!
//! Fire results go to `fire_detections`, helmet results to
//! `helmet_violations`.

use crate::config_store::ModelKind;
use crate::detection_pipeline::DetectionResult;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

/// Detection store
#[async_trait]
pub trait DetectionStore: Send + Sync {
    async fn record(&self, result: &DetectionResult) -> Result<()>;
}

/// PostgreSQL-backed detection store
pub struct DetectionLogService {
    pool: PgPool,
}

impl DetectionLogService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DetectionStore for DetectionLogService {
    async fn record(&self, result: &DetectionResult) -> Result<()> {
        match result.kind {
            ModelKind::Fire => {
                sqlx::query(
                    "INSERT INTO fire_detections (camera_id, detected, confidence) VALUES ($1, $2, $3)",
                )
                .bind(&result.camera_id)
                .bind(result.detected)
                .bind(result.confidence.map(f64::from))
                .execute(&self.pool)
                .await?;
            }
            ModelKind::Helmet => {
                sqlx::query("INSERT INTO helmet_violations (camera_id, detected) VALUES ($1, $2)")
                    .bind(&result.camera_id)
                    .bind(result.detected)
                    .execute(&self.pool)
                    .await?;
            }
        }

        tracing::debug!(
            camera_id = %result.camera_id,
            kind = %result.kind,
            detected = result.detected,
            "Detection recorded"
        );
        Ok(())
    }
}

/// In-memory detection store
#[derive(Default)]
pub struct InMemoryDetectionStore {
    records: RwLock<Vec<DetectionResult>>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DetectionResult> {
        self.records.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl DetectionStore for InMemoryDetectionStore {
    async fn record(&self, result: &DetectionResult) -> Result<()> {
        self.records.write().await.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_in_memory_records() {
        let store = InMemoryDetectionStore::new();
        let result = DetectionResult {
            camera_id: "cam1".to_string(),
            model_id: "helmet-model".to_string(),
            kind: ModelKind::Helmet,
            label: "no helmet".to_string(),
            detected: false,
            confidence: None,
            raw_reply: "No Helmet".to_string(),
            frame_captured_at: Utc::now(),
            detected_at: Utc::now(),
        };

        store.record(&result).await.unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].label, "no helmet");
    }
}
