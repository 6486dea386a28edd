//! ConfigStore Repository
//!
//! PostgreSQL access for camera addresses and model types

use super::types::*;
use super::{CameraDirectory, ModelRegistry};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::PgPool;

/// Database-backed camera directory and model registry
#[derive(Clone)]
pub struct PgConfigRepository {
    pool: PgPool,
}

impl PgConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stored (percent-encoded) source address for a camera
    pub async fn get_rtsp_url(&self, camera_id: &str) -> Result<Option<String>> {
        let url = sqlx::query_scalar::<_, Option<String>>(
            "SELECT rtsp_url FROM cameras WHERE camera_id = $1",
        )
        .bind(camera_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(url.flatten())
    }

    pub async fn get_model(&self, model_id: &str) -> Result<Option<ModelRecord>> {
        let model = sqlx::query_as::<_, ModelRecord>(
            "SELECT model_id, type FROM models WHERE model_id = $1",
        )
        .bind(model_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(model)
    }
}

/// Percent-decode a stored address, keeping the raw value if it is not valid UTF-8
pub fn decode_address(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Camera address is not valid percent-encoding, using raw");
            raw.to_string()
        }
    }
}

#[async_trait]
impl CameraDirectory for PgConfigRepository {
    async fn resolve(&self, camera_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_rtsp_url(camera_id)
            .await?
            .filter(|url| !url.trim().is_empty())
            .map(|url| decode_address(&url)))
    }
}

#[async_trait]
impl ModelRegistry for PgConfigRepository {
    async fn kind_of(&self, model_id: &str) -> Result<Option<ModelKind>> {
        let Some(model) = self.get_model(model_id).await? else {
            return Ok(None);
        };

        model
            .model_type
            .parse::<ModelKind>()
            .map(Some)
            .map_err(|e| Error::Validation(format!("Model {}: {}", model_id, e)))
    }
}
