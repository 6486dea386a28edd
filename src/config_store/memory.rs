//! In-memory camera directory and model registry

use super::{CameraDirectory, ModelKind, ModelRegistry};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryConfig {
    cameras: RwLock<HashMap<String, String>>,
    models: RwLock<HashMap<String, ModelKind>>,
}

impl InMemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, camera_id: impl Into<String>, address: impl Into<String>) -> Self {
        self.cameras
            .get_mut()
            .insert(camera_id.into(), address.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>, kind: ModelKind) -> Self {
        self.models.get_mut().insert(model_id.into(), kind);
        self
    }

    pub async fn set_camera(&self, camera_id: impl Into<String>, address: impl Into<String>) {
        self.cameras
            .write()
            .await
            .insert(camera_id.into(), address.into());
    }

    pub async fn remove_camera(&self, camera_id: &str) -> bool {
        self.cameras.write().await.remove(camera_id).is_some()
    }
}

#[async_trait]
impl CameraDirectory for InMemoryConfig {
    async fn resolve(&self, camera_id: &str) -> Result<Option<String>> {
        Ok(self.cameras.read().await.get(camera_id).cloned())
    }
}

#[async_trait]
impl ModelRegistry for InMemoryConfig {
    async fn kind_of(&self, model_id: &str) -> Result<Option<ModelKind>> {
        Ok(self.models.read().await.get(model_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookups() {
        let config = InMemoryConfig::new()
            .with_camera("cam1", "rtsp://10.0.0.5/stream1")
            .with_model("m-fire", ModelKind::Fire);

        assert_eq!(
            config.resolve("cam1").await.unwrap().as_deref(),
            Some("rtsp://10.0.0.5/stream1")
        );
        assert!(config.resolve("cam2").await.unwrap().is_none());
        assert_eq!(config.kind_of("m-fire").await.unwrap(), Some(ModelKind::Fire));

        assert!(config.remove_camera("cam1").await);
        assert!(config.resolve("cam1").await.unwrap().is_none());
    }
}
