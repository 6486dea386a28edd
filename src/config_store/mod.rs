//! ConfigStore - Camera and model lookups
//!
//! ## Responsibilities
//!
//! - Resolve a camera identifier to its source address
//! - Resolve a model identifier to its `ModelKind`
//!
//! Both lookups sit behind traits. `PgConfigRepository` reads the
//! `cameras` and `models` tables; `InMemoryConfig` serves static
//! deployments and tests.

mod memory;
mod repository;
mod types;

pub use memory::InMemoryConfig;
pub use repository::{decode_address, PgConfigRepository};
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;

/// Camera source resolver
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Source address for a camera, `None` if unknown
    async fn resolve(&self, camera_id: &str) -> Result<Option<String>>;
}

/// Model registry
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Kind of a model, `None` if unknown
    async fn kind_of(&self, model_id: &str) -> Result<Option<ModelKind>>;
}
