//! ConfigStore data types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Detection model kind
///
/// Every kind-specific behavior (prompt, vocabulary, storage table, API key)
/// dispatches on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Fire,
    Helmet,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Fire, ModelKind::Helmet];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Fire => "fire",
            ModelKind::Helmet => "helmet",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown model type string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported model type: {0}")]
pub struct UnknownModelKind(pub String);

impl FromStr for ModelKind {
    type Err = UnknownModelKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fire" => Ok(ModelKind::Fire),
            "helmet" => Ok(ModelKind::Helmet),
            _ => Err(UnknownModelKind(s.to_string())),
        }
    }
}

/// Row of the `models` table
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ModelRecord {
    pub model_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub model_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("fire".parse::<ModelKind>(), Ok(ModelKind::Fire));
        assert_eq!(" Helmet ".parse::<ModelKind>(), Ok(ModelKind::Helmet));
        assert!("attendance".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_model_kind_serde() {
        let json = serde_json::to_string(&ModelKind::Helmet).unwrap();
        assert_eq!(json, "\"helmet\"");
    }
}
