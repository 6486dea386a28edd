//! DetectionPipeline - Frame to verdict
//!
//! ## Responsibilities
//!
//! - Throttle through the model kind's InferenceGate
//! - Encode the frame and build the kind's instruction
//! - Call the inference service with a fixed timeout
//! - Map the reply onto the kind's verdict vocabulary
//!
//! Throttled calls and inference failures yield `None`; the caller moves on
//! to the next frame.

use crate::ai_client::{InferenceRequest, InferenceService};
use crate::config_store::ModelKind;
use crate::frame_buffer::BufferedFrame;
use crate::inference_gate::InferenceGates;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SYSTEM_PROMPT: &str = "You are a multi-purpose detection assistant. \
Analyze the provided image and respond accordingly.";

const FIRE_INSTRUCTION: &str = "You are a fire detection assistant. Analyze the provided \
image to determine if there is any fire. Respond with 'Fire' or 'No Fire'.";

const HELMET_INSTRUCTION: &str = "Detect if a person is wearing a helmet. Respond with \
'Helmet' or 'No Helmet'. Do not detect if the person is wearing a helmet in a photo or \
video. Do not respond with any other text.";

/// Label used when a reply matches nothing in the vocabulary
pub const UNRECOGNIZED_LABEL: &str = "unrecognized";

pub fn instruction(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::Fire => FIRE_INSTRUCTION,
        ModelKind::Helmet => HELMET_INSTRUCTION,
    }
}

/// Mapped outcome of one reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub label: &'static str,
    pub detected: bool,
    pub confidence: Option<f32>,
}

const FIRE_VOCABULARY: &[Verdict] = &[
    Verdict {
        label: "fire",
        detected: true,
        confidence: Some(0.95),
    },
    Verdict {
        label: "no fire",
        detected: false,
        confidence: Some(0.05),
    },
];

const HELMET_VOCABULARY: &[Verdict] = &[
    Verdict {
        label: "helmet",
        detected: true,
        confidence: None,
    },
    Verdict {
        label: "no helmet",
        detected: false,
        confidence: None,
    },
];

fn vocabulary(kind: ModelKind) -> &'static [Verdict] {
    match kind {
        ModelKind::Fire => FIRE_VOCABULARY,
        ModelKind::Helmet => HELMET_VOCABULARY,
    }
}

fn unrecognized(kind: ModelKind) -> Verdict {
    Verdict {
        label: UNRECOGNIZED_LABEL,
        detected: false,
        confidence: match kind {
            ModelKind::Fire => Some(0.05),
            ModelKind::Helmet => None,
        },
    }
}

/// Lowercase, strip quotes and punctuation, collapse whitespace
fn normalize(reply: &str) -> String {
    reply
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a reply to a verdict using the longest matching vocabulary phrase
pub fn classify(kind: ModelKind, reply: &str) -> Verdict {
    let normalized = normalize(reply);
    vocabulary(kind)
        .iter()
        .filter(|v| {
            normalized == v.label
                || normalized
                    .strip_prefix(v.label)
                    .is_some_and(|rest| rest.starts_with(' '))
        })
        .max_by_key(|v| v.label.len())
        .copied()
        .unwrap_or_else(|| unrecognized(kind))
}

/// One evaluated frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub camera_id: String,
    pub model_id: String,
    pub kind: ModelKind,
    pub label: String,
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub raw_reply: String,
    pub frame_captured_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub inference_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference_timeout: Duration::from_secs(2),
        }
    }
}

pub struct DetectionPipeline {
    gates: Arc<InferenceGates>,
    inference: Arc<dyn InferenceService>,
    config: PipelineConfig,
}

impl DetectionPipeline {
    pub fn new(
        gates: Arc<InferenceGates>,
        inference: Arc<dyn InferenceService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gates,
            inference,
            config,
        }
    }

    /// Evaluate one frame; `None` when throttled or inference failed
    pub async fn evaluate(
        &self,
        camera_id: &str,
        model_id: &str,
        kind: ModelKind,
        frame: &BufferedFrame,
    ) -> Option<DetectionResult> {
        if !self.gates.for_kind(kind).try_call(Instant::now()) {
            tracing::trace!(camera_id = %camera_id, kind = %kind, "Inference throttled");
            return None;
        }

        let request = InferenceRequest {
            image_base64: base64::engine::general_purpose::STANDARD.encode(&frame.data),
            system_prompt: SYSTEM_PROMPT.to_string(),
            instruction: instruction(kind).to_string(),
        };

        let started = Instant::now();
        let reply = match tokio::time::timeout(
            self.config.inference_timeout,
            self.inference.generate(kind, request),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    model_id = %model_id,
                    error = %e,
                    "Inference failed"
                );
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    model_id = %model_id,
                    timeout_ms = self.config.inference_timeout.as_millis() as u64,
                    "Inference timed out"
                );
                return None;
            }
        };

        let verdict = classify(kind, &reply);
        if verdict.label == UNRECOGNIZED_LABEL {
            tracing::warn!(
                camera_id = %camera_id,
                kind = %kind,
                reply = %reply.trim(),
                "Unrecognized inference reply"
            );
        }

        tracing::debug!(
            camera_id = %camera_id,
            model_id = %model_id,
            label = verdict.label,
            detected = verdict.detected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frame evaluated"
        );

        Some(DetectionResult {
            camera_id: camera_id.to_string(),
            model_id: model_id.to_string(),
            kind,
            label: verdict.label.to_string(),
            detected: verdict.detected,
            confidence: verdict.confidence,
            raw_reply: reply.trim().to_string(),
            frame_captured_at: frame.captured_at,
            detected_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::InferenceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedReply {
        reply: String,
        delay: Duration,
        calls: AtomicUsize,
        last_request: Mutex<Option<InferenceRequest>>,
    }

    impl FixedReply {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl InferenceService for FixedReply {
        async fn generate(
            &self,
            _kind: ModelKind,
            request: InferenceRequest,
        ) -> std::result::Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl InferenceService for Failing {
        async fn generate(
            &self,
            _kind: ModelKind,
            _request: InferenceRequest,
        ) -> std::result::Result<String, InferenceError> {
            Err(InferenceError::Unavailable("503".to_string()))
        }
    }

    fn frame() -> BufferedFrame {
        BufferedFrame {
            data: vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9],
            captured_at: Utc::now(),
            seq: 1,
        }
    }

    fn pipeline(inference: Arc<dyn InferenceService>, cooldown: Duration) -> DetectionPipeline {
        DetectionPipeline::new(
            Arc::new(InferenceGates::new(cooldown)),
            inference,
            PipelineConfig::default(),
        )
    }

    #[test]
    fn test_fire_vocabulary() {
        let fire = classify(ModelKind::Fire, "Fire");
        assert!(fire.detected);
        assert_eq!(fire.confidence, Some(0.95));

        let no_fire = classify(ModelKind::Fire, "No Fire.");
        assert!(!no_fire.detected);
        assert_eq!(no_fire.label, "no fire");
        assert_eq!(no_fire.confidence, Some(0.05));

        assert!(classify(ModelKind::Fire, "'Fire' detected in the kitchen").detected);

        let other = classify(ModelKind::Fire, "I cannot tell");
        assert!(!other.detected);
        assert_eq!(other.label, UNRECOGNIZED_LABEL);
        assert_eq!(other.confidence, Some(0.05));

        // Substring alone is not a match
        assert_eq!(classify(ModelKind::Fire, "Fireplace").label, UNRECOGNIZED_LABEL);
    }

    #[test]
    fn test_helmet_vocabulary() {
        assert!(classify(ModelKind::Helmet, "Helmet").detected);
        assert!(!classify(ModelKind::Helmet, "\"No Helmet\"").detected);
        assert_eq!(classify(ModelKind::Helmet, "NO HELMET\n").label, "no helmet");
        assert_eq!(classify(ModelKind::Helmet, "Helmet").confidence, None);
        assert!(!classify(ModelKind::Helmet, "").detected);
    }

    #[tokio::test]
    async fn test_evaluate_positive_fire() {
        let inference = Arc::new(FixedReply::new("Fire"));
        let pipeline = pipeline(inference.clone(), Duration::ZERO);

        let result = pipeline
            .evaluate("cam1", "fire-model", ModelKind::Fire, &frame())
            .await
            .unwrap();

        assert!(result.detected);
        assert_eq!(result.confidence, Some(0.95));
        assert_eq!(result.camera_id, "cam1");
        assert_eq!(result.kind, ModelKind::Fire);

        let request = inference.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.instruction, FIRE_INSTRUCTION);
        assert_eq!(request.system_prompt, SYSTEM_PROMPT);
        assert_eq!(request.image_base64, "/9gB/9k=");
    }

    #[tokio::test]
    async fn test_gate_rejects_second_call() {
        let inference = Arc::new(FixedReply::new("No Fire"));
        let pipeline = pipeline(inference.clone(), Duration::from_secs(60));

        assert!(pipeline
            .evaluate("cam1", "m", ModelKind::Fire, &frame())
            .await
            .is_some());
        assert!(pipeline
            .evaluate("cam2", "m", ModelKind::Fire, &frame())
            .await
            .is_none());
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);

        // Other kind has its own gate
        assert!(pipeline
            .evaluate("cam1", "h", ModelKind::Helmet, &frame())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_inference_failure_yields_none() {
        let pipeline = pipeline(Arc::new(Failing), Duration::ZERO);
        assert!(pipeline
            .evaluate("cam1", "m", ModelKind::Helmet, &frame())
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_timeout_yields_none() {
        let inference = Arc::new(FixedReply {
            delay: Duration::from_secs(30),
            ..FixedReply::new("Fire")
        });
        let pipeline = pipeline(inference.clone(), Duration::ZERO);

        assert!(pipeline
            .evaluate("cam1", "m", ModelKind::Fire, &frame())
            .await
            .is_none());
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
    }
}
