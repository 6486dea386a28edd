//! InferenceGate - Cooldown rate limiter for inference calls
//!
//! A gate admits a call when none was admitted yet, or when at least
//! `cooldown` has passed since the last admitted call. Rejected calls leave
//! the gate untouched. One gate exists per model kind.

use crate::config_store::ModelKind;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct InferenceGate {
    cooldown: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl InferenceGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_call: Mutex::new(None),
        }
    }

    /// Admit a call at `now`, recording it on success
    pub fn try_call(&self, now: Instant) -> bool {
        let mut last = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let admitted = match *last {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) >= self.cooldown,
        };
        if admitted {
            *last = Some(now);
        }
        admitted
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Gates keyed by model kind
pub struct InferenceGates {
    fire: InferenceGate,
    helmet: InferenceGate,
}

impl InferenceGates {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            fire: InferenceGate::new(cooldown),
            helmet: InferenceGate::new(cooldown),
        }
    }

    pub fn for_kind(&self, kind: ModelKind) -> &InferenceGate {
        match kind {
            ModelKind::Fire => &self.fire,
            ModelKind::Helmet => &self.helmet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const COOLDOWN: Duration = Duration::from_millis(500);

    #[test]
    fn test_first_call_admitted() {
        let gate = InferenceGate::new(COOLDOWN);
        assert!(gate.try_call(Instant::now()));
    }

    #[test]
    fn test_call_within_cooldown_rejected() {
        let gate = InferenceGate::new(COOLDOWN);
        let t = Instant::now();
        assert!(gate.try_call(t));
        assert!(!gate.try_call(t + Duration::from_millis(10)));
        // Rejection does not move the window
        assert!(gate.try_call(t + COOLDOWN + Duration::from_millis(1)));
    }

    #[test]
    fn test_call_after_cooldown_admitted() {
        let gate = InferenceGate::new(COOLDOWN);
        let t = Instant::now();
        assert!(gate.try_call(t));
        assert!(gate.try_call(t + COOLDOWN));
        assert!(!gate.try_call(t + COOLDOWN + Duration::from_millis(100)));
    }

    #[test]
    fn test_kinds_are_independent() {
        let gates = InferenceGates::new(COOLDOWN);
        let t = Instant::now();
        assert!(gates.for_kind(ModelKind::Fire).try_call(t));
        assert!(gates.for_kind(ModelKind::Helmet).try_call(t));
        assert!(!gates.for_kind(ModelKind::Fire).try_call(t));
    }

    #[test]
    fn test_concurrent_callers_admit_one() {
        let gate = Arc::new(InferenceGate::new(COOLDOWN));
        let t = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_call(t))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
