//! Sensory feedback seam.
//!
//! The bridge decides *when* an accessibility event deserves a sound or a
//! vibration; a [`FeedbackProvider`] decides *how*. Providers are external
//! and may misbehave: a panicking provider is caught and logged, and the
//! signal it accompanies is still emitted.
//!
//! | Trigger | Feedback |
//! |---------|----------|
//! | Focus moves | [`SoundKind::Focus`] and a short vibration |
//! | `Checked` toggles | [`SoundKind::Toggle`] |

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

// ============================================================================
// SoundKind
// ============================================================================

/// Sound cues the bridge can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SoundKind {
    /// Keyboard focus moved.
    Focus,
    /// A checkable control was toggled.
    Toggle,
}

// ============================================================================
// FeedbackProvider
// ============================================================================

/// Produces sounds and vibrations.
///
/// Called on the owner thread. Implementations should return quickly.
pub trait FeedbackProvider: Send + Sync {
    /// Plays a sound cue.
    fn play_sound(&self, kind: SoundKind);

    /// Vibrates for `duration_ms` at `intensity` in `0.0..=1.0`.
    fn vibrate(&self, duration_ms: u64, intensity: f32);
}

/// Provider that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFeedback;

impl FeedbackProvider for NoopFeedback {
    fn play_sound(&self, _kind: SoundKind) {}

    fn vibrate(&self, _duration_ms: u64, _intensity: f32) {}
}

// ============================================================================
// FeedbackTiming
// ============================================================================

/// Whether feedback runs before or after the bus signal is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTiming {
    /// Feedback first, then the signal.
    Before,
    /// Signal first, then feedback.
    #[default]
    After,
}

// ============================================================================
// Cue
// ============================================================================

/// One piece of feedback for one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Cue {
    /// Focus sound plus vibration.
    Focus,
    /// Toggle sound.
    Toggle,
}

// ============================================================================
// Feedback
// ============================================================================

/// A provider bound to the bridge's feedback settings.
#[derive(Clone)]
pub(crate) struct Feedback {
    provider: Arc<dyn FeedbackProvider>,
    timing: FeedbackTiming,
    vibrate_ms: u64,
    intensity: f32,
}

impl std::fmt::Debug for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feedback")
            .field("timing", &self.timing)
            .field("vibrate_ms", &self.vibrate_ms)
            .field("intensity", &self.intensity)
            .finish_non_exhaustive()
    }
}

impl Feedback {
    pub(crate) fn new(
        provider: Arc<dyn FeedbackProvider>,
        timing: FeedbackTiming,
        vibrate_ms: u64,
        intensity: f32,
    ) -> Self {
        Self {
            provider,
            timing,
            vibrate_ms,
            intensity: intensity.clamp(0.0, 1.0),
        }
    }

    /// Runs `emit` and the cue in the configured order.
    pub(crate) fn around(&self, cue: Option<Cue>, emit: impl FnOnce()) {
        let Some(cue) = cue else {
            emit();
            return;
        };
        match self.timing {
            FeedbackTiming::Before => {
                self.play(cue);
                emit();
            }
            FeedbackTiming::After => {
                emit();
                self.play(cue);
            }
        }
    }

    fn play(&self, cue: Cue) {
        trace!(?cue, "Feedback");
        let provider = &self.provider;
        let result = catch_unwind(AssertUnwindSafe(|| match cue {
            Cue::Focus => {
                provider.play_sound(SoundKind::Focus);
                provider.vibrate(self.vibrate_ms, self.intensity);
            }
            Cue::Toggle => provider.play_sound(SoundKind::Toggle),
        }));
        if let Err(e) = result {
            error!(?cue, error = ?e, "Feedback provider panicked");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FeedbackProvider for Recorder {
        fn play_sound(&self, kind: SoundKind) {
            self.log.lock().push(format!("sound:{kind:?}"));
        }

        fn vibrate(&self, duration_ms: u64, _intensity: f32) {
            self.log.lock().push(format!("vibrate:{duration_ms}"));
        }
    }

    struct Panicker;

    impl FeedbackProvider for Panicker {
        fn play_sound(&self, _kind: SoundKind) {
            panic!("speaker on fire");
        }

        fn vibrate(&self, _duration_ms: u64, _intensity: f32) {}
    }

    fn recorder() -> (Arc<Recorder>, Arc<Mutex<Vec<String>>>) {
        let recorder = Recorder::default();
        let log = Arc::clone(&recorder.log);
        (Arc::new(recorder), log)
    }

    #[test]
    fn test_timing_after() {
        let (provider, log) = recorder();
        let feedback = Feedback::new(provider, FeedbackTiming::After, 30, 0.5);
        feedback.around(Some(Cue::Focus), || log.lock().push("emit".into()));
        assert_eq!(*log.lock(), vec!["emit", "sound:Focus", "vibrate:30"]);
    }

    #[test]
    fn test_timing_before() {
        let (provider, log) = recorder();
        let feedback = Feedback::new(provider, FeedbackTiming::Before, 30, 0.5);
        feedback.around(Some(Cue::Toggle), || log.lock().push("emit".into()));
        assert_eq!(*log.lock(), vec!["sound:Toggle", "emit"]);
    }

    #[test]
    fn test_no_cue_only_emits() {
        let (provider, log) = recorder();
        let feedback = Feedback::new(provider, FeedbackTiming::Before, 30, 0.5);
        feedback.around(None, || log.lock().push("emit".into()));
        assert_eq!(*log.lock(), vec!["emit"]);
    }

    #[test]
    fn test_panicking_provider_is_contained() {
        let feedback = Feedback::new(Arc::new(Panicker), FeedbackTiming::Before, 30, 0.5);
        let mut emitted = false;
        feedback.around(Some(Cue::Toggle), || emitted = true);
        assert!(emitted);
    }

    #[test]
    fn test_intensity_clamped() {
        let feedback = Feedback::new(Arc::new(NoopFeedback), FeedbackTiming::After, 10, 4.0);
        assert!((feedback.intensity - 1.0).abs() < f32::EPSILON);
    }
}
