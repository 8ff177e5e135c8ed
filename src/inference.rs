//! Simulated image-generation backend.
//!
//! There is no model behind this: [`MockInference`] waits for a random
//! interval and then either echoes the input image back as the output or
//! reports one of a handful of canned failures.

use std::time::Duration;

use async_trait::async_trait;
use rand::{seq::SliceRandom, Rng};
use tracing::debug;

use crate::config::InferenceConfig;

pub const FAILURE_MESSAGES: [&str; 5] = [
    "AI model is currently overloaded. Please try again.",
    "Failed to process the image. The image format may be unsupported.",
    "Generation timeout. The request took too long to process.",
    "Rate limit exceeded. Please wait before trying again.",
    "Internal AI service error. Our team has been notified.",
];

/// Result of one generation attempt. A failure here is a normal outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    Success { output_image_url: String },
    Failure { error: String },
}

impl InferenceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InferenceOutcome::Success { .. })
    }
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// `Err` is reserved for unexpected breakage; simulated model failures
    /// come back as [`InferenceOutcome::Failure`].
    async fn generate(&self, input_image_url: &str, prompt: &str)
        -> anyhow::Result<InferenceOutcome>;
}

#[derive(Debug, Clone)]
pub struct MockInference {
    min_delay: Duration,
    max_delay: Duration,
    failure_rate: f64,
}

impl MockInference {
    pub fn new(cfg: &InferenceConfig) -> Self {
        let failure_rate = if cfg.failure_rate.is_nan() {
            0.0
        } else {
            cfg.failure_rate.clamp(0.0, 1.0)
        };
        Self {
            min_delay: cfg.min_delay(),
            max_delay: cfg.max_delay(),
            failure_rate,
        }
    }

    /// Uniform in `[min_delay, max_delay)`; exactly `min_delay` when the
    /// range is empty.
    pub fn pick_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min_delay >= self.max_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rng.gen_range(min..max))
    }

    pub fn roll<R: Rng>(&self, rng: &mut R, input_image_url: &str) -> InferenceOutcome {
        if rng.gen_bool(self.failure_rate) {
            let error = FAILURE_MESSAGES
                .choose(rng)
                .copied()
                .unwrap_or(FAILURE_MESSAGES[0]);
            InferenceOutcome::Failure {
                error: error.to_string(),
            }
        } else {
            InferenceOutcome::Success {
                output_image_url: input_image_url.to_string(),
            }
        }
    }
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new(&InferenceConfig::default())
    }
}

#[async_trait]
impl ImageGenerator for MockInference {
    async fn generate(
        &self,
        input_image_url: &str,
        prompt: &str,
    ) -> anyhow::Result<InferenceOutcome> {
        let delay = self.pick_delay(&mut rand::thread_rng());
        debug!(input_image_url, prompt, delay_ms = delay.as_millis() as u64, "mock inference started");
        tokio::time::sleep(delay).await;

        let outcome = self.roll(&mut rand::thread_rng(), input_image_url);
        debug!(success = outcome.is_success(), "mock inference finished");
        Ok(outcome)
    }
}
