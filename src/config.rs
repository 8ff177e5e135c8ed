use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Knobs of the simulated image-generation backend.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub failure_rate: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2000,
            max_delay_ms: 4000,
            failure_rate: 0.2,
        }
    }
}

impl InferenceConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt: JwtConfig,
    pub upload_dir: String,
    pub max_upload_bytes: usize,
    pub inference: InferenceConfig,
    pub job_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "ai-studio".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "ai-studio-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24 * 7),
        };
        let defaults = InferenceConfig::default();
        let inference = InferenceConfig {
            min_delay_ms: env_or("INFERENCE_MIN_DELAY_MS", defaults.min_delay_ms),
            max_delay_ms: env_or("INFERENCE_MAX_DELAY_MS", defaults.max_delay_ms),
            failure_rate: env_or("INFERENCE_FAILURE_RATE", defaults.failure_rate),
        };
        Ok(Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            jwt,
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 5 * 1024 * 1024),
            inference,
            job_queue_capacity: env_or("JOB_QUEUE_CAPACITY", 256),
        })
    }
}

/// Parses `key` from the environment, falling back to `default` when it is
/// unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_defaults_match_mock_backend() {
        let cfg = InferenceConfig::default();
        assert_eq!(cfg.min_delay(), Duration::from_millis(2000));
        assert_eq!(cfg.max_delay(), Duration::from_millis(4000));
        assert!((cfg.failure_rate - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("AI_STUDIO_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or::<u64>("AI_STUDIO_TEST_ENV_OR", 7), 7);
        std::env::set_var("AI_STUDIO_TEST_ENV_OR", "42");
        assert_eq!(env_or::<u64>("AI_STUDIO_TEST_ENV_OR", 7), 42);
        std::env::remove_var("AI_STUDIO_TEST_ENV_OR");
        assert_eq!(env_or::<u64>("AI_STUDIO_TEST_ENV_OR", 7), 7);
    }
}
