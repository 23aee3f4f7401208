use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub grading: GradingConfig,
    #[validate(nested)]
    pub submission: SubmissionConfig,
    #[validate(nested)]
    pub session: SessionConfig,
}

/// Where finalized attempts are delivered
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GradingConfig {
    #[validate(url(message = "Grading base url must be a valid URL"))]
    pub base_url: String,

    #[validate(length(min = 1, message = "Submit path must not be empty"))]
    pub submit_path: String,

    pub api_token: Option<String>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            submit_path: "/api/v1/submissions".to_string(),
            api_token: None,
        }
    }
}

/// Retry budget and per-attempt timeout of the submission client
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmissionConfig {
    #[validate(range(min = 1, max = 10, message = "Max attempts must be between 1 and 10"))]
    pub max_attempts: u32,

    #[validate(range(min = 1, message = "Base delay must be positive"))]
    pub base_delay_ms: u64,

    #[validate(range(min = 1, message = "Attempt timeout must be positive"))]
    pub attempt_timeout_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            attempt_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SessionConfig {
    pub time_up_notice_ms: u64,

    #[validate(range(min = 100, message = "Countdown tick must be at least 100ms"))]
    pub countdown_tick_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            time_up_notice_ms: 3000,
            countdown_tick_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn time_up_notice(&self) -> Duration {
        Duration::from_millis(self.time_up_notice_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let defaults = Config::default();

        let grading = GradingConfig {
            base_url: settings
                .get_string("grading.base_url")
                .or_else(|_| env::var("GRADING_API_URL"))
                .unwrap_or(defaults.grading.base_url),
            submit_path: settings
                .get_string("grading.submit_path")
                .unwrap_or(defaults.grading.submit_path),
            api_token: settings
                .get_string("grading.api_token")
                .or_else(|_| env::var("GRADING_API_TOKEN"))
                .ok()
                .filter(|token| !token.is_empty()),
        };

        let submission = SubmissionConfig {
            max_attempts: get_number(&settings, "submission.max_attempts")?
                .unwrap_or(defaults.submission.max_attempts),
            base_delay_ms: get_number(&settings, "submission.base_delay_ms")?
                .unwrap_or(defaults.submission.base_delay_ms),
            attempt_timeout_ms: get_number(&settings, "submission.attempt_timeout_ms")?
                .unwrap_or(defaults.submission.attempt_timeout_ms),
        };

        let session = SessionConfig {
            time_up_notice_ms: get_number(&settings, "session.time_up_notice_ms")?
                .unwrap_or(defaults.session.time_up_notice_ms),
            countdown_tick_ms: get_number(&settings, "session.countdown_tick_ms")?
                .unwrap_or(defaults.session.countdown_tick_ms),
        };

        let config = Config {
            grading,
            submission,
            session,
        };
        config
            .validate()
            .with_context(|| format!("Invalid configuration for environment {}", app_env))?;

        tracing::debug!(
            env = %app_env,
            grading_url = %config.grading.base_url,
            max_attempts = config.submission.max_attempts,
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// `None` when the key is unset. A value that is present but not a number in
/// range for `T` is an error, never a silent fallback to the default.
fn get_number<T: TryFrom<i64>>(settings: &config::Config, key: &str) -> Result<Option<T>> {
    let value = match settings.get_int(key) {
        Ok(value) => value,
        Err(config::ConfigError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Invalid value for {}", key)),
    };
    T::try_from(value)
        .map(Some)
        .map_err(|_| anyhow::anyhow!("Value {} is out of range for {}", value, key))
}
