//! Engine configuration loaded from the environment.
//!
//! Every knob has a default matching the documented resource model; the
//! environment overrides individual keys. Connector base URLs are read from
//! `CONNECTOR_{ID}_URL` variables and can also be supplied programmatically
//! by embedders and tests.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use trellis_sandbox::TemplateOptions;

use crate::error::{EngineError, EngineResult};

/// Retry policy applied to every node attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_attempts: u32,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_attempts: 3,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after attempt `attempt` (1-based):
    /// initialDelay × factor^(attempt−1), optionally jittered uniformly in
    /// [0, delay], capped at half the action timeout.
    pub fn backoff_after(&self, attempt: u32, action_timeout: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent as i32);
        let mut delay_ms = scaled.min(u64::MAX as f64) as u64;
        if self.use_jitter {
            delay_ms = fastrand::u64(0..=delay_ms.max(1));
        }
        let cap = action_timeout / 2;
        Duration::from_millis(delay_ms).min(cap)
    }
}

/// Process-wide engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub max_parallel_actions: usize,
    pub default_action_timeout: Duration,
    pub default_workflow_timeout: Duration,
    pub condition_timeout: Duration,
    pub template_options: TemplateOptions,
    pub retry: RetryPolicy,
    pub catalog_refresh: Duration,
    pub allow_draft_execution: bool,
    pub connector_urls: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap_or_else(|_| {
                SocketAddr::from(([0, 0, 0, 0], 8080))
            }),
            database_url: None,
            max_parallel_actions: 16,
            default_action_timeout: Duration::from_secs(30),
            default_workflow_timeout: Duration::from_secs(30 * 60),
            condition_timeout: Duration::from_millis(2000),
            template_options: TemplateOptions::default(),
            retry: RetryPolicy::default(),
            catalog_refresh: Duration::from_secs(5 * 60),
            allow_draft_execution: false,
            connector_urls: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<SocketAddr>("BIND_ADDR")? {
            config.bind_addr = addr;
        }
        config.database_url = env::var("DATABASE_URL").ok();

        if let Some(n) = env_parse::<usize>("MAX_PARALLEL_ACTIONS")? {
            config.max_parallel_actions = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("DEFAULT_ACTION_TIMEOUT_MS")? {
            config.default_action_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("DEFAULT_WORKFLOW_TIMEOUT_MS")? {
            config.default_workflow_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("CONDITION_TIMEOUT_MS")? {
            config.condition_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("TEMPLATE_RENDER_TIMEOUT_MS")? {
            config.template_options.render_timeout = Duration::from_millis(ms);
        }
        if let Some(strict) = env_parse::<bool>("TEMPLATE_STRICT_MODE")? {
            config.template_options.strict = strict;
        }
        if let Some(ms) = env_parse::<u64>("RETRY_INITIAL_DELAY_MS")? {
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = env_parse::<f64>("RETRY_BACKOFF_FACTOR")? {
            config.retry.backoff_factor = factor.max(1.0);
        }
        if let Some(attempts) = env_parse::<u32>("RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(jitter) = env_parse::<bool>("RETRY_USE_JITTER")? {
            config.retry.use_jitter = jitter;
        }
        if let Some(secs) = env_parse::<u64>("CATALOG_REFRESH_SECS")? {
            config.catalog_refresh = Duration::from_secs(secs.max(1));
        }
        if let Some(allow) = env_parse::<bool>("ALLOW_DRAFT_EXECUTION")? {
            config.allow_draft_execution = allow;
        }

        // CONNECTOR_{ID}_URL=http://... maps connector ids to base URLs
        for (key, value) in env::vars() {
            if let Some(id) = key
                .strip_prefix("CONNECTOR_")
                .and_then(|rest| rest.strip_suffix("_URL"))
            {
                if !id.is_empty() {
                    config.connector_urls.insert(id.to_lowercase(), value);
                }
            }
        }

        config
            .template_options
            .validate()
            .map_err(EngineError::Sandbox)?;
        Ok(config)
    }

    /// Base URL for a connector id, if configured.
    pub fn connector_url(&self, connector_id: &str) -> Option<&str> {
        self.connector_urls
            .get(&connector_id.to_lowercase())
            .map(String::as_str)
    }
}

fn env_parse<T: FromStr>(key: &str) -> EngineResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EngineError::Internal(format!("invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
