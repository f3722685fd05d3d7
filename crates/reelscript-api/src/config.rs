//! API configuration.
//!
//! A validated record with typed defaults: enumerated options are parsed at
//! boot and invalid values are rejected instead of silently defaulted.

use std::time::Duration;

use reelscript_models::AnalysisMode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} (expected one of {expected})")]
    InvalidOption {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Base URL public view links are minted under.
    pub public_base_url: String,
    /// Beta capacity: hard ceiling on admitted users.
    pub beta_capacity: u64,
    /// Per-subscriber quota ceiling per window.
    pub user_rate_limit: u64,
    /// Quota window length.
    pub user_rate_window: Duration,
    /// Per-IP request rate (outer limiter).
    pub ip_rate_limit_rps: u32,
    /// Variations past this get an advisory in the acknowledgement.
    pub soft_variation_limit: u32,
    /// Analyzer input selection. Validated here so a misconfigured
    /// deployment fails fast; the worker reads the same variable.
    pub analysis_mode: AnalysisMode,
    /// Fixed key required by admin endpoints.
    pub admin_api_key: String,
    pub request_timeout: Duration,
    pub environment: String,
}

impl ApiConfig {
    /// Load and validate from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let analysis_mode_raw =
            std::env::var("ANALYSIS_MODE").unwrap_or_else(|_| "hybrid".to_string());
        let analysis_mode =
            AnalysisMode::parse(&analysis_mode_raw).ok_or(ConfigError::InvalidOption {
                key: "ANALYSIS_MODE",
                value: analysis_mode_raw,
                expected: "audio|frames|hybrid",
            })?;

        let admin_api_key =
            std::env::var("ADMIN_API_KEY").map_err(|_| ConfigError::Missing("ADMIN_API_KEY"))?;

        Ok(Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8000),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "https://reelscript.app".to_string())
                .trim_end_matches('/')
                .to_string(),
            beta_capacity: std::env::var("BETA_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            user_rate_limit: std::env::var("USER_RATE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            user_rate_window: Duration::from_secs(
                std::env::var("USER_RATE_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            ip_rate_limit_rps: std::env::var("IP_RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            soft_variation_limit: std::env::var("SOFT_VARIATION_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            analysis_mode,
            admin_api_key,
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }

    /// Public view URL for a script handle.
    pub fn view_url(&self, public_id: &str) -> String {
        format!("{}/s/{}", self.public_base_url, public_id)
    }

    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_url_shape() {
        let config = ApiConfig {
            host: "0.0.0.0".into(),
            port: 8000,
            public_base_url: "https://reelscript.app".into(),
            beta_capacity: 100,
            user_rate_limit: 10,
            user_rate_window: Duration::from_secs(3600),
            ip_rate_limit_rps: 10,
            soft_variation_limit: 5,
            analysis_mode: AnalysisMode::Hybrid,
            admin_api_key: "k".into(),
            request_timeout: Duration::from_secs(30),
            environment: "test".into(),
        };
        assert_eq!(config.view_url("AbCdEf12"), "https://reelscript.app/s/AbCdEf12");
    }
}
