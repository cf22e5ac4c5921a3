use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ANALYZER_ID: &str = "prebuilt-invoice";
pub const DEFAULT_API_VERSION: &str = "2025-05-01-preview";
pub const DEFAULT_POLL_INTERVAL_SECONDS: f64 = 2.0;
pub const DEFAULT_POLL_TIMEOUT_SECONDS: f64 = 180.0;
pub const DEFAULT_DATA_DIR: &str = "data";

const ENDPOINT_ENV: &str = "CONTENT_UNDERSTANDING_ENDPOINT";
const API_KEY_ENV: &str = "CONTENT_UNDERSTANDING_API_KEY";
const ANALYZER_ID_ENV: &str = "CONTENT_UNDERSTANDING_ANALYZER_ID";
const API_VERSION_ENV: &str = "CONTENT_UNDERSTANDING_API_VERSION";
const USER_AGENT_ENV: &str = "CONTENT_UNDERSTANDING_USER_AGENT";
const POLL_INTERVAL_ENV: &str = "CONTENT_UNDERSTANDING_POLL_INTERVAL_SECONDS";
const POLL_TIMEOUT_ENV: &str = "CONTENT_UNDERSTANDING_POLL_TIMEOUT_SECONDS";
const DATA_DIR_ENV: &str = "INVOICE_DATA_DIR";

pub fn default_user_agent() -> String {
    format!("invoice-tools/{}", env!("CARGO_PKG_VERSION"))
}

/// Settings for the Content Understanding analyzer and the local sample root.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub analyzer_id: String,
    pub api_version: String,
    pub user_agent: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub data_dir: PathBuf,
}

impl ServiceConfig {
    /// Config with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: None,
            analyzer_id: DEFAULT_ANALYZER_ID.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            user_agent: default_user_agent(),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECONDS),
            poll_timeout: Duration::from_secs_f64(DEFAULT_POLL_TIMEOUT_SECONDS),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }

    /// Reads the process environment after loading `.env` from the working directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let endpoint = get(ENDPOINT_ENV).ok_or(ConfigError::Missing(ENDPOINT_ENV))?;
        reqwest::Url::parse(&endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        let mut config = Self::new(endpoint);
        config.api_key = get(API_KEY_ENV);
        if let Some(analyzer_id) = get(ANALYZER_ID_ENV) {
            config.analyzer_id = analyzer_id;
        }
        if let Some(api_version) = get(API_VERSION_ENV) {
            config.api_version = api_version;
        }
        if let Some(user_agent) = get(USER_AGENT_ENV) {
            config.user_agent = user_agent;
        }
        config.poll_interval = seconds(
            POLL_INTERVAL_ENV,
            get(POLL_INTERVAL_ENV),
            DEFAULT_POLL_INTERVAL_SECONDS,
        );
        config.poll_timeout = seconds(
            POLL_TIMEOUT_ENV,
            get(POLL_TIMEOUT_ENV),
            DEFAULT_POLL_TIMEOUT_SECONDS,
        );
        config.data_dir = data_dir_from_lookup(&lookup);

        info!(
            endpoint = %config.endpoint,
            analyzer_id = %config.analyzer_id,
            api_version = %config.api_version,
            auth = config.auth_mode(),
            poll_interval_secs = config.poll_interval.as_secs_f64(),
            poll_timeout_secs = config.poll_timeout.as_secs_f64(),
            "Content Understanding config resolved"
        );
        Ok(config)
    }

    pub fn auth_mode(&self) -> &'static str {
        if self.api_key.is_some() {
            "subscription-key"
        } else {
            "managed-identity"
        }
    }
}

/// Document root alone. Readable even when the analyzer settings are incomplete.
pub fn data_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup(DATA_DIR_ENV)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Positive number of seconds, or the default when unset or invalid.
fn seconds(name: &str, raw: Option<String>, default: f64) -> Duration {
    let Some(raw) = raw else {
        return Duration::from_secs_f64(default);
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Duration::from_secs_f64(value),
        _ => {
            warn!("Ignoring invalid {} value '{}'; using default {:.2}", name, raw, default);
            Duration::from_secs_f64(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn endpoint_is_required() {
        let err = ServiceConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENDPOINT_ENV)));
    }

    #[test]
    fn blank_endpoint_counts_as_missing() {
        let err = ServiceConfig::from_lookup(lookup(&[(ENDPOINT_ENV, "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[(ENDPOINT_ENV, "not a url")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));
    }

    #[test]
    fn defaults_apply_when_only_endpoint_is_set() {
        let config =
            ServiceConfig::from_lookup(lookup(&[(ENDPOINT_ENV, "https://cu.example.com/")]))
                .unwrap();
        assert_eq!(config.endpoint, "https://cu.example.com");
        assert_eq!(config.analyzer_id, DEFAULT_ANALYZER_ID);
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.poll_timeout, Duration::from_secs(180));
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.auth_mode(), "managed-identity");
        assert!(config.user_agent.starts_with("invoice-tools/"));
    }

    #[test]
    fn overrides_are_read_and_trimmed() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENDPOINT_ENV, "https://cu.example.com"),
            (API_KEY_ENV, " secret "),
            (ANALYZER_ID_ENV, "custom-invoice"),
            (API_VERSION_ENV, "2024-12-01-preview"),
            (POLL_INTERVAL_ENV, "0.5"),
            (POLL_TIMEOUT_ENV, "30"),
            (DATA_DIR_ENV, "/srv/invoices"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.auth_mode(), "subscription-key");
        assert_eq!(config.analyzer_id, "custom-invoice");
        assert_eq!(config.api_version, "2024-12-01-preview");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.data_dir, PathBuf::from("/srv/invoices"));
    }

    #[test]
    fn invalid_poll_values_fall_back_to_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENDPOINT_ENV, "https://cu.example.com"),
            (POLL_INTERVAL_ENV, "-1"),
            (POLL_TIMEOUT_ENV, "soon"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.poll_timeout, Duration::from_secs(180));
    }

    #[test]
    fn data_dir_is_read_without_an_endpoint() {
        assert_eq!(
            data_dir_from_lookup(lookup(&[(DATA_DIR_ENV, " /srv/invoices ")])),
            PathBuf::from("/srv/invoices")
        );
        assert_eq!(data_dir_from_lookup(lookup(&[])), PathBuf::from(DEFAULT_DATA_DIR));
    }

    #[test]
    fn blank_api_key_selects_managed_identity() {
        let config = ServiceConfig::from_lookup(lookup(&[
            (ENDPOINT_ENV, "https://cu.example.com"),
            (API_KEY_ENV, ""),
        ]))
        .unwrap();
        assert!(config.api_key.is_none());
    }
}
