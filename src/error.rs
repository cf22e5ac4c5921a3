//! Error types for document resolution, extraction, credentials and weather lookups.

use std::time::Duration;
use thiserror::Error;

pub type DocumentResult<T> = std::result::Result<T, DocumentError>;
pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required to call Azure AI Content Understanding.")]
    Missing(&'static str),

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("fileName or invoiceId must reference a file inside the data directory.")]
    MissingReference,

    #[error("Document '{reference}' not found: {reason}")]
    NotFound { reference: String, reason: String },

    #[error("Cannot detect the content type of '{file_name}'; pass contentType explicitly.")]
    UnsupportedType { file_name: String },

    #[error("Could not read '{reference}': {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Managed identity token request failed: {0}")]
    TokenRequest(String),

    #[error("Managed identity returned an unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Credential contains characters not allowed in a header")]
    InvalidHeader,
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("Analyzer rejected the submission: {0}")]
    Submission(String),

    #[error("Invoice analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Invoice analysis did not finish within {}s{}", .budget.as_secs_f64(), .last_error.as_deref().map(|e| format!(" (last error: {})", e)).unwrap_or_default())]
    Timeout {
        budget: Duration,
        last_error: Option<String>,
    },

    /// Retried inside the polling loop; only observed by callers through `Timeout`.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Invoice analysis was cancelled")]
    Cancelled,

    #[error("Invoice analyzer is not configured: {0}")]
    Unavailable(String),
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::TransientNetwork(_))
    }
}

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("No results found for '{0}'")]
    LocationNotFound(String),

    #[error("{0}")]
    Service(String),

    #[error("No weather backend is configured")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_includes_last_error() {
        let err = ExtractionError::Timeout {
            budget: Duration::from_secs(180),
            last_error: Some("HTTP 503".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Invoice analysis did not finish within 180s (last error: HTTP 503)"
        );
    }

    #[test]
    fn timeout_message_without_last_error() {
        let err = ExtractionError::Timeout {
            budget: Duration::from_millis(1500),
            last_error: None,
        };
        assert_eq!(err.to_string(), "Invoice analysis did not finish within 1.5s");
    }

    #[test]
    fn only_transient_network_errors_are_transient() {
        assert!(ExtractionError::TransientNetwork("reset".into()).is_transient());
        assert!(!ExtractionError::Submission("400".into()).is_transient());
        assert!(!ExtractionError::Cancelled.is_transient());
    }
}
