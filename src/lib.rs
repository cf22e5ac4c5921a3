pub mod commands;
pub mod config;
pub mod documents;
pub mod error;
pub mod services;
pub mod types;
pub mod weather;

pub use commands::{error_envelope, tool_definitions, ToolDefinition, ToolHandler, ToolName};
pub use config::ServiceConfig;
pub use documents::{DocumentSource, ResolvedDocument};
pub use error::{ConfigError, DocumentError, ExtractionError, ExtractionResult, WeatherError};
pub use services::{ExtractionClient, InvoiceAnalyzer, UnconfiguredAnalyzer};
pub use types::{AnalysisRequest, LineItem, Money, NormalizedInvoice};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins; otherwise `-v` count picks the level. Logs go to stderr so stdout stays JSON.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbosity {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Wires the document root and the Content Understanding client into a tool handler.
pub fn build_handler(config: &ServiceConfig) -> ExtractionResult<ToolHandler> {
    let client = ExtractionClient::from_config(config)?;
    let documents = DocumentSource::new(config.data_dir.clone());
    Ok(ToolHandler::new(documents, Arc::new(client)))
}

/// Handler whose analyzer reports `reason` on every call. Validation and weather still work.
pub fn unconfigured_handler(data_dir: PathBuf, reason: impl Into<String>) -> ToolHandler {
    ToolHandler::new(
        DocumentSource::new(data_dir),
        Arc::new(UnconfiguredAnalyzer::new(reason)),
    )
}

/// Builds the handler from the environment, falling back to [`unconfigured_handler`].
pub fn handler_from_env() -> ToolHandler {
    let built = ServiceConfig::from_env()
        .map_err(ExtractionError::from)
        .and_then(|config| build_handler(&config));
    match built {
        Ok(handler) => handler,
        Err(e) => {
            warn!(error = %e, "Invoice analyzer is unavailable");
            let data_dir = config::data_dir_from_lookup(|name| std::env::var(name).ok());
            unconfigured_handler(data_dir, e.to_string())
        }
    }
}
