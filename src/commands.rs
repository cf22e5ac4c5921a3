use crate::documents::DocumentSource;
use crate::error::{DocumentError, ExtractionError, WeatherError};
use crate::services::InvoiceAnalyzer;
use crate::types::{AnalysisRequest, NormalizedInvoice};
use crate::weather::WeatherLookup;
use serde::Serialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const GET_WEATHER: &str = "get_weather";
pub const ANALYZE_INVOICE: &str = "analyze_invoice";

const CITY_NAME_PROPERTY: &str = "city";
const COUNTRY_CODE_PROPERTY: &str = "countryCode";
const FILE_NAME_PROPERTY: &str = "fileName";
const INVOICE_ID_PROPERTY: &str = "invoiceId";
const CONTENT_TYPE_PROPERTY: &str = "contentType";
const ANALYZER_ID_PROPERTY: &str = "analyzerId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    GetWeather,
    AnalyzeInvoice,
}

impl ToolName {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetWeather => GET_WEATHER,
            ToolName::AnalyzeInvoice => ANALYZE_INVOICE,
        }
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            GET_WEATHER => Ok(ToolName::GetWeather),
            ANALYZE_INVOICE => Ok(ToolName::AnalyzeInvoice),
            other => Err(format!(
                "'{}' is not one of: {}, {}",
                other, GET_WEATHER, ANALYZE_INVOICE
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProperty {
    pub property_name: &'static str,
    pub property_type: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "is_required")]
    pub required: bool,
}

fn is_required(required: &bool) -> bool {
    *required
}

impl ToolProperty {
    fn required(property_name: &'static str, description: &'static str) -> Self {
        Self {
            property_name,
            property_type: "string",
            description,
            required: true,
        }
    }

    fn optional(property_name: &'static str, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(property_name, description)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub properties: Vec<ToolProperty>,
}

/// Tool metadata advertised to the hosting layer.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: GET_WEATHER,
            description: "Get current weather conditions for a specific city, including temperature, humidity, wind, and precipitation.",
            properties: vec![
                ToolProperty::required(CITY_NAME_PROPERTY, "City or town to retrieve weather for."),
                ToolProperty::optional(
                    COUNTRY_CODE_PROPERTY,
                    "Optional two-letter ISO 3166 country code to disambiguate the location (e.g. US, GB).",
                ),
            ],
        },
        ToolDefinition {
            name: ANALYZE_INVOICE,
            description: "Extract structured fields and line items from an invoice using Azure AI Content Understanding.",
            properties: vec![
                ToolProperty::required(
                    FILE_NAME_PROPERTY,
                    "File located under the data directory (for example invoice_sample.jpg).",
                ),
                ToolProperty::optional(
                    INVOICE_ID_PROPERTY,
                    "Legacy alias for fileName; ignored when fileName is given.",
                ),
                ToolProperty::optional(
                    ANALYZER_ID_PROPERTY,
                    "Optional Content Understanding analyzer ID. Defaults to prebuilt-invoice when omitted.",
                ),
                ToolProperty::optional(
                    CONTENT_TYPE_PROPERTY,
                    "Optional MIME type override, e.g. application/pdf or image/png.",
                ),
            ],
        },
    ]
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a str,
    details: &'a str,
}

pub fn error_envelope(error: &str, details: &str) -> String {
    serde_json::to_string(&ErrorEnvelope { error, details }).unwrap_or_else(|_| {
        r#"{"error":"Internal error","details":"Could not serialize error"}"#.to_string()
    })
}

/// Failure on the way to a tool result; always rendered as `{error, details}`.
#[derive(Debug)]
struct ToolFailure {
    error: &'static str,
    details: String,
}

impl ToolFailure {
    fn new(error: &'static str, details: impl Into<String>) -> Self {
        Self {
            error,
            details: details.into(),
        }
    }

    fn invalid_payload(details: impl Into<String>) -> Self {
        Self::new("Invalid request payload", details)
    }

    fn to_json(&self) -> String {
        error_envelope(self.error, &self.details)
    }
}

impl From<DocumentError> for ToolFailure {
    fn from(e: DocumentError) -> Self {
        let error = match &e {
            DocumentError::MissingReference => "fileName is required",
            DocumentError::NotFound { .. } => "Invoice sample not found",
            DocumentError::UnsupportedType { .. } => "Unsupported document type",
            DocumentError::Io { .. } => "Unable to read invoice sample",
        };
        ToolFailure::new(error, e.to_string())
    }
}

impl From<ExtractionError> for ToolFailure {
    fn from(e: ExtractionError) -> Self {
        let error = match &e {
            ExtractionError::AnalysisFailed(_) => "Invoice analysis failed",
            ExtractionError::Timeout { .. } => "Invoice analysis timed out",
            ExtractionError::Cancelled => "Invoice analysis cancelled",
            ExtractionError::Configuration(_)
            | ExtractionError::Credential(_)
            | ExtractionError::Submission(_)
            | ExtractionError::TransientNetwork(_)
            | ExtractionError::Unavailable(_) => "Unable to analyze invoice",
        };
        ToolFailure::new(error, e.to_string())
    }
}

impl From<WeatherError> for ToolFailure {
    fn from(e: WeatherError) -> Self {
        ToolFailure::new("Unable to retrieve weather information", e.to_string())
    }
}

/// Accepts `{"arguments": {...}}` or a bare arguments object.
fn parse_arguments(payload: &str) -> Result<Map<String, Value>, ToolFailure> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| ToolFailure::invalid_payload(e.to_string()))?;
    let Value::Object(mut body) = value else {
        return Err(ToolFailure::invalid_payload("expected a JSON object"));
    };
    match body.remove("arguments") {
        Some(Value::Object(arguments)) => Ok(arguments),
        Some(Value::Null) | None => Ok(body),
        Some(_) => Err(ToolFailure::invalid_payload("arguments must be a JSON object")),
    }
}

/// String argument, trimmed. Blank or non-string values count as missing.
fn trimmed_argument(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| error_envelope("Could not serialize tool result", &e.to_string()))
}

/// Entry point for tool invocations. Never returns an error: failures become JSON envelopes.
pub struct ToolHandler {
    documents: DocumentSource,
    analyzer: Arc<dyn InvoiceAnalyzer>,
    weather: Option<Arc<dyn WeatherLookup>>,
}

impl ToolHandler {
    pub fn new(documents: DocumentSource, analyzer: Arc<dyn InvoiceAnalyzer>) -> Self {
        Self {
            documents,
            analyzer,
            weather: None,
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherLookup>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub async fn handle(&self, tool: &str, payload: &str) -> String {
        self.handle_with_cancellation(tool, payload, &CancellationToken::new())
            .await
    }

    pub async fn handle_with_cancellation(
        &self,
        tool: &str,
        payload: &str,
        cancel: &CancellationToken,
    ) -> String {
        let name = match tool.parse::<ToolName>() {
            Ok(name) => name,
            Err(details) => {
                warn!(tool, "Unknown tool requested");
                return error_envelope("Unknown tool", &details);
            }
        };
        debug!(tool = name.as_str(), "Dispatching tool call");
        match name {
            ToolName::AnalyzeInvoice => self.analyze_invoice(payload, cancel).await,
            ToolName::GetWeather => self.get_weather(payload).await,
        }
    }

    pub async fn analyze_invoice(&self, payload: &str, cancel: &CancellationToken) -> String {
        match self.try_analyze_invoice(payload, cancel).await {
            Ok(invoice) => to_json(&invoice),
            Err(failure) => {
                error!(error = failure.error, details = %failure.details, "analyze_invoice failed");
                failure.to_json()
            }
        }
    }

    pub async fn get_weather(&self, payload: &str) -> String {
        match self.try_get_weather(payload).await {
            Ok(report) => to_json(&report),
            Err(failure) => {
                warn!(error = failure.error, details = %failure.details, "get_weather failed");
                failure.to_json()
            }
        }
    }

    async fn try_analyze_invoice(
        &self,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<NormalizedInvoice, ToolFailure> {
        let arguments = parse_arguments(payload)?;
        let file_name = trimmed_argument(&arguments, FILE_NAME_PROPERTY);
        let invoice_id = trimmed_argument(&arguments, INVOICE_ID_PROPERTY);
        let content_type = trimmed_argument(&arguments, CONTENT_TYPE_PROPERTY);
        let analyzer_id = trimmed_argument(&arguments, ANALYZER_ID_PROPERTY);

        if file_name.is_none() && invoice_id.is_none() {
            return Err(ToolFailure::new(
                "fileName is required",
                "Provide the file name relative to the data directory, for example invoice_sample.jpg.",
            ));
        }

        let document = self
            .documents
            .resolve(
                file_name.as_deref(),
                invoice_id.as_deref(),
                content_type.as_deref(),
            )
            .await?;

        let analyzer_id =
            analyzer_id.unwrap_or_else(|| self.analyzer.default_analyzer_id().to_string());
        info!(
            file = %document.file_name,
            path = %document.path.display(),
            content_type = %document.content_type,
            analyzer_id = %analyzer_id,
            "Starting invoice analysis"
        );

        let request = AnalysisRequest::new(
            document.bytes,
            document.content_type,
            analyzer_id,
            self.analyzer.api_version(),
        );
        Ok(self.analyzer.analyze_invoice(request, cancel).await?)
    }

    async fn try_get_weather(&self, payload: &str) -> Result<Value, ToolFailure> {
        let arguments = parse_arguments(payload)?;
        let city = trimmed_argument(&arguments, CITY_NAME_PROPERTY).ok_or_else(|| {
            ToolFailure::new(
                "City name is required",
                "Provide the city or town to look up, for example Seattle.",
            )
        })?;
        let country_code = trimmed_argument(&arguments, COUNTRY_CODE_PROPERTY);

        let weather = self.weather.as_ref().ok_or(WeatherError::Unavailable)?;
        Ok(weather
            .current_conditions(&city, country_code.as_deref())
            .await?)
    }
}
