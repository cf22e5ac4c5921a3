use serde::{Deserialize, Serialize};

/// Amount with an optional ISO currency code. Bare numbers from the analyzer carry no currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
}

impl LineItem {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.quantity.is_none()
            && self.unit_price.is_none()
            && self.amount.is_none()
    }
}

/// Flat invoice fields. Every field may be missing depending on document quality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedInvoice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<Money>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub line_items: Vec<LineItem>,
}

/// One document submission. Built per tool call and consumed by the extraction client.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    document_bytes: Vec<u8>,
    content_type: String,
    analyzer_id: String,
    api_version: String,
}

impl AnalysisRequest {
    pub fn new(
        document_bytes: Vec<u8>,
        content_type: impl Into<String>,
        analyzer_id: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            document_bytes,
            content_type: content_type.into(),
            analyzer_id: analyzer_id.into(),
            api_version: api_version.into(),
        }
    }

    pub fn document_bytes(&self) -> &[u8] {
        &self.document_bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn analyzer_id(&self) -> &str {
        &self.analyzer_id
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub(crate) fn into_body(self) -> Vec<u8> {
        self.document_bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Maps the analyzer's status string. Unknown values keep the job running.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" => JobStatus::Succeeded,
            "failed" | "canceled" | "cancelled" => JobStatus::Failed,
            _ => JobStatus::Running,
        }
    }
}

/// Server-side analysis job, tracked from submission until a terminal poll response.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub operation_location: String,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub polls: u32,
}

impl AnalysisJob {
    pub fn new(operation_location: String) -> Self {
        Self {
            operation_location,
            status: JobStatus::Running,
            result: None,
            failure_reason: None,
            polls: 0,
        }
    }

    /// Folds one poll response body into the job.
    pub fn apply(&mut self, mut body: serde_json::Value) {
        self.polls += 1;
        self.status = body
            .get("status")
            .and_then(|s| s.as_str())
            .map(JobStatus::parse)
            .unwrap_or(JobStatus::Running);
        match self.status {
            JobStatus::Succeeded => {
                let result = ["result", "analyzeResult"]
                    .iter()
                    .find_map(|key| body.get_mut(*key).map(serde_json::Value::take))
                    .filter(|v| !v.is_null())
                    .unwrap_or(body);
                self.result = Some(result);
            }
            JobStatus::Failed => self.failure_reason = Some(failure_reason(&body)),
            JobStatus::Running => {}
        }
    }
}

/// First non-blank string among the known reason keys. Nulls and objects are skipped.
fn failure_reason(body: &serde_json::Value) -> String {
    let error = body.get("error");
    [
        error.and_then(|e| e.get("message")),
        error
            .and_then(|e| e.get("innererror"))
            .and_then(|e| e.get("message")),
        error.and_then(|e| e.get("code")),
        body.get("reason"),
        body.get("message"),
        error,
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
    .map(str::to_string)
    .unwrap_or_else(|| "Unknown error".to_string())
}
