//! Azure AI Content Understanding client: submit a document, poll the operation, normalize.

use crate::config::{ServiceConfig, DEFAULT_ANALYZER_ID, DEFAULT_API_VERSION};
use crate::error::{ConfigError, ExtractionError, ExtractionResult};
use crate::services::credentials::{self, CredentialProvider};
use crate::services::normalizer::normalize;
use crate::types::{AnalysisJob, AnalysisRequest, JobStatus, NormalizedInvoice};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const USER_AGENT_HEADER: &str = "x-ms-useragent";
/// Consecutive transient errors back off up to this multiple of the poll interval.
const MAX_BACKOFF_FACTOR: u32 = 4;

/// Seam between the tool layer and the analyzer, so handlers can run against fakes.
#[async_trait]
pub trait InvoiceAnalyzer: Send + Sync {
    fn default_analyzer_id(&self) -> &str;

    fn api_version(&self) -> &str;

    async fn analyze_invoice(
        &self,
        request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> ExtractionResult<NormalizedInvoice>;
}

enum AnalysisState {
    Submitting(AnalysisRequest),
    Polling {
        job: AnalysisJob,
        transient_streak: u32,
        last_error: Option<String>,
    },
    Waiting {
        job: AnalysisJob,
        delay: Duration,
        transient_streak: u32,
        last_error: Option<String>,
    },
    Succeeded(Value),
    Failed(String),
    TimedOut(Option<String>),
}

/// Outcome of an HTTP call raced against cancellation and the overall deadline.
enum Bounded<T> {
    Done(ExtractionResult<T>),
    Cancelled,
    Expired,
}

pub struct ExtractionClient {
    http: reqwest::Client,
    credential: Arc<dyn CredentialProvider>,
    endpoint: Url,
    analyzer_id: String,
    api_version: String,
    user_agent: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ExtractionClient {
    pub fn new(
        config: &ServiceConfig,
        credential: Arc<dyn CredentialProvider>,
    ) -> ExtractionResult<Self> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            reason,
        };
        let endpoint = Url::parse(&config.endpoint).map_err(|e| invalid(e.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(invalid("endpoint must be an http(s) base URL".to_string()).into());
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExtractionError::Submission(format!("Could not build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            credential,
            endpoint,
            analyzer_id: config.analyzer_id.clone(),
            api_version: config.api_version.clone(),
            user_agent: config.user_agent.clone(),
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
        })
    }

    /// Picks the credential from config: API key when present, managed identity otherwise.
    pub fn from_config(config: &ServiceConfig) -> ExtractionResult<Self> {
        let credential = credentials::from_config(config)?;
        Self::new(config, credential)
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> ExtractionResult<NormalizedInvoice> {
        self.analyze_with_cancellation(request, &CancellationToken::new())
            .await
    }

    pub async fn analyze_with_cancellation(
        &self,
        request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> ExtractionResult<NormalizedInvoice> {
        let raw = self.run(request, cancel).await?;
        Ok(normalize(&raw))
    }

    /// Drives submit -> poll until a terminal state. The budget runs from the start of submission.
    async fn run(&self, request: AnalysisRequest, cancel: &CancellationToken) -> ExtractionResult<Value> {
        let started = Instant::now();
        let deadline = started + self.poll_timeout;
        let analyzer_id = request.analyzer_id().to_string();
        let mut state = AnalysisState::Submitting(request);

        loop {
            state = match state {
                AnalysisState::Submitting(request) => {
                    match self.bounded(cancel, deadline, self.submit(request)).await {
                        Bounded::Done(Ok(job)) => AnalysisState::Polling {
                            job,
                            transient_streak: 0,
                            last_error: None,
                        },
                        Bounded::Done(Err(e)) => {
                            warn!(analyzer_id = %analyzer_id, error = %e, "Analyzer submission failed");
                            return Err(e);
                        }
                        Bounded::Cancelled => return Err(ExtractionError::Cancelled),
                        Bounded::Expired => AnalysisState::TimedOut(None),
                    }
                }

                AnalysisState::Polling {
                    mut job,
                    transient_streak,
                    last_error,
                } => {
                    if Instant::now() >= deadline {
                        AnalysisState::TimedOut(last_error)
                    } else {
                        match self
                            .bounded(cancel, deadline, self.poll(&job.operation_location))
                            .await
                        {
                            Bounded::Done(Ok(body)) => {
                                job.apply(body);
                                debug!(
                                    operation = %job.operation_location,
                                    status = ?job.status,
                                    polls = job.polls,
                                    "Polled analyzer operation"
                                );
                                match job.status {
                                    JobStatus::Succeeded => {
                                        info!(
                                            analyzer_id = %analyzer_id,
                                            polls = job.polls,
                                            elapsed_ms = started.elapsed().as_millis() as u64,
                                            "Invoice analysis succeeded"
                                        );
                                        AnalysisState::Succeeded(job.result.take().unwrap_or(Value::Null))
                                    }
                                    JobStatus::Failed => AnalysisState::Failed(
                                        job.failure_reason
                                            .take()
                                            .unwrap_or_else(|| "Unknown error".to_string()),
                                    ),
                                    JobStatus::Running => AnalysisState::Waiting {
                                        job,
                                        delay: self.poll_interval,
                                        transient_streak: 0,
                                        last_error: None,
                                    },
                                }
                            }
                            Bounded::Done(Err(e)) if e.is_transient() => {
                                let transient_streak = transient_streak + 1;
                                let delay = self.backoff(transient_streak);
                                warn!(
                                    operation = %job.operation_location,
                                    attempt = transient_streak,
                                    retry_in_ms = delay.as_millis() as u64,
                                    error = %e,
                                    "Transient error while polling; retrying"
                                );
                                AnalysisState::Waiting {
                                    job,
                                    delay,
                                    transient_streak,
                                    last_error: Some(e.to_string()),
                                }
                            }
                            Bounded::Done(Err(e)) => return Err(e),
                            Bounded::Cancelled => return Err(ExtractionError::Cancelled),
                            Bounded::Expired => AnalysisState::TimedOut(last_error),
                        }
                    }
                }

                AnalysisState::Waiting {
                    job,
                    delay,
                    transient_streak,
                    last_error,
                } => {
                    let wake = (Instant::now() + delay).min(deadline);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ExtractionError::Cancelled),
                        _ = tokio::time::sleep_until(wake) => {}
                    }
                    AnalysisState::Polling {
                        job,
                        transient_streak,
                        last_error,
                    }
                }

                AnalysisState::Succeeded(raw) => return Ok(raw),

                AnalysisState::Failed(reason) => {
                    warn!(analyzer_id = %analyzer_id, reason = %reason, "Invoice analysis failed");
                    return Err(ExtractionError::AnalysisFailed(reason));
                }

                AnalysisState::TimedOut(last_error) => {
                    warn!(
                        analyzer_id = %analyzer_id,
                        budget_secs = self.poll_timeout.as_secs_f64(),
                        "Invoice analysis timed out"
                    );
                    return Err(ExtractionError::Timeout {
                        budget: self.poll_timeout,
                        last_error,
                    });
                }
            };
        }
    }

    async fn bounded<T, F>(&self, cancel: &CancellationToken, deadline: Instant, call: F) -> Bounded<T>
    where
        F: Future<Output = ExtractionResult<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Bounded::Cancelled,
            _ = tokio::time::sleep_until(deadline) => Bounded::Expired,
            result = call => Bounded::Done(result),
        }
    }

    fn backoff(&self, transient_streak: u32) -> Duration {
        let factor = 2u32
            .saturating_pow(transient_streak.saturating_sub(1))
            .min(MAX_BACKOFF_FACTOR);
        self.poll_interval * factor
    }

    fn service_url(&self, segments: &[&str], api_version: &str) -> ExtractionResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.to_string(),
                reason: "endpoint must be an http(s) base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        url.set_query(None);
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    async fn submit(&self, request: AnalysisRequest) -> ExtractionResult<AnalysisJob> {
        let action = format!("{}:analyze", request.analyzer_id());
        let url = self.service_url(
            &["contentunderstanding", "analyzers", action.as_str()],
            request.api_version(),
        )?;

        info!(
            analyzer_id = request.analyzer_id(),
            api_version = request.api_version(),
            content_type = request.content_type(),
            bytes = request.document_bytes().len(),
            "Submitting document to analyzer"
        );

        let builder = self
            .http
            .post(url)
            .header(CONTENT_TYPE, request.content_type())
            .header(USER_AGENT_HEADER, &self.user_agent);
        let builder = self.credential.authorize(builder).await?;
        let api_version = request.api_version().to_string();

        let response = builder.body(request.into_body()).send().await.map_err(|e| {
            ExtractionError::Submission(
                if e.is_connect() || e.is_timeout() {
                    format!("Could not reach the analyzer endpoint: {}", e)
                } else {
                    format!("Network error: {}", e)
                },
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Submission(format!(
                "{}: {}",
                status,
                if body.trim().is_empty() {
                    "Invalid key or endpoint?"
                } else {
                    body.trim()
                }
            )));
        }

        let header_location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let operation_location = match header_location {
            Some(location) => self.operation_url(&location)?.to_string(),
            None => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let id = body
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        ExtractionError::Submission("No Operation-Location in response".to_string())
                    })?;
                self.service_url(&["contentunderstanding", "analyzerResults", id], &api_version)?
                    .to_string()
            }
        };

        info!(operation = %operation_location, "Analyzer accepted document");
        Ok(AnalysisJob::new(operation_location))
    }

    /// Absolute locations pass through; relative ones resolve beneath the endpoint path.
    fn operation_url(&self, location: &str) -> ExtractionResult<Url> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(location).map_err(|e| {
            ExtractionError::Submission(format!("Invalid Operation-Location '{}': {}", location, e))
        })
    }

    async fn poll(&self, operation_location: &str) -> ExtractionResult<Value> {
        let builder = self
            .http
            .get(operation_location)
            .header(USER_AGENT_HEADER, &self.user_agent);
        // Token refresh hiccups mid-job are retried like any other network blip.
        let builder = self
            .credential
            .authorize(builder)
            .await
            .map_err(|e| ExtractionError::TransientNetwork(e.to_string()))?;

        let response = builder
            .send()
            .await
            .map_err(|e| ExtractionError::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if is_retryable(status) {
            return Err(ExtractionError::TransientNetwork(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::AnalysisFailed(format!(
                "status endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ExtractionError::TransientNetwork(format!("Invalid JSON: {}", e)))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[async_trait]
impl InvoiceAnalyzer for ExtractionClient {
    fn default_analyzer_id(&self) -> &str {
        &self.analyzer_id
    }

    fn api_version(&self) -> &str {
        &self.api_version
    }

    async fn analyze_invoice(
        &self,
        request: AnalysisRequest,
        cancel: &CancellationToken,
    ) -> ExtractionResult<NormalizedInvoice> {
        self.analyze_with_cancellation(request, cancel).await
    }
}

/// Stands in for the client when configuration failed, so argument validation still runs.
pub struct UnconfiguredAnalyzer {
    reason: String,
}

impl UnconfiguredAnalyzer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl InvoiceAnalyzer for UnconfiguredAnalyzer {
    fn default_analyzer_id(&self) -> &str {
        DEFAULT_ANALYZER_ID
    }

    fn api_version(&self) -> &str {
        DEFAULT_API_VERSION
    }

    async fn analyze_invoice(
        &self,
        _request: AnalysisRequest,
        _cancel: &CancellationToken,
    ) -> ExtractionResult<NormalizedInvoice> {
        Err(ExtractionError::Unavailable(self.reason.clone()))
    }
}
