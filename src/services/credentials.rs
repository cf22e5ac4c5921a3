use crate::config::ServiceConfig;
use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::HeaderValue;
use reqwest::RequestBuilder;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

const IMDS_TOKEN_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const IMDS_API_VERSION: &str = "2018-02-01";
/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECONDS: i64 = 300;

/// Attaches authentication to outgoing analyzer requests.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, CredentialError>;
}

/// Key present -> subscription key, key absent -> managed identity.
pub fn from_config(config: &ServiceConfig) -> Result<Arc<dyn CredentialProvider>, CredentialError> {
    let provider: Arc<dyn CredentialProvider> = match &config.api_key {
        Some(key) => Arc::new(ApiKeyCredential::new(key)?),
        None => Arc::new(ManagedIdentityCredential::from_env()),
    };
    info!(auth = provider.kind(), "Analyzer credential selected");
    Ok(provider)
}

pub struct ApiKeyCredential {
    key: HeaderValue,
}

impl ApiKeyCredential {
    pub fn new(key: &str) -> Result<Self, CredentialError> {
        let mut key = HeaderValue::from_str(key.trim()).map_err(|_| CredentialError::InvalidHeader)?;
        key.set_sensitive(true);
        Ok(Self { key })
    }
}

#[async_trait]
impl CredentialProvider for ApiKeyCredential {
    fn kind(&self) -> &'static str {
        "subscription-key"
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, CredentialError> {
        Ok(request.header(SUBSCRIPTION_KEY_HEADER, self.key.clone()))
    }
}

#[derive(Debug, Clone)]
enum TokenSource {
    /// App Service / Functions identity endpoint.
    AppService { endpoint: String, secret: String },
    /// Instance metadata service on VMs and containers.
    Imds { endpoint: String },
}

#[derive(Debug, Clone)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECONDS) > now
    }
}

/// Bearer tokens from the ambient managed identity, cached until shortly before expiry.
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    source: TokenSource,
    client_id: Option<String>,
    cached: Mutex<Option<AccessToken>>,
}

impl ManagedIdentityCredential {
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let client_id = var("AZURE_CLIENT_ID");
        match (var("IDENTITY_ENDPOINT"), var("IDENTITY_HEADER")) {
            (Some(endpoint), Some(secret)) => Self::app_service(endpoint, secret, client_id),
            _ => Self::imds(IMDS_TOKEN_ENDPOINT, client_id),
        }
    }

    pub fn app_service(
        endpoint: impl Into<String>,
        secret: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        Self::with_source(
            TokenSource::AppService {
                endpoint: endpoint.into(),
                secret: secret.into(),
            },
            client_id,
        )
    }

    pub fn imds(endpoint: impl Into<String>, client_id: Option<String>) -> Self {
        Self::with_source(
            TokenSource::Imds {
                endpoint: endpoint.into(),
            },
            client_id,
        )
    }

    fn with_source(source: TokenSource, client_id: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            source,
            client_id,
            cached: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.cached.lock().ok()?;
        let token = guard
            .as_ref()
            .filter(|t| t.is_fresh(Utc::now()))
            .map(|t| t.token.clone());
        token
    }

    async fn fetch_token(&self) -> Result<AccessToken, CredentialError> {
        let mut query = vec![("resource", COGNITIVE_SERVICES_RESOURCE)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let request = match &self.source {
            TokenSource::AppService { endpoint, secret } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.http
                    .get(endpoint)
                    .header("X-IDENTITY-HEADER", secret)
                    .query(&query)
            }
            TokenSource::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.http.get(endpoint).header("Metadata", "true").query(&query)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| CredentialError::TokenRequest(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::TokenRequest(format!("{}: {}", status, body)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;
        parse_token(&body, Utc::now())
    }
}

#[async_trait]
impl CredentialProvider for ManagedIdentityCredential {
    fn kind(&self) -> &'static str {
        "managed-identity"
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, CredentialError> {
        let token = match self.cached_token() {
            Some(token) => token,
            None => {
                let fresh = self.fetch_token().await?;
                debug!(expires_at = %fresh.expires_at, "Fetched managed identity token");
                let token = fresh.token.clone();
                if let Ok(mut guard) = self.cached.lock() {
                    *guard = Some(fresh);
                }
                token
            }
        };
        Ok(request.bearer_auth(token))
    }
}

/// `expires_on` is unix seconds (string or number); older endpoints only send `expires_in`.
fn parse_token(body: &Value, now: DateTime<Utc>) -> Result<AccessToken, CredentialError> {
    fn seconds(v: &Value) -> Option<i64> {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
    }

    let token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CredentialError::InvalidResponse("missing access_token".to_string()))?
        .to_string();

    let expires_at = body
        .get("expires_on")
        .and_then(seconds)
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .or_else(|| {
            body.get("expires_in")
                .and_then(seconds)
                .map(|secs| now + ChronoDuration::seconds(secs))
        })
        .ok_or_else(|| CredentialError::InvalidResponse("missing token expiry".to_string()))?;

    Ok(AccessToken { token, expires_at })
}
