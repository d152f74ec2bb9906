//! Platform connection seam.
//!
//! [`Connection`] is the narrow interface the orchestration core uses for
//! every authenticated platform call: one JSON POST endpoint for run
//! submission and one query endpoint for reading run state. Failure
//! classification is typed: the retry-once policy in the submitter keys on
//! [`PlatformError::SessionExpired`], never on message text.
//!
//! [`HttpConnection`] is the production implementation over reqwest.
//! Token acquisition is out of scope: the connection is handed a bearer
//! token up front and, optionally, a [`TokenSource`] it can ask for a fresh
//! one when the platform signals session expiry.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Result type for platform calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors raised by the platform connection.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform rejected the current credential.
    ///
    /// The only retryable classification: callers may refresh once and
    /// repeat the call.
    #[error("Session expired or invalid")]
    SessionExpired,

    /// The platform answered with an error payload.
    #[error("Platform request failed: {0}")]
    Request(String),

    /// The response body could not be interpreted.
    #[error("Malformed platform response: {0}")]
    MalformedResponse(String),

    /// Transport-level failure before any platform answer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credential refresh was requested but no token source is available.
    #[error("No token source configured for session refresh")]
    RefreshUnavailable,
}

/// An authenticated connection to the remote execution platform.
///
/// Exclusively read-oriented apart from [`post`](Connection::post); all
/// mutation of run state happens on the platform side.
#[async_trait]
pub trait Connection: Send + Sync {
    /// POSTs a JSON payload to a Tooling endpoint path (relative to the
    /// API root, e.g. `runTestsAsynchronous`) and returns the JSON body.
    async fn post(&self, endpoint: &str, body: &Value) -> PlatformResult<Value>;

    /// Runs a SOQL query and returns the record objects.
    async fn query(&self, soql: &str) -> PlatformResult<Vec<Value>>;

    /// Asks the platform for a fresh credential.
    ///
    /// Called at most once per submission attempt, after a
    /// [`PlatformError::SessionExpired`] classification.
    async fn refresh_session(&self) -> PlatformResult<()>;

    /// Instance base URL, e.g. `https://org.example.com`.
    fn instance_url(&self) -> &str;

    /// Current bearer token. Re-read per outbound frame by long-lived
    /// subscribers so a mid-run refresh is picked up.
    async fn access_token(&self) -> String;

    /// Platform API version path segment, e.g. `61.0`.
    fn api_version(&self) -> &str;
}

/// Supplies fresh bearer tokens for session refresh.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fresh_token(&self) -> PlatformResult<String>;
}

/// Production [`Connection`] over HTTPS.
pub struct HttpConnection {
    client: reqwest::Client,
    instance_url: String,
    api_version: String,
    token: RwLock<String>,
    token_source: Option<Box<dyn TokenSource>>,
}

impl HttpConnection {
    pub fn new(
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            token: RwLock::new(access_token.into()),
            token_source: None,
        }
    }

    /// Attaches a token source, enabling session refresh.
    pub fn with_token_source(mut self, source: Box<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    fn tooling_url(&self, endpoint: &str) -> String {
        format!(
            "{}/services/data/v{}/tooling/{}",
            self.instance_url, self.api_version, endpoint
        )
    }

    fn query_url(&self) -> String {
        format!(
            "{}/services/data/v{}/tooling/query",
            self.instance_url, self.api_version
        )
    }

    /// Maps an HTTP response to the typed failure classification.
    async fn classify(response: reqwest::Response) -> PlatformResult<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PlatformError::SessionExpired);
        }
        if !status.is_success() {
            return Err(PlatformError::Request(format!("{status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| PlatformError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn post(&self, endpoint: &str, body: &Value) -> PlatformResult<Value> {
        let url = self.tooling_url(endpoint);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.read().await.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        Self::classify(response).await
    }

    async fn query(&self, soql: &str) -> PlatformResult<Vec<Value>> {
        let url = self.query_url();
        debug!(%url, soql, "query");
        let response = self
            .client
            .get(&url)
            .query(&[("q", soql)])
            .bearer_auth(self.token.read().await.clone())
            .send()
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))?;
        let body = Self::classify(response).await?;

        let records = body
            .get("records")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PlatformError::MalformedResponse("query response missing 'records'".to_string())
            })?;
        Ok(records.clone())
    }

    async fn refresh_session(&self) -> PlatformResult<()> {
        let source = self
            .token_source
            .as_ref()
            .ok_or(PlatformError::RefreshUnavailable)?;
        let fresh = source.fresh_token().await?;
        *self.token.write().await = fresh;
        Ok(())
    }

    fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn access_token(&self) -> String {
        self.token.read().await.clone()
    }

    fn api_version(&self) -> &str {
        &self.api_version
    }
}
