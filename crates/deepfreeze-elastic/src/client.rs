use deepfreeze_core::{CoreError, CoreResult, ElasticsearchConfig};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;

/// Thin HTTP client for the cluster REST API.
///
/// Responses are returned with their status and decoded JSON body so callers
/// can decide which non-2xx answers are meaningful (404 on a missing
/// repository, 409 on a version conflict).
#[derive(Clone)]
pub struct ElasticClient {
    http: Client,
    base_url: String,
    base: Url,
    username: Option<String>,
    password: Option<String>,
}

/// Status and JSON body of a cluster response.
#[derive(Debug, Clone)]
pub(crate) struct EsResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl EsResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `error.type` of a failed response, e.g. `index_not_found_exception`.
    pub fn error_type(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
    }

    /// Human-readable failure description.
    pub fn reason(&self) -> String {
        let reason = self
            .body
            .get("error")
            .and_then(|e| e.get("reason"))
            .and_then(Value::as_str);
        match (self.error_type(), reason) {
            (Some(kind), Some(reason)) => format!("{} ({kind}): {reason}", self.status),
            _ => format!("{}: {}", self.status, truncate(&self.body.to_string(), 200)),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

impl ElasticClient {
    /// Build a client from connection settings
    pub fn new(config: &ElasticsearchConfig) -> CoreResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;
        let base = Url::parse(&config.url)
            .map_err(|e| CoreError::Config(format!("invalid cluster url `{}`: {e}", config.url)))?;
        if base.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "cluster url `{}` cannot carry a path",
                config.url
            )));
        }

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            base,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.authorize(self.http.request(method, url))
    }

    /// Like [`request`](Self::request), but each segment is percent-encoded
    /// on its own so ids containing `/` or spaces stay one segment.
    pub(crate) fn request_segments(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        self.authorize(self.http.request(method, url))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Send a request and decode the body; empty or non-JSON bodies become `Null`.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<EsResponse, String> {
        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e.without_url()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("failed to read response body: {e}"))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(EsResponse { status, body })
    }
}
