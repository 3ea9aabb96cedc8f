//! Upstream Nextcloud client.
//!
//! A fresh client is built for every inbound request from the resolved
//! [`RequestAuthContext`]; nothing credential-bearing is shared across
//! requests. All calls go through one request core that retries on 429,
//! types 404 as [`BridgeError::NotFound`], and records per-app metrics
//! and a tracing span.

pub mod notes;
pub mod webdav;

use std::time::{Duration, Instant};

use http::Method;
use reqwest::{RequestBuilder, Response};
use tracing::{debug, info_span, warn, Instrument};

use ncmcp_auth::RequestAuthContext;
use ncmcp_core::{BridgeError, BridgeResult};

const MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum AuthScheme {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Authenticated handle to one upstream instance, for one request (or one
/// pipeline task).
#[derive(Debug, Clone)]
pub struct NextcloudClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    auth: AuthScheme,
    retry_backoff: Duration,
}

impl NextcloudClient {
    /// Build a client with explicit Basic credentials.
    pub fn with_basic_auth(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> BridgeResult<Self> {
        Self::build(
            base_url,
            username,
            AuthScheme::Basic {
                username: username.to_string(),
                password: password.to_string(),
            },
            timeout,
        )
    }

    /// Build a client carrying a bearer token.
    pub fn with_bearer(
        base_url: &str,
        username: &str,
        token: &str,
        timeout: Duration,
    ) -> BridgeResult<Self> {
        Self::build(
            base_url,
            username,
            AuthScheme::Bearer {
                token: token.to_string(),
            },
            timeout,
        )
    }

    /// Build a client from a resolved per-request auth context.
    pub fn from_context(
        base_url: &str,
        context: &RequestAuthContext,
        timeout: Duration,
    ) -> BridgeResult<Self> {
        match context {
            RequestAuthContext::Basic { username, password } => {
                Self::with_basic_auth(base_url, username, password, timeout)
            }
            RequestAuthContext::Bearer {
                token,
                upstream_token,
            } => Self::with_bearer(base_url, &token.principal, upstream_token, timeout),
        }
    }

    fn build(
        base_url: &str,
        username: &str,
        auth: AuthScheme,
        timeout: Duration,
    ) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::config(format!("upstream HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            auth,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Override the fixed 429 backoff (tests).
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The user all WebDAV paths are scoped to.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Upstream base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn apply_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthScheme::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            AuthScheme::Bearer { token } => builder.bearer_auth(token),
        }
    }

    /// Request core shared by every upstream call.
    ///
    /// On 429 up to five attempts are made with a fixed backoff; 404 comes
    /// back as the routine [`BridgeError::NotFound`]; other non-2xx are
    /// surfaced with status and body after logging.
    pub(crate) async fn request<F>(
        &self,
        app: &'static str,
        method: Method,
        path: &str,
        customize: F,
    ) -> BridgeResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}{}", self.base_url, path);
        let span = info_span!("nextcloud_api_call", app, method = %method, path);

        async {
            let start = Instant::now();
            let mut attempts = 0u32;

            loop {
                attempts += 1;
                let builder = self.apply_auth(self.http.request(
                    method.clone(),
                    &url,
                ));
                let response = customize(builder).send().await?;
                let status = response.status();

                if status == http::StatusCode::TOO_MANY_REQUESTS && attempts < MAX_RETRIES {
                    warn!(app, attempts, "upstream returned 429, backing off");
                    metrics::counter!("ncmcp_upstream_retries_total", "app" => app, "reason" => "429")
                        .increment(1);
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }

                record_upstream_call(app, &method, status.as_u16(), start);

                if status == http::StatusCode::NOT_FOUND {
                    debug!(app, %url, "upstream 404");
                    return Err(BridgeError::NotFound);
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    warn!(app, status = status.as_u16(), body = %body, "upstream call failed");
                    return Err(BridgeError::UpstreamHttp {
                        status: status.as_u16(),
                        body,
                    });
                }

                return Ok(response);
            }
        }
        .instrument(span)
        .await
    }

    /// Probe the upstream's public status document.
    pub async fn status(&self) -> BridgeResult<serde_json::Value> {
        let response = self
            .request("core", Method::GET, "/status.php", |b| b)
            .await?;
        Ok(response.json().await?)
    }

    /// Fetch the upstream capabilities document over OCS.
    pub async fn capabilities(&self) -> BridgeResult<serde_json::Value> {
        let response = self
            .request("core", Method::GET, "/ocs/v2.php/cloud/capabilities", |b| {
                b.header("OCS-APIRequest", "true").query(&[("format", "json")])
            })
            .await?;
        Ok(response.json().await?)
    }
}

fn record_upstream_call(app: &'static str, method: &Method, status: u16, start: Instant) {
    metrics::histogram!(
        "ncmcp_upstream_request_duration_seconds",
        "app" => app,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        "ncmcp_upstream_requests_total",
        "app" => app,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method as http_method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> NextcloudClient {
        NextcloudClient::with_basic_auth(base, "alice", "secret", Duration::from_secs(2))
            .unwrap()
            .with_retry_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn basic_auth_header_is_sent() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path("/status.php"))
            .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"installed": true})),
            )
            .mount(&upstream)
            .await;

        let status = client(&upstream.uri()).status().await.unwrap();
        assert_eq!(status["installed"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn retries_on_429_up_to_five_attempts() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path("/status.php"))
            .respond_with(ResponseTemplate::new(429))
            .expect(5)
            .mount(&upstream)
            .await;

        let err = client(&upstream.uri()).status().await.unwrap_err();
        match err {
            BridgeError::UpstreamHttp { status, .. } => assert_eq!(status, 429),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn recovers_when_429_clears_mid_retry() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path("/status.php"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&upstream)
            .await;
        Mock::given(http_method("GET"))
            .and(url_path("/status.php"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})),
            )
            .mount(&upstream)
            .await;

        assert!(client(&upstream.uri()).status().await.is_ok());
    }

    #[tokio::test]
    async fn passes_404_through_as_not_found_without_retry() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path("/status.php"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&upstream)
            .await;

        assert!(matches!(
            client(&upstream.uri()).status().await.unwrap_err(),
            BridgeError::NotFound
        ));
    }

    #[tokio::test]
    async fn does_not_retry_other_4xx() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(url_path("/status.php"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&upstream)
            .await;

        match client(&upstream.uri()).status().await.unwrap_err() {
            BridgeError::UpstreamHttp { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
