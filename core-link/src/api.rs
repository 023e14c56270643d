//! Backend client for the per-platform linking endpoints
//!
//! Every call carries the primary credential as a bearer header and sends
//! cookies along. Endpoints are resolved against the configured base URL as
//! `{slug}/auth/{action}`:
//!
//! | Call | Endpoint |
//! |---|---|
//! | [`PlatformApi::exchange`] | `POST {slug}/auth/callback` |
//! | [`PlatformApi::refresh`] | `POST {slug}/auth/refresh` |
//! | [`PlatformApi::status`] | `GET {slug}/auth/status` |
//! | [`PlatformApi::login_url`] | `GET {slug}/auth/login` |
//! | [`PlatformApi::logout`] | `POST {slug}/auth/logout` |
//!
//! The exchange is sent with [`RetryPolicy::no_retry`] so a one-time code is
//! submitted at most once per attempt. Refresh is sent the same way: the
//! keep-alive ticker owns the retry cadence, one request per tick.

use crate::credential::PrimaryCredential;
use crate::error::{LinkError, Result};
use crate::types::{AuthStatusSnapshot, LinkedUser, PlatformKind};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Result of one exchange attempt that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Linking succeeded
    Linked(Option<LinkedUser>),
    /// HTTP 401: the primary session has not propagated yet
    Unauthorized,
    /// Any other failure status, or a success status with a failure body
    Rejected { status: u16, reason: Option<String> },
}

#[derive(Serialize)]
struct ExchangeBody<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    #[serde(default)]
    success: bool,
    user: Option<WireUser>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    authenticated: bool,
    user: Option<WireUser>,
    expires_at: Option<WireTimestamp>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    auth_url: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    group: Option<WireGroup>,
}

/// `group` is either a plain name or an object carrying one.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireGroup {
    Name(String),
    Object { name: Option<String> },
}

/// `expiresAt` is either RFC 3339 text or a Unix epoch (seconds or millis).
#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Epoch(i64),
    Text(String),
}

impl From<WireUser> for LinkedUser {
    fn from(user: WireUser) -> Self {
        let group_name = match user.group {
            Some(WireGroup::Name(name)) => Some(name),
            Some(WireGroup::Object { name }) => name,
            None => None,
        }
        .filter(|name| !name.trim().is_empty());

        LinkedUser {
            name: user.name,
            email: user.email,
            group_name,
        }
    }
}

impl WireTimestamp {
    fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            // Anything past year 33658 in seconds is really milliseconds.
            WireTimestamp::Epoch(value) if value.abs() >= 1_000_000_000_000 => {
                Utc.timestamp_millis_opt(value).single()
            }
            WireTimestamp::Epoch(value) => Utc.timestamp_opt(value, 0).single(),
            WireTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Client for one platform's linking endpoints.
#[derive(Clone)]
pub struct PlatformApi {
    platform: PlatformKind,
    base_url: Url,
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl fmt::Debug for PlatformApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformApi")
            .field("platform", &self.platform)
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PlatformApi {
    pub fn new(
        platform: PlatformKind,
        base_url: Url,
        http_client: Arc<dyn HttpClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            base_url,
            http_client,
            timeout,
        }
    }

    pub fn platform(&self) -> PlatformKind {
        self.platform
    }

    /// Absolute URL of `{slug}/auth/{action}`.
    pub fn endpoint(&self, action: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/auth/{}", self.platform.slug(), action))
            .map_err(|e| LinkError::Config(format!("invalid endpoint for {}: {}", action, e)))
    }

    fn authorized(&self, request: HttpRequest, credential: &PrimaryCredential) -> HttpRequest {
        request
            .bearer_token(credential.expose())
            .with_credentials()
            .timeout(self.timeout)
    }

    /// Submits an authorization code.
    ///
    /// Transport failures are returned as errors; everything the backend
    /// answered is an [`ExchangeOutcome`].
    #[instrument(skip(self, credential, code), fields(platform = self.platform.slug(), has_state = state.is_some()))]
    pub async fn exchange(
        &self,
        credential: &PrimaryCredential,
        code: &str,
        state: Option<&str>,
    ) -> Result<ExchangeOutcome> {
        let url = self.endpoint("callback")?;
        let request = self
            .authorized(HttpRequest::post(url.as_str()), credential)
            .json(&ExchangeBody { code, state })
            .map_err(|e| LinkError::InvalidResponse(format!("failed to encode exchange: {}", e)))?;

        debug!("Submitting authorization code");

        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await
            .map_err(|e| {
                warn!(error = %e, "Exchange request did not reach the backend");
                LinkError::from(e)
            })?;

        if response.is_unauthorized() {
            debug!("Exchange returned 401, primary session not yet accepted");
            return Ok(ExchangeOutcome::Unauthorized);
        }

        if !response.is_success() {
            let reason = error_reason(&response);
            warn!(status = response.status, reason = ?reason, "Exchange rejected");
            return Ok(ExchangeOutcome::Rejected {
                status: response.status,
                reason,
            });
        }

        let body: ExchangeResponse = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Exchange response could not be parsed");
                return Ok(ExchangeOutcome::Rejected {
                    status: response.status,
                    reason: Some("unreadable response from server".to_string()),
                });
            }
        };

        if !body.success {
            let reason = body.error.or(body.message);
            warn!(reason = ?reason, "Exchange answered with a failure body");
            return Ok(ExchangeOutcome::Rejected {
                status: response.status,
                reason,
            });
        }

        let user = body.user.map(LinkedUser::from);
        info!(has_user = user.is_some(), "Authorization code exchanged");
        Ok(ExchangeOutcome::Linked(user))
    }

    /// Keeps the external session alive.
    #[instrument(skip(self, credential), fields(platform = self.platform.slug()))]
    pub async fn refresh(&self, credential: &PrimaryCredential) -> Result<()> {
        let url = self.endpoint("refresh")?;
        let request = self.authorized(HttpRequest::post(url.as_str()), credential);

        let response = self
            .http_client
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await
            .map_err(|e| LinkError::RefreshFailed(e.to_string()))?;

        if !response.is_success() {
            let detail = match error_reason(&response) {
                Some(reason) => format!("HTTP {}: {}", response.status, reason),
                None => format!("HTTP {}", response.status),
            };
            return Err(LinkError::RefreshFailed(detail));
        }

        debug!("External session refreshed");
        Ok(())
    }

    /// Reads the linking status.
    #[instrument(skip(self, credential), fields(platform = self.platform.slug()))]
    pub async fn status(&self, credential: &PrimaryCredential) -> Result<AuthStatusSnapshot> {
        let url = self.endpoint("status")?;
        let request = self.authorized(HttpRequest::get(url.as_str()), credential);
        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(LinkError::InvalidResponse(format!(
                "status endpoint returned HTTP {}",
                response.status
            )));
        }

        let body: StatusResponse = response
            .json()
            .map_err(|e| LinkError::InvalidResponse(format!("status: {}", e)))?;

        Ok(AuthStatusSnapshot {
            authenticated: body.authenticated,
            user: body.user.map(LinkedUser::from),
            expires_at: body.expires_at.and_then(WireTimestamp::into_datetime),
        })
    }

    /// Asks the backend for the platform's authorization URL.
    #[instrument(skip(self, credential), fields(platform = self.platform.slug()))]
    pub async fn login_url(&self, credential: &PrimaryCredential) -> Result<Url> {
        let url = self.endpoint("login")?;
        let request = self.authorized(HttpRequest::get(url.as_str()), credential);
        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(LinkError::InvalidResponse(format!(
                "login endpoint returned HTTP {}",
                response.status
            )));
        }

        let body: LoginResponse = response
            .json()
            .map_err(|e| LinkError::InvalidResponse(format!("login: {}", e)))?;

        match (body.success, body.auth_url) {
            (true, Some(auth_url)) => Url::parse(&auth_url)
                .map_err(|e| LinkError::InvalidResponse(format!("authUrl: {}", e))),
            (_, _) => Err(LinkError::InvalidResponse(
                body.error
                    .unwrap_or_else(|| "login endpoint returned no authUrl".to_string()),
            )),
        }
    }

    /// Unlinks the platform on the backend.
    #[instrument(skip(self, credential), fields(platform = self.platform.slug()))]
    pub async fn logout(&self, credential: &PrimaryCredential) -> Result<()> {
        let url = self.endpoint("logout")?;
        let request = self.authorized(HttpRequest::post(url.as_str()), credential);
        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(LinkError::InvalidResponse(format!(
                "logout endpoint returned HTTP {}",
                response.status
            )));
        }

        info!("Platform unlinked on backend");
        Ok(())
    }
}

fn error_reason(response: &HttpResponse) -> Option<String> {
    response
        .json::<ErrorBody>()
        .ok()
        .and_then(|body| body.error.or(body.message))
        .filter(|reason| !reason.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::HttpMethod;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHttpClient {
        responses: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
        requests: Mutex<Vec<(HttpRequest, Option<RetryPolicy>)>>,
    }

    impl RecordingHttpClient {
        fn respond(self, status: u16, body: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(HttpResponse::new(status, body.to_string())));
            self
        }

        fn fail(self, error: BridgeError) -> Self {
            self.responses.lock().unwrap().push_back(Err(error));
            self
        }

        fn last(&self) -> (HttpRequest, Option<RetryPolicy>) {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpClient for RecordingHttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.requests.lock().unwrap().push((request, None));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
        }

        async fn execute_with_retry(
            &self,
            request: HttpRequest,
            policy: RetryPolicy,
        ) -> BridgeResult<HttpResponse> {
            self.requests.lock().unwrap().push((request, Some(policy)));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "")))
        }
    }

    fn api(client: RecordingHttpClient) -> (PlatformApi, Arc<RecordingHttpClient>) {
        let client = Arc::new(client);
        let api = PlatformApi::new(
            PlatformKind::MeditLink,
            Url::parse("https://api.lab.example/v1/").unwrap(),
            client.clone(),
            Duration::from_secs(30),
        );
        (api, client)
    }

    fn credential() -> PrimaryCredential {
        PrimaryCredential::new("primary-token").unwrap()
    }

    fn body_json(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(request.body.as_ref().unwrap()).unwrap()
    }

    #[test]
    fn test_endpoint_resolution() {
        let (api, _) = api(RecordingHttpClient::default());
        assert_eq!(
            api.endpoint("callback").unwrap().as_str(),
            "https://api.lab.example/v1/meditlink/auth/callback"
        );
    }

    #[tokio::test]
    async fn test_exchange_success_request_shape() {
        let (api, client) = api(RecordingHttpClient::default().respond(
            200,
            r#"{"success":true,"user":{"name":"Jane Doe","email":"jane@lab.example","group":"Smile Lab"}}"#,
        ));

        let outcome = api
            .exchange(&credential(), "abc123", Some("xyz"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Linked(Some(LinkedUser {
                name: "Jane Doe".to_string(),
                email: "jane@lab.example".to_string(),
                group_name: Some("Smile Lab".to_string()),
            }))
        );

        let (request, policy) = client.last();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer primary-token")
        );
        assert!(request.with_credentials);
        assert_eq!(policy.unwrap().max_attempts, 1);
        assert_eq!(
            body_json(&request),
            serde_json::json!({"code": "abc123", "state": "xyz"})
        );
    }

    #[tokio::test]
    async fn test_exchange_omits_absent_state() {
        let (api, client) = api(RecordingHttpClient::default().respond(200, r#"{"success":true}"#));

        let outcome = api.exchange(&credential(), "abc123", None).await.unwrap();
        assert_eq!(outcome, ExchangeOutcome::Linked(None));
        assert_eq!(
            body_json(&client.last().0),
            serde_json::json!({"code": "abc123"})
        );
    }

    #[tokio::test]
    async fn test_exchange_outcomes() {
        let (api, _) = api(RecordingHttpClient::default()
            .respond(401, "")
            .respond(400, r#"{"error":"invalid_grant"}"#)
            .respond(200, r#"{"success":false,"message":"group not found"}"#)
            .respond(502, "<html>bad gateway</html>"));

        let cred = credential();
        assert_eq!(
            api.exchange(&cred, "c", None).await.unwrap(),
            ExchangeOutcome::Unauthorized
        );
        assert_eq!(
            api.exchange(&cred, "c", None).await.unwrap(),
            ExchangeOutcome::Rejected {
                status: 400,
                reason: Some("invalid_grant".to_string())
            }
        );
        assert_eq!(
            api.exchange(&cred, "c", None).await.unwrap(),
            ExchangeOutcome::Rejected {
                status: 200,
                reason: Some("group not found".to_string())
            }
        );
        assert_eq!(
            api.exchange(&cred, "c", None).await.unwrap(),
            ExchangeOutcome::Rejected {
                status: 502,
                reason: None
            }
        );
    }

    #[tokio::test]
    async fn test_exchange_transport_error() {
        let (api, _) = api(
            RecordingHttpClient::default().fail(BridgeError::Timeout("30s elapsed".to_string())),
        );

        let err = api.exchange(&credential(), "c", None).await.unwrap_err();
        assert!(matches!(err, LinkError::Network(_)));
    }

    #[tokio::test]
    async fn test_group_object_and_epoch_expiry() {
        let (api, _) = api(RecordingHttpClient::default().respond(
            200,
            r#"{"authenticated":true,"user":{"name":"Jane Doe","email":"jane@lab.example","group":{"name":"Smile Lab"}},"expiresAt":1767225600}"#,
        ));

        let snapshot = api.status(&credential()).await.unwrap();
        assert!(snapshot.authenticated);
        assert_eq!(
            snapshot.user.unwrap().group_name.as_deref(),
            Some("Smile Lab")
        );
        assert_eq!(
            snapshot.expires_at.unwrap().to_rfc3339(),
            "2026-01-01T00:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_status_rfc3339_and_millis_expiry() {
        let (api, _) = api(RecordingHttpClient::default()
            .respond(200, r#"{"authenticated":true,"expiresAt":"2026-01-01T00:00:00Z"}"#)
            .respond(200, r#"{"authenticated":true,"expiresAt":1767225600000}"#)
            .respond(200, r#"{"authenticated":false}"#));

        let cred = credential();
        let text = api.status(&cred).await.unwrap().expires_at.unwrap();
        let millis = api.status(&cred).await.unwrap().expires_at.unwrap();
        assert_eq!(text, millis);

        let signed_out = api.status(&cred).await.unwrap();
        assert_eq!(signed_out, AuthStatusSnapshot::unauthenticated());
    }

    #[tokio::test]
    async fn test_refresh_failure_carries_status() {
        let (api, _) = api(RecordingHttpClient::default()
            .respond(204, "")
            .respond(500, r#"{"message":"upstream down"}"#));

        api.refresh(&credential()).await.unwrap();
        let err = api.refresh(&credential()).await.unwrap_err();
        assert_eq!(
            err,
            LinkError::RefreshFailed("HTTP 500: upstream down".to_string())
        );
    }

    #[tokio::test]
    async fn test_refresh_is_a_single_attempt() {
        let (api, client) = api(RecordingHttpClient::default().respond(503, ""));

        api.refresh(&credential()).await.unwrap_err();
        assert_eq!(client.requests.lock().unwrap().len(), 1);
        let (request, policy) = client.last();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(policy.unwrap().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_login_url() {
        let (api, client) = api(RecordingHttpClient::default()
            .respond(
                200,
                r#"{"success":true,"authUrl":"https://login.meditlink.com/oauth/authorize?client_id=lab"}"#,
            )
            .respond(200, r#"{"success":false,"error":"platform disabled"}"#));

        let url = api.login_url(&credential()).await.unwrap();
        assert_eq!(url.host_str(), Some("login.meditlink.com"));
        assert_eq!(client.last().0.method, HttpMethod::Get);

        let err = api.login_url(&credential()).await.unwrap_err();
        assert_eq!(
            err,
            LinkError::InvalidResponse("platform disabled".to_string())
        );
    }

    #[tokio::test]
    async fn test_logout_sends_no_body() {
        let (api, client) = api(RecordingHttpClient::default().respond(200, "{}"));

        api.logout(&credential()).await.unwrap();
        let (request, _) = client.last();
        assert!(request.body.is_none());
        assert!(request.url.ends_with("/meditlink/auth/logout"));
    }
}
