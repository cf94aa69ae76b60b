//! Authenticated HTTP client with single-flight token refresh.
//!
//! Every protected request carries `Authorization: Bearer <token>` from the
//! shared [`TokenStore`]. A 401 on a protected request joins (or starts) the
//! one refresh attempt in flight, then retries once with the new token. A
//! second 401, a failed refresh, or a 401 from the refresh endpoint itself
//! evicts the session and emits [`SessionEvent::Unauthenticated`].

use std::sync::Arc;

use changa_shared::{
    bearer, ApiError, AuthMessage, AuthResponse, ForgotPasswordRequest, LoginRequest,
    RefreshResponse, RegisterRequest, ResetPasswordRequest, Session, User, VerifyOtpRequest,
    FORGOT_PASSWORD_PATH, HEADER_NEW_TOKEN, LOGIN_PATH, REFRESH_TOKEN_PATH, REGISTER_PATH,
    RESET_PASSWORD_PATH, VERIFY_OTP_PATH,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::config::ClientConfig;
use crate::token_store::TokenStore;

const EVENT_CAPACITY: usize = 16;

/// Session lifecycle notifications for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: String },
    TokenRefreshed,
    /// The user signed out on purpose.
    LoggedOut,
    /// The session was evicted; the application should route to its login surface.
    Unauthenticated,
}

/// One outbound API call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: String,
    body: Option<Vec<u8>>,
    retried: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        self.body = Some(bytes);
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether this request is already the one permitted retry.
    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let body = if self.body.trim().is_empty() {
            "null"
        } else {
            self.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

#[derive(Debug, Clone)]
struct RefreshFailure(String);

type RefreshAttempt = Shared<BoxFuture<'static, Result<String, RefreshFailure>>>;

struct Inner {
    http: Client,
    config: ClientConfig,
    tokens: Arc<TokenStore>,
    /// The refresh in flight, if any. Cleared when it settles.
    refresh: Mutex<Option<RefreshAttempt>>,
    events: broadcast::Sender<SessionEvent>,
}

/// HTTP client that keeps the session authenticated.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("api_base_url", &self.inner.config.api_base_url)
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}

impl SessionClient {
    pub fn new(config: ClientConfig, tokens: Arc<TokenStore>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                tokens,
                refresh: Mutex::new(None),
                events,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    /// Subscribe to session lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Send a request through the authentication pipeline.
    ///
    /// Non-401 failures are returned as-is. Timeouts come back as
    /// [`ApiError::Timeout`] and never trigger a refresh.
    #[tracing::instrument(skip_all, fields(method = %spec.method, path = %spec.path))]
    pub async fn request(&self, mut spec: RequestSpec) -> Result<ApiResponse, ApiError> {
        let public = self.inner.config.is_public(&spec.path);

        loop {
            let token = if public {
                None
            } else {
                self.inner.tokens.token()
            };
            let response = self.dispatch(&spec, token.as_deref()).await?;

            if response.status != 401 || public {
                return into_result(response);
            }

            if self.inner.config.endpoint_path(&spec.path) == REFRESH_TOKEN_PATH {
                self.evict("refresh endpoint rejected the session");
                return Err(ApiError::Unauthenticated);
            }
            if spec.retried {
                self.evict("request still unauthorized after refresh");
                return Err(ApiError::Unauthenticated);
            }

            tracing::debug!("unauthorized, refreshing session");
            self.refresh_after_unauthorized(token.as_deref()).await?;
            spec.retried = true;
        }
    }

    async fn dispatch(
        &self,
        spec: &RequestSpec,
        token: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.inner.config.api_url(&spec.path);
        let mut rb = self.inner.http.request(spec.method.clone(), &url);

        if let Some(token) = token {
            rb = rb.header(AUTHORIZATION, bearer(token));
        }
        if let Some(body) = &spec.body {
            rb = rb
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let resp = rb.send().await.map_err(transport_error)?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await.map_err(transport_error)?;

        tracing::debug!(status, "response received");
        self.rotate_token(&headers);

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Apply a server-rotated token from `x-new-token`, if any.
    fn rotate_token(&self, headers: &HeaderMap) {
        let Some(token) = headers
            .get(HEADER_NEW_TOKEN)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return;
        };
        if self.inner.tokens.set_token(token) {
            tracing::debug!("token rotated by server");
        }
    }

    /// Wait for a usable token after `failed_token` was rejected.
    ///
    /// At most one refresh call runs at a time; concurrent callers share its
    /// outcome. A caller whose token was already replaced retries directly.
    async fn refresh_after_unauthorized(&self, failed_token: Option<&str>) -> Result<(), ApiError> {
        let attempt = {
            let mut slot = self.inner.refresh.lock().await;

            match self.inner.tokens.token() {
                None => {
                    // Either there never was a session, or a concurrent failure
                    // already evicted it and said so.
                    if failed_token.is_none() {
                        tracing::warn!("protected request rejected without a session");
                        self.notify(SessionEvent::Unauthenticated);
                    }
                    return Err(ApiError::Unauthenticated);
                }
                Some(current) if Some(current.as_str()) != failed_token => {
                    tracing::debug!("token already replaced, retrying");
                    return Ok(());
                }
                Some(_) => {}
            }

            match slot.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = self.clone().run_refresh().boxed().shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await.map(|_| ()).map_err(|_| ApiError::Unauthenticated)
    }

    async fn run_refresh(self) -> Result<String, RefreshFailure> {
        let outcome = match self.call_refresh_endpoint().await {
            Ok(token) if self.inner.tokens.set_token(&token) => {
                tracing::info!("session refreshed");
                self.notify(SessionEvent::TokenRefreshed);
                Ok(token)
            }
            Ok(_) => Err(RefreshFailure("session ended during refresh".to_string())),
            Err(failure) => {
                self.evict(&failure.0);
                Err(failure)
            }
        };

        self.inner.refresh.lock().await.take();
        outcome
    }

    async fn call_refresh_endpoint(&self) -> Result<String, RefreshFailure> {
        let url = self.inner.config.api_url(REFRESH_TOKEN_PATH);
        let mut rb = self.inner.http.post(&url);
        if let Some(token) = self.inner.tokens.token() {
            rb = rb.header(AUTHORIZATION, bearer(&token));
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| RefreshFailure(format!("refresh request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RefreshFailure(format!("refresh rejected with {status}")));
        }

        let body: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| RefreshFailure(format!("unreadable refresh response: {e}")))?;
        if body.token.trim().is_empty() {
            return Err(RefreshFailure("refresh returned an empty token".to_string()));
        }
        Ok(body.token)
    }

    fn evict(&self, reason: &str) {
        if self.inner.tokens.clear() {
            tracing::warn!(reason, "session evicted");
            self.notify(SessionEvent::Unauthenticated);
        }
    }

    fn notify(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    // --- Session lifecycle ---

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self.post_json(LOGIN_PATH, &body).await?;
        Ok(self.establish(auth))
    }

    /// Complete a sign-in that requires a one-time password.
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<User, ApiError> {
        let body = VerifyOtpRequest {
            email: email.to_string(),
            otp: otp.to_string(),
        };
        let auth: AuthResponse = self.post_json(VERIFY_OTP_PATH, &body).await?;
        Ok(self.establish(auth))
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthMessage, ApiError> {
        self.post_json(REGISTER_PATH, request).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<AuthMessage, ApiError> {
        let body = ForgotPasswordRequest {
            email: email.to_string(),
        };
        self.post_json(FORGOT_PASSWORD_PATH, &body).await
    }

    pub async fn reset_password(
        &self,
        token: &str,
        password: &str,
    ) -> Result<AuthMessage, ApiError> {
        let body = ResetPasswordRequest {
            token: token.to_string(),
            password: password.to_string(),
        };
        self.post_json(RESET_PASSWORD_PATH, &body).await
    }

    /// Sign out locally.
    pub fn logout(&self) {
        if self.inner.tokens.clear() {
            tracing::info!("logged out");
            self.notify(SessionEvent::LoggedOut);
        }
    }

    fn establish(&self, auth: AuthResponse) -> User {
        let user = auth.user.clone();
        self.inner.tokens.set(Session::new(auth.token, auth.user));
        tracing::info!(user_id = %user.id, "logged in");
        self.notify(SessionEvent::LoggedIn {
            user_id: user.id.clone(),
        });
        user
    }

    // --- Typed helpers ---

    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        self.request(RequestSpec::get(path)).await?.json()
    }

    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let spec = RequestSpec::new(Method::POST, path).with_json(body)?;
        self.request(spec).await?.json()
    }

    pub async fn put_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let spec = RequestSpec::new(Method::PUT, path).with_json(body)?;
        self.request(spec).await?.json()
    }

    pub async fn patch_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let spec = RequestSpec::new(Method::PATCH, path).with_json(body)?;
        self.request(spec).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request(RequestSpec::delete(path)).await.map(|_| ())
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

fn into_result(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if (200..300).contains(&response.status) {
        Ok(response)
    } else {
        Err(ApiError::Http {
            status: response.status,
            body: response.body,
        })
    }
}
