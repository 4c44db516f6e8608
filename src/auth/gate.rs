use std::sync::{Arc, Mutex, PoisonError};
use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;
use crate::config::Config;
use crate::core::{RefreshError, Result, UploadError};
use crate::notify::{Notifier, TracingNotifier, notification_for};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::utils::ProgressSender;
use super::models::{AuthTokens, LoginRequest, RefreshRequest};
use super::token_store::TokenStore;

type RefreshOutcome = std::result::Result<String, RefreshError>;

/// `Refreshing` holds every request parked on the in-flight refresh, the one that started it included.
enum RefreshState {
    Idle,
    Refreshing(Vec<oneshot::Sender<RefreshOutcome>>),
}

struct GateInner {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    login_url: String,
    refresh_url: String,
    state: Mutex<RefreshState>,
}

/// Wraps outgoing requests with the bearer token and recovers from 401 with a single-flight refresh.
///
/// Cloning is cheap; all clones share one refresh state, so concurrent 401s
/// coalesce onto a single call to the refresh endpoint.
#[derive(Clone)]
pub struct AuthGate {
    inner: Arc<GateInner>,
}

impl AuthGate {
    pub fn new(config: &Config, transport: Arc<dyn Transport>, tokens: Arc<dyn TokenStore>) -> Self {
        Self::with_notifier(config, transport, tokens, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        config: &Config,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                transport,
                tokens,
                notifier,
                login_url: config.login_url(),
                refresh_url: config.refresh_url(),
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.inner.tokens
    }

    /// Sends `request`, retrying it once with a renewed token if the server answers 401.
    pub async fn send(&self, request: ApiRequest, progress: Option<ProgressSender>) -> Result<ApiResponse> {
        let url = request.url.clone();
        let result = self.dispatch(request, progress).await;

        if let Err(err) = &result {
            debug!(%url, %err, "Request failed");
            // 刷新失败已经在 refresh 里提示过一次
            if matches!(err, UploadError::RefreshFailed(_)) {
                return result;
            }
            if let Some(message) = notification_for(err) {
                self.inner.notifier.error(&message);
            }
        }
        result
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthTokens> {
        let request = ApiRequest::post_json(
            self.inner.login_url.clone(),
            &LoginRequest { email: email.to_string(), password: password.to_string() },
        )?;

        let tokens: AuthTokens = self.send(request, None).await?.json()?;
        self.inner.tokens.set_tokens(&tokens);

        info!(email, expires_in = ?tokens.expires_in, "Logged in");
        self.inner.notifier.info("Signed in");
        Ok(tokens)
    }

    pub fn logout(&self) {
        self.inner.tokens.clear();
        info!("Logged out");
    }

    /// True only while an access token exists and its `exp` lies in the future.
    pub fn is_authenticated(&self) -> bool {
        let tokens = &self.inner.tokens;
        tokens
            .access_token()
            .and_then(|token| tokens.token_expiration(&token))
            .is_some_and(|exp| exp > Utc::now())
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing(_))
    }

    /// Requests currently parked on the in-flight refresh.
    pub fn pending_refresh_waiters(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Refreshing(waiters) => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_auth_url(url: &str) -> bool {
        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        path.ends_with("/auth/login") || path.ends_with("/auth/refresh")
    }

    async fn dispatch(&self, request: ApiRequest, progress: Option<ProgressSender>) -> Result<ApiResponse> {
        let transport = &self.inner.transport;

        // 登录、刷新接口本身不带 token，也不触发刷新
        if Self::is_auth_url(&request.url) {
            return transport.execute(request, progress).await?.into_result();
        }

        let outgoing = match self.inner.tokens.access_token() {
            Some(token) => request.with_bearer(&token)?,
            None => request.clone(),
        };

        let response = transport.execute(outgoing, progress.clone()).await?;
        if response.status != 401 {
            return response.into_result();
        }

        debug!(url = %request.url, "Access token rejected, waiting for refresh");
        let token = self.fresh_token().await?;
        let replay = request.with_bearer(&token)?;
        transport.execute(replay, progress).await?.into_result()
    }

    /// Parks on the in-flight refresh, starting one if none is running.
    async fn fresh_token(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut state = self.lock_state();
            match &mut *state {
                RefreshState::Refreshing(waiters) => {
                    waiters.push(tx);
                    false
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing(vec![tx]);
                    true
                }
            }
        };

        // 刷新在独立任务里跑：发起它的请求被取消时，其他等待者仍能拿到结果
        if start {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.refresh_and_release().await });
        }

        let outcome = rx
            .await
            .map_err(|_| UploadError::internal("Token refresh was abandoned"))?;
        Ok(outcome?)
    }
}

impl GateInner {
    async fn refresh_and_release(&self) {
        let outcome = self.refresh().await;

        let waiters = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing(waiters) => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        info!(waiters = waiters.len(), success = outcome.is_ok(), "Token refresh settled");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        let outcome = self.request_new_token().await;

        if let Err(err) = &outcome {
            warn!(%err, "Token refresh failed, forcing logout");
            self.tokens.clear();
            if let Some(message) = notification_for(&UploadError::RefreshFailed(err.clone())) {
                self.notifier.error(&message);
            }
        }
        outcome
    }

    async fn request_new_token(&self) -> RefreshOutcome {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        let request = ApiRequest::post_json(self.refresh_url.clone(), &RefreshRequest { refresh_token })
            .map_err(|err| RefreshError::Network(err.to_string()))?;

        let response = self
            .transport
            .execute(request, None)
            .await
            .map_err(|err| RefreshError::Network(err.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::Rejected { status: response.status });
        }

        let tokens: AuthTokens = response.json().map_err(|_| RefreshError::MissingAccessToken)?;
        let access_token = tokens
            .usable_access_token()
            .ok_or(RefreshError::MissingAccessToken)?
            .to_string();

        self.tokens.set_tokens(&tokens);
        debug!("Stored refreshed tokens");
        Ok(access_token)
    }
}
