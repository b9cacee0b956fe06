use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{authorize, client_auth};
use crate::config::ClientConfig;
use crate::error::{KinveyError, KinveyResult};
use crate::rack::Rack;
use crate::request::{AuthType, Body, Request, Response};
use crate::session::{ActiveUser, IdentitySession, Session, MIC_IDENTITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Normal,
    Refreshing,
}

/// Wraps the network rack. A session request rejected with
/// `InvalidCredentials` is retried once after renewing the session from the
/// cached identity session.
pub struct AuthRefreshInterceptor {
    config: Arc<ClientConfig>,
    rack: Arc<Rack>,
    session: Arc<Session>,
    state: Mutex<AuthState>,
    refresh_slot: tokio::sync::Mutex<()>,
}

/// Puts the interceptor back into `Normal` however the refresh ends.
struct RefreshingGuard<'a>(&'a Mutex<AuthState>);

impl<'a> RefreshingGuard<'a> {
    fn enter(state: &'a Mutex<AuthState>) -> Self {
        *state.lock() = AuthState::Refreshing;
        Self(state)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = AuthState::Normal;
    }
}

impl AuthRefreshInterceptor {
    pub fn new(config: Arc<ClientConfig>, rack: Arc<Rack>, session: Arc<Session>) -> Self {
        Self {
            config,
            rack,
            session,
            state: Mutex::new(AuthState::Normal),
            refresh_slot: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock()
    }

    pub fn rack(&self) -> &Arc<Rack> {
        &self.rack
    }

    /// Authorize and run one request through the network rack.
    async fn send(&self, mut request: Request) -> KinveyResult<Response> {
        authorize(&mut request, &self.config, &self.session)?;
        self.rack.execute(request).await
    }

    /// Execute `request`, returning the response on success and the mapped
    /// error otherwise.
    pub async fn execute(&self, request: Request) -> KinveyResult<Response> {
        let token = self.session.auth_token();
        let response = self.send(request.clone()).await?;
        let Some(error) = response.error() else {
            return Ok(response);
        };

        let uses_session = match request.auth {
            AuthType::Session => true,
            AuthType::All => token.is_some(),
            _ => false,
        };
        if !uses_session || !matches!(error, KinveyError::InvalidCredentials(_)) {
            return Err(error);
        }

        match self.refresh(token.as_deref()).await {
            Ok(()) => {
                debug!(url = %request.url, "Retrying request with refreshed session");
                self.send(request).await?.into_result()
            }
            Err(refresh_error) => {
                debug!(error = %refresh_error, "Session could not be refreshed");
                Err(error)
            }
        }
    }

    async fn refresh(&self, stale_token: Option<&str>) -> KinveyResult<()> {
        let _slot = self.refresh_slot.lock().await;

        // Another request refreshed the session while this one waited.
        if self.session.auth_token().as_deref() != stale_token {
            return Ok(());
        }

        let identity = self.session.identity_session().await?.ok_or_else(|| {
            KinveyError::InvalidCredentials("No identity session is cached".to_string())
        })?;
        let refresh_token = identity.refresh_token.clone().ok_or_else(|| {
            KinveyError::InvalidCredentials("The identity session has no refresh token".to_string())
        })?;

        let _refreshing = RefreshingGuard::enter(&self.state);
        match self.renew(identity, refresh_token).await {
            Ok(user) => {
                info!(user = %user, "Session refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                Err(e)
            }
        }
    }

    /// Token grant, re-login, persistence. Returns the new user id.
    async fn renew(&self, identity: IdentitySession, refresh_token: String) -> KinveyResult<String> {
        let client_id = identity
            .client_id
            .clone()
            .or_else(|| self.config.mic_client_id.clone())
            .unwrap_or_else(|| self.config.app_key.clone());
        let redirect_uri = identity
            .redirect_uri
            .clone()
            .or_else(|| self.config.mic_redirect_uri.clone());

        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("client_id".to_string(), client_id.clone()),
            ("refresh_token".to_string(), refresh_token.clone()),
        ];
        if let Some(uri) = &redirect_uri {
            form.push(("redirect_uri".to_string(), uri.clone()));
        }

        let grant = Request::post(self.config.token_url())
            .with_auth(client_auth(&self.config))
            .with_body(Body::Form(form));
        let token = self.send(grant).await?.into_json()?;

        let access_token = token
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                KinveyError::InvalidCredentials("The token response has no access_token".to_string())
            })?
            .to_string();

        let refreshed = IdentitySession {
            access_token,
            refresh_token: token
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(Some(refresh_token)),
            token_type: token
                .get("token_type")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(identity.token_type),
            expires_in: token.get("expires_in").and_then(Value::as_i64),
            client_id: Some(client_id),
            redirect_uri,
        };

        let login = Request::post(
            self.config
                .api_url(&format!("/user/{}/login", self.config.app_key)),
        )
        .with_auth(client_auth(&self.config))
        .with_json(json!({ "_socialIdentity": { MIC_IDENTITY: &refreshed } }));
        let user: ActiveUser = serde_json::from_value(self.send(login).await?.into_json()?)?;

        let id = user.id.clone();
        self.session.set_active_user(Some(user)).await?;
        self.session.set_identity_session(Some(refreshed)).await?;
        Ok(id)
    }
}
