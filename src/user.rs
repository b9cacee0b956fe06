//! Login, logout and the active user.

use serde_json::json;
use tracing::{info, warn};

use crate::auth::client_auth;
use crate::client::Client;
use crate::error::{KinveyError, KinveyResult};
use crate::request::{AuthType, Request};
use crate::session::{ActiveUser, IdentitySession, MIC_IDENTITY};

pub struct UserService {
    client: Client,
}

impl UserService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn active_user(&self) -> Option<ActiveUser> {
        self.client.session().active_user()
    }

    fn user_url(&self, action: &str) -> String {
        self.client
            .config()
            .api_url(&format!("/user/{}/{}", self.client.config().app_key, action))
    }

    fn ensure_logged_out(&self) -> KinveyResult<()> {
        match self.active_user() {
            Some(user) => Err(KinveyError::Configuration(format!(
                "User {} is already logged in",
                user.id
            ))),
            None => Ok(()),
        }
    }

    async fn submit_login(&self, body: serde_json::Value) -> KinveyResult<ActiveUser> {
        let request = Request::post(self.user_url("login"))
            .with_auth(client_auth(self.client.config()))
            .with_json(body);
        let user: ActiveUser =
            serde_json::from_value(self.client.execute_network(request).await?.into_json()?)?;
        self.client.session().set_active_user(Some(user.clone())).await?;
        Ok(user)
    }

    pub async fn login(&self, username: &str, password: &str) -> KinveyResult<ActiveUser> {
        self.ensure_logged_out()?;
        let user = self
            .submit_login(json!({ "username": username, "password": password }))
            .await?;
        info!(user = %user.id, "Logged in");
        Ok(user)
    }

    /// Log in with tokens obtained from the identity provider. The identity
    /// session is cached so an expired session can be renewed later.
    pub async fn login_with_identity(&self, identity: IdentitySession) -> KinveyResult<ActiveUser> {
        self.ensure_logged_out()?;
        let user = self
            .submit_login(json!({ "_socialIdentity": { MIC_IDENTITY: &identity } }))
            .await?;
        self.client
            .session()
            .set_identity_session(Some(identity))
            .await?;
        info!(user = %user.id, "Logged in with identity provider");
        Ok(user)
    }

    /// End the session. The backend is told on a best-effort basis; the local
    /// session is cleared either way.
    pub async fn logout(&self) -> KinveyResult<()> {
        if self.active_user().is_some() {
            let request = Request::post(self.user_url("_logout")).with_auth(AuthType::Session);
            if let Err(e) = self.client.execute_network(request).await {
                warn!(error = %e, "Remote logout failed");
            }
        }
        let session = self.client.session();
        session.set_active_user(None).await?;
        session.set_identity_session(None).await?;
        info!("Logged out");
        Ok(())
    }

    /// Reload the active user from the backend.
    pub async fn me(&self) -> KinveyResult<ActiveUser> {
        let current = self.active_user().ok_or(KinveyError::NoActiveUser)?;
        let request = Request::get(self.user_url("_me")).with_auth(AuthType::Session);
        let mut user: ActiveUser =
            serde_json::from_value(self.client.execute_network(request).await?.into_json()?)?;
        if user.kmd.authtoken.is_none() {
            user.kmd.authtoken = current.kmd.authtoken;
        }
        self.client.session().set_active_user(Some(user.clone())).await?;
        Ok(user)
    }
}
