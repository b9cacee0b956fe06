//! Active user and identity session, cached in memory and persisted through
//! the persistence adapter.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::KinveyResult;
use crate::persistence::PersistenceAdapter;

pub const ACTIVE_USER_COLLECTION: &str = "kinvey-active-user";
pub const IDENTITY_SESSION_COLLECTION: &str = "kinvey-identity-session";

/// Identity provider key used inside `_socialIdentity`.
pub const MIC_IDENTITY: &str = "kinveyAuth";

const SLOT_ID: &str = "active";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authtoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lmt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ect: Option<String>,
}

/// The logged-in user as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "_kmd", default)]
    pub kmd: UserMetadata,
    #[serde(rename = "_socialIdentity", default, skip_serializing_if = "Option::is_none")]
    pub social_identity: Option<Value>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ActiveUser {
    pub fn auth_token(&self) -> Option<&str> {
        self.kmd.authtoken.as_deref()
    }
}

/// Cached third-party credentials used to renew an expired session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySession {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

pub struct Session {
    adapter: Arc<dyn PersistenceAdapter>,
    user: RwLock<Option<ActiveUser>>,
}

impl Session {
    /// Restore the persisted active user, if any.
    pub async fn load(adapter: Arc<dyn PersistenceAdapter>) -> KinveyResult<Self> {
        let user = match adapter.find(ACTIVE_USER_COLLECTION, None).await?.pop() {
            Some(mut doc) => {
                if let Some(obj) = doc.as_object_mut() {
                    // The slot id was only used for storage.
                    if let Some(Value::String(id)) = obj.remove("_userId") {
                        obj.insert("_id".to_string(), Value::String(id));
                    }
                }
                Some(serde_json::from_value(doc)?)
            }
            None => None,
        };

        Ok(Self {
            adapter,
            user: RwLock::new(user),
        })
    }

    pub fn active_user(&self) -> Option<ActiveUser> {
        self.user.read().clone()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.user
            .read()
            .as_ref()
            .and_then(|u| u.auth_token().map(str::to_string))
    }

    /// Replace the active user, persisting the change.
    pub async fn set_active_user(&self, user: Option<ActiveUser>) -> KinveyResult<()> {
        self.adapter.clean(ACTIVE_USER_COLLECTION, None).await?;
        if let Some(user) = &user {
            let mut doc = serde_json::to_value(user)?;
            if let Some(obj) = doc.as_object_mut() {
                if let Some(id) = obj.remove("_id") {
                    obj.insert("_userId".to_string(), id);
                }
                obj.insert("_id".to_string(), Value::String(SLOT_ID.to_string()));
            }
            self.adapter.save(ACTIVE_USER_COLLECTION, doc).await?;
        }
        debug!(user = ?user.as_ref().map(|u| u.id.as_str()), "Active user changed");
        *self.user.write() = user;
        Ok(())
    }

    pub async fn identity_session(&self) -> KinveyResult<Option<IdentitySession>> {
        match self.adapter.find(IDENTITY_SESSION_COLLECTION, None).await?.pop() {
            Some(mut doc) => {
                if let Some(obj) = doc.as_object_mut() {
                    obj.remove("_id");
                }
                Ok(Some(serde_json::from_value(doc)?))
            }
            None => Ok(None),
        }
    }

    pub async fn set_identity_session(&self, session: Option<IdentitySession>) -> KinveyResult<()> {
        self.adapter.clean(IDENTITY_SESSION_COLLECTION, None).await?;
        if let Some(session) = session {
            let mut doc = serde_json::to_value(&session)?;
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("_id".to_string(), Value::String(SLOT_ID.to_string()));
            }
            self.adapter.save(IDENTITY_SESSION_COLLECTION, doc).await?;
        }
        Ok(())
    }
}
