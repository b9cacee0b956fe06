//! Authorization headers and transparent session refresh.

mod refresh;

pub use refresh::{AuthRefreshInterceptor, AuthState};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::ClientConfig;
use crate::error::{KinveyError, KinveyResult};
use crate::request::{AuthType, Request};
use crate::session::Session;

fn basic(user: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, secret)))
}

fn app_credentials(config: &ClientConfig) -> KinveyResult<String> {
    let secret = config.app_secret.as_deref().ok_or_else(|| {
        KinveyError::Configuration("An app secret is required for app authorization".to_string())
    })?;
    Ok(basic(&config.app_key, secret))
}

fn master_credentials(config: &ClientConfig) -> KinveyResult<String> {
    let secret = config.master_secret.as_deref().ok_or_else(|| {
        KinveyError::Configuration("A master secret is required for master authorization".to_string())
    })?;
    Ok(basic(&config.app_key, secret))
}

/// Credentials the app authenticates itself with: the app secret when one is
/// configured, the master secret otherwise.
pub fn client_auth(config: &ClientConfig) -> AuthType {
    if config.app_secret.is_some() {
        AuthType::App
    } else {
        AuthType::Master
    }
}

/// Compute the `Authorization` header for `request` from its [`AuthType`].
pub fn authorize(request: &mut Request, config: &ClientConfig, session: &Session) -> KinveyResult<()> {
    let header = match request.auth {
        AuthType::None => None,
        AuthType::App => Some(app_credentials(config)?),
        AuthType::Master => Some(master_credentials(config)?),
        AuthType::Session => {
            let token = session.auth_token().ok_or(KinveyError::NoActiveUser)?;
            Some(format!("Kinvey {}", token))
        }
        AuthType::All => match session.auth_token() {
            Some(token) => Some(format!("Kinvey {}", token)),
            None if config.app_secret.is_some() => Some(app_credentials(config)?),
            None => Some(master_credentials(config)?),
        },
    };

    match header {
        Some(value) => request.headers.set("Authorization", value),
        None => {
            request.headers.remove("Authorization");
        }
    }
    Ok(())
}
