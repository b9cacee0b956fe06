//! Client configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KinveyError, KinveyResult};

pub const DEFAULT_API_HOST: &str = "https://baas.kinvey.com";
pub const DEFAULT_AUTH_HOST: &str = "https://auth.kinvey.com";
pub const DEFAULT_MIC_TOKEN_PATH: &str = "/oauth/token";
pub const DEFAULT_API_VERSION: u32 = 4;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CUSTOM_PROPERTIES_MAX_BYTES: usize = 2000;

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub app_key: String,
    pub app_secret: Option<String>,
    pub master_secret: Option<String>,
    pub api_host: String,
    pub auth_host: String,
    pub mic_token_path: String,
    pub mic_redirect_uri: Option<String>,
    pub mic_client_id: Option<String>,
    pub api_version: u32,
    pub default_timeout: Duration,
    pub custom_request_properties_max_bytes: usize,
    pub device_info: Option<String>,
    /// Whether cache stores push a written entity right away.
    pub auto_sync: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: None,
            master_secret: None,
            api_host: DEFAULT_API_HOST.to_string(),
            auth_host: DEFAULT_AUTH_HOST.to_string(),
            mic_token_path: DEFAULT_MIC_TOKEN_PATH.to_string(),
            mic_redirect_uri: None,
            mic_client_id: None,
            api_version: DEFAULT_API_VERSION,
            default_timeout: DEFAULT_TIMEOUT,
            custom_request_properties_max_bytes: DEFAULT_CUSTOM_PROPERTIES_MAX_BYTES,
            device_info: Some(default_device_info()),
            auto_sync: true,
        }
    }
}

fn default_device_info() -> String {
    serde_json::json!({
        "hv": 1,
        "os": env::consts::OS,
        "ov": env::consts::ARCH,
        "sdk": {"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")},
        "pv": "rust",
    })
    .to_string()
}

impl ClientConfig {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: Some(app_secret.into()),
            ..Self::default()
        }
    }

    pub fn with_master_secret(mut self, secret: impl Into<String>) -> Self {
        self.master_secret = Some(secret.into());
        self
    }

    pub fn with_api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = trim_host(host.into());
        self
    }

    pub fn with_auth_host(mut self, host: impl Into<String>) -> Self {
        self.auth_host = trim_host(host.into());
        self
    }

    pub fn with_mic_token_path(mut self, path: impl Into<String>) -> Self {
        self.mic_token_path = path.into();
        self
    }

    pub fn with_mic_client(mut self, client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        self.mic_client_id = Some(client_id.into());
        self.mic_redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_custom_request_properties_max_bytes(mut self, max: usize) -> Self {
        self.custom_request_properties_max_bytes = max;
        self
    }

    pub fn with_device_info(mut self, info: Option<String>) -> Self {
        self.device_info = info;
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    /// Build a configuration from `KINVEY_*` environment variables.
    pub fn from_env() -> KinveyResult<Self> {
        let app_key = env::var("KINVEY_APP_KEY")
            .map_err(|_| KinveyError::Configuration("KINVEY_APP_KEY is not set".to_string()))?;

        let mut config = Self {
            app_key,
            app_secret: env::var("KINVEY_APP_SECRET").ok(),
            master_secret: env::var("KINVEY_MASTER_SECRET").ok(),
            ..Self::default()
        };

        if let Ok(host) = env::var("KINVEY_API_HOST") {
            config.api_host = trim_host(host);
        }
        if let Ok(host) = env::var("KINVEY_AUTH_HOST") {
            config.auth_host = trim_host(host);
        }
        if let Ok(path) = env::var("KINVEY_MIC_TOKEN_PATH") {
            config.mic_token_path = path;
        }
        if let Ok(version) = env::var("KINVEY_API_VERSION") {
            config.api_version = version.parse().map_err(|_| {
                KinveyError::Configuration(format!("KINVEY_API_VERSION is not a number: {}", version))
            })?;
        }
        if let Ok(timeout) = env::var("KINVEY_DEFAULT_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                KinveyError::Configuration(format!(
                    "KINVEY_DEFAULT_TIMEOUT_MS must be an integer: {}",
                    timeout
                ))
            })?;
            config.default_timeout = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KinveyResult<()> {
        if self.app_key.is_empty() {
            return Err(KinveyError::Configuration("An app key is required".to_string()));
        }
        if self.app_secret.is_none() && self.master_secret.is_none() {
            return Err(KinveyError::Configuration(
                "An app secret or a master secret is required".to_string(),
            ));
        }
        url::Url::parse(&self.api_host)
            .map_err(|e| KinveyError::Configuration(format!("Invalid api host: {}", e)))?;
        url::Url::parse(&self.auth_host)
            .map_err(|e| KinveyError::Configuration(format!("Invalid auth host: {}", e)))?;
        Ok(())
    }

    /// Absolute URL of an API path such as `/appdata/<appKey>/books`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_host, path)
    }

    /// `/appdata/<appKey>/<collection>[/<id>]` on the api host.
    pub fn data_url(&self, collection: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => self.api_url(&format!("/appdata/{}/{}/{}", self.app_key, collection, id)),
            None => self.api_url(&format!("/appdata/{}/{}", self.app_key, collection)),
        }
    }

    /// Absolute URL of the identity provider token endpoint.
    pub fn token_url(&self) -> String {
        format!("{}{}", self.auth_host, self.mic_token_path)
    }
}

fn trim_host(host: String) -> String {
    host.trim_end_matches('/').to_string()
}

/// Which embedded engine backs local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Sqlite { path: PathBuf },
    RocksDb { path: PathBuf },
    Memory,
}

impl StorageConfig {
    /// SQLite file under the platform data directory.
    pub fn open_default(app_name: &str) -> KinveyResult<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            KinveyError::Configuration("No data directory available on this platform".to_string())
        })?;
        Ok(StorageConfig::Sqlite {
            path: base.join(app_name).join("kinvey.sqlite"),
        })
    }
}
