//! Configuration module

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Remote device directory
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub reject_invalid_cert: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            display_name: default_display_name(),
            reject_invalid_cert: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Client-credentials grant against the token issuer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Issuer base URL; a missing trailing `/` is added on load
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl AuthConfig {
    /// Issuer URL ending in exactly one `/`, empty when unset.
    ///
    /// Endpoint paths are appended to it directly, so without the slash
    /// `https://issuer.example` would turn into another host.
    pub fn issuer_base(&self) -> String {
        let issuer = self.issuer.trim();
        if issuer.is_empty() || issuer.ends_with('/') {
            issuer.to_string()
        } else {
            format!("{}/", issuer)
        }
    }

    /// Issuer endpoint such as `oauth/token`
    pub fn issuer_url(&self, path: &str) -> String {
        format!("{}{}", self.issuer_base(), path.trim_start_matches('/'))
    }
}

/// Push ingestion listener
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default = "default_required_scope")]
    pub required_scope: String,
    /// HS256 secret accepted instead of the issuer's JWKS
    #[serde(default)]
    pub shared_secret: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            require_auth: false,
            required_scope: default_required_scope(),
            shared_secret: None,
        }
    }
}

/// How a characteristic set is acknowledged to the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetAcknowledgement {
    /// Acknowledge once the remote call is dispatched
    #[default]
    Optimistic,
    /// Acknowledge after the remote side accepted the value
    Confirmed,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub set_acknowledgement: SetAcknowledgement,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between discovery cycles, 0 runs discovery at startup only
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,
    /// Delay before the startup discovery cycle
    #[serde(default)]
    pub initial_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            initial_delay_secs: 0,
        }
    }
}

fn default_display_name() -> String {
    "Remote API".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_required_scope() -> String {
    "write:api".to_string()
}

fn default_sync_interval() -> u64 {
    300
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("DIRECT_CONNECT").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config.normalize())
    }

    fn normalize(mut self) -> Self {
        let issuer = self.auth.issuer_base();
        if issuer != self.auth.issuer {
            tracing::warn!(
                "[Config] auth.issuer {:?} normalized to {:?}",
                self.auth.issuer,
                issuer
            );
            self.auth.issuer = issuer;
        }
        self
    }
}
