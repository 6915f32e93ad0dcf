use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::authors::DisplayPolicy;
use crate::error::{BridgeError, ConfigError};
use crate::forum::{Credentials, LoginMode};
use crate::models::ChatTarget;
use crate::store::{KvStore, TENANTS};

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub data_dir: Option<String>,
    pub forum_base_url: String,
    pub chat_api_base_url: String,
    pub trigger_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        fn opt(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        let bind_addr = opt("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into());
        if !bind_addr.contains(':') {
            return Err(ConfigError::InvalidVar { var: "BIND_ADDR", reason: "expected host:port".into() });
        }
        Ok(Self {
            bind_addr,
            database_url: opt("DATABASE_URL"),
            data_dir: opt("BRIDGE_DATA_DIR"),
            forum_base_url: opt("FORUM_BASE_URL").unwrap_or_else(|| "https://piazza.com".into()),
            chat_api_base_url: opt("CHAT_API_BASE_URL").unwrap_or_else(|| "https://slack.com/api".into()),
            trigger_token: opt("TRIGGER_TOKEN"),
        })
    }
}

fn default_username() -> String {
    "piazza".into()
}

/// One course's record, stored as JSON under the `class` partition.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantConfig {
    pub nid: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub login: LoginMode,
    pub slack_token: String,
    pub slack_channel: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub profile_base_url: Option<String>,
    #[serde(default)]
    pub strip_domain: Option<String>,
}

impl std::fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConfig")
            .field("nid", &self.nid)
            .field("email", &self.email)
            .field("slack_channel", &self.slack_channel)
            .finish_non_exhaustive()
    }
}

impl TenantConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials { email: self.email.clone(), password: self.password.clone(), mode: self.login }
    }

    pub fn chat_target(&self) -> ChatTarget {
        ChatTarget {
            token: self.slack_token.clone(),
            channel: self.slack_channel.clone(),
            username: self.username.clone(),
        }
    }

    pub fn display_policy(&self) -> DisplayPolicy {
        DisplayPolicy { strip_domain: self.strip_domain.clone(), profile_base_url: self.profile_base_url.clone() }
    }
}

/// Loads course records from the store once and keeps them for the life
/// of the process.
#[derive(Clone)]
pub struct TenantRegistry {
    store: Arc<dyn KvStore>,
    cache: Arc<DashMap<String, Arc<TenantConfig>>>,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, cache: Arc::new(DashMap::new()) }
    }

    pub async fn get(&self, course: &str) -> Result<Arc<TenantConfig>, BridgeError> {
        if let Some(cfg) = self.cache.get(course) {
            return Ok(cfg.value().clone());
        }
        let raw = self
            .store
            .get(TENANTS, course)
            .await?
            .ok_or_else(|| ConfigError::UnknownTenant(course.to_string()))?;
        let cfg: TenantConfig = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Malformed { course: course.to_string(), reason: e.to_string() })?;
        let cfg = Arc::new(cfg);
        self.cache.insert(course.to_string(), cfg.clone());
        Ok(cfg)
    }
}
