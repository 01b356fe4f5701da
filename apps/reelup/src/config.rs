//! Uploader configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/reelup/config.toml`
//! - Windows: `%APPDATA%/reelup/config.toml`
//!
//! The access token may be left out of the file and supplied through
//! `REELUP_ACCESS_TOKEN` instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reelup_accounts::{FeatureSet, QuotaPolicy};
use reelup_graph::ClientConfig;
use reelup_protocol::{DEFAULT_GRAPH_BASE_URL, UploadTarget};
use reelup_transfer::{DEFAULT_STALL_LIMIT, RetryConfig};
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`Config::access_token`].
pub const ACCESS_TOKEN_ENV: &str = "REELUP_ACCESS_TOKEN";

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Graph API base URL, including the version segment.
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,

    /// Page the videos are published to.
    #[serde(default)]
    pub page_id: String,

    /// Page access token.
    #[serde(default)]
    pub access_token: String,

    /// User allowed to grant premium and mint keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,

    /// Accounts file (next to the config file by default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Largest upload allowed for free users, in MiB.
    #[serde(default = "default_free_upload_limit_mb")]
    pub free_upload_limit_mb: u64,

    /// Referrals needed to unlock premium.
    #[serde(default = "default_referrals_for_premium")]
    pub referrals_for_premium: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Attempts per chunk, including the first (1 = no retries).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Consecutive repeats of the same window tolerated before giving up.
    #[serde(default = "default_stall_limit")]
    pub stall_limit: u32,

    /// Caption used when none is given on the command line.
    #[serde(default = "default_caption")]
    pub default_caption: String,

    #[serde(default = "FeatureSet::economy")]
    pub features: FeatureSet,
}

fn default_graph_base_url() -> String {
    DEFAULT_GRAPH_BASE_URL.into()
}

fn default_free_upload_limit_mb() -> u64 {
    200
}

fn default_referrals_for_premium() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_retry_attempts() -> u32 {
    RetryConfig::default().max_attempts
}

fn default_retry_initial_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    8_000
}

fn default_stall_limit() -> u32 {
    DEFAULT_STALL_LIMIT
}

fn default_caption() -> String {
    "Uploaded via reelup".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph_base_url: default_graph_base_url(),
            page_id: String::new(),
            access_token: String::new(),
            admin_id: None,
            store_path: None,
            free_upload_limit_mb: default_free_upload_limit_mb(),
            referrals_for_premium: default_referrals_for_premium(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            stall_limit: default_stall_limit(),
            default_caption: default_caption(),
            features: FeatureSet::economy(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the default location), creating
    /// a default file if none exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            let config = Config::default();
            config.save(&path)?;
            config
        };

        config.validate()?;
        config.apply_access_token_override(std::env::var(ACCESS_TOKEN_ENV).ok());
        if config.store_path.is_none() {
            config.store_path = path.parent().map(|dir| dir.join("accounts.json"));
        }
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds the access token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects settings that would make every request fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    fn apply_access_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.access_token = token;
        }
    }

    /// Where the page and token say videos go.
    pub fn upload_target(&self) -> anyhow::Result<UploadTarget> {
        if self.page_id.trim().is_empty() {
            anyhow::bail!("page_id is not configured");
        }
        if self.access_token.trim().is_empty() {
            anyhow::bail!("no access token: set access_token or {ACCESS_TOKEN_ENV}");
        }
        Ok(UploadTarget::new(
            self.graph_base_url.clone(),
            self.page_id.clone(),
            self.access_token.clone(),
        ))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..RetryConfig::default()
        }
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            free_max_bytes: self.free_upload_limit_mb.saturating_mul(1024 * 1024),
            referrals_for_premium: self.referrals_for_premium,
        }
    }

    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_path()?.with_file_name("accounts.json")),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
            .map_err(|_| anyhow::anyhow!("neither XDG_CONFIG_HOME nor HOME is set"))?;
        Ok(base.join("reelup").join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join("reelup").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("reelup")
            .join("config.toml"))
    }
}
