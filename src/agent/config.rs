use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_WS_URL: &str = "ws://localhost:3000/api/ws";

const ENV_WS_URL: &str = "RELAY_WS_URL";
const ENV_AUTH_TOKEN: &str = "RELAY_AUTH_TOKEN";
const ENV_SESSION_TOKEN: &str = "RELAY_SESSION_TOKEN";

/// Tokens issued by the login flow. Read-only for the lifetime of a
/// connection attempt.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub session_token: String,
}

impl Credentials {
    pub fn new(auth_token: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            session_token: session_token.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.auth_token.is_empty() && !self.session_token.is_empty()
    }

    /// First 8 characters of the session token, for display.
    pub fn session_prefix(&self) -> &str {
        match self.session_token.char_indices().nth(8) {
            Some((idx, _)) => &self.session_token[..idx],
            None => &self.session_token,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub credentials: Credentials,
    /// Root of the filesystem area tools may touch; the process cwd if unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            credentials: Credentials::default(),
            work_dir: None,
            reconnect: false,
        }
    }
}

impl Config {
    /// `<config_dir>/relay-agent/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("relay-agent").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).context("parsing config JSON")
    }

    /// Load an explicit file (must exist) or the default file (optional),
    /// then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Override fields from `RELAY_*` variables; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(v) = get(ENV_WS_URL) {
            self.ws_url = v;
        }
        if let Some(v) = get(ENV_AUTH_TOKEN) {
            self.credentials.auth_token = v;
        }
        if let Some(v) = get(ENV_SESSION_TOKEN) {
            self.credentials.session_token = v;
        }
    }

    /// Credentials, or an error telling the operator to log in first.
    pub fn require_credentials(&self) -> Result<&Credentials> {
        if self.credentials.is_complete() {
            Ok(&self.credentials)
        } else {
            anyhow::bail!("not logged in: no auth/session token configured")
        }
    }
}
