//! `config.toml` schema and its validation.

use crate::records::{CollectionSpec, FieldKind, FieldRule};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default token lifetime: 1 hour.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Default cookie that carries the admin session token.
pub const DEFAULT_COOKIE_NAME: &str = "adminToken";

/// Routes owned by the gateway itself; collections may not shadow them.
const RESERVED_PATHS: &[&str] = &["/health", "/login", "/admin", "/chat"];

/// Top-level configuration, loaded once at startup and injected into the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    /// Record collections exposed over HTTP. Empty means the built-in set.
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login attempts per client per minute (0 = unlimited).
    #[serde(default = "default_login_rate_limit")]
    pub login_rate_limit_per_minute: u32,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

/// Where admin credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    /// A single username / hash pair from this file or the environment.
    Config,
    /// The `admins` table of the storage database.
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credential_source")]
    pub credential_source: CredentialSource,
    #[serde(default)]
    pub admin_username: Option<String>,
    /// Argon2 PHC string, as printed by `formdesk hash-password`.
    #[serde(default)]
    pub admin_password_hash: Option<String>,
    /// HMAC secret for session tokens. Required; there is no fallback.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding records and (optionally) admin credentials.
    /// Relative paths resolve against the config file's directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Broadcast ring size; listeners further behind than this skip ahead.
    #[serde(default = "default_chat_capacity")]
    pub capacity: usize,
    #[serde(default = "default_chat_max_chars")]
    pub max_message_chars: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    5000
}

fn default_login_rate_limit() -> u32 {
    10
}

fn default_credential_source() -> CredentialSource {
    CredentialSource::Config
}

fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.into()
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("formdesk.db")
}

fn default_chat_capacity() -> usize {
    256
}

fn default_chat_max_chars() -> usize {
    2000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            login_rate_limit_per_minute: default_login_rate_limit(),
            trust_forwarded_headers: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credential_source: default_credential_source(),
            admin_username: None,
            admin_password_hash: None,
            jwt_secret: None,
            token_ttl_secs: default_token_ttl(),
            cookie_name: default_cookie_name(),
            cookie_secure: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            capacity: default_chat_capacity(),
            max_message_chars: default_chat_max_chars(),
        }
    }
}

impl Config {
    /// Read a TOML config file. A missing file yields defaults so that a
    /// purely environment-driven deployment works.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            toml::from_str::<Config>(&raw)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };

        if config.storage.db_path.is_relative() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.storage.db_path = parent.join(&config.storage.db_path);
            }
        }

        Ok(config)
    }

    /// Apply `FORMDESK_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from any key lookup; separated from the process
    /// environment so it can be exercised without mutating global state.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(secret) = get("FORMDESK_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(host) = get("FORMDESK_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("FORMDESK_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(e) => tracing::warn!("Ignoring invalid FORMDESK_PORT {port:?}: {e}"),
            }
        }
        if let Some(db_path) = get("FORMDESK_DB_PATH") {
            self.storage.db_path = PathBuf::from(db_path);
        }
        if let Some(username) = get("FORMDESK_ADMIN_USERNAME") {
            self.auth.admin_username = Some(username);
        }
        if let Some(hash) = get("FORMDESK_ADMIN_PASSWORD_HASH") {
            self.auth.admin_password_hash = Some(hash);
        }
    }

    /// Collections to serve: the configured ones, or the built-in set.
    pub fn effective_collections(&self) -> Vec<CollectionSpec> {
        if self.collections.is_empty() {
            builtin_collections()
        } else {
            self.collections.clone()
        }
    }

    /// The signing secret, or an error. Startup must not proceed without one.
    pub fn jwt_secret(&self) -> Result<&str> {
        match self.auth.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Ok(secret),
            _ => bail!(
                "No session signing secret configured. Set [auth] jwt_secret in config.toml \
                 or the FORMDESK_JWT_SECRET environment variable."
            ),
        }
    }

    /// Reject configurations the gateway cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        let secret = self.jwt_secret()?;
        if secret.len() < 32 {
            tracing::warn!(
                len = secret.len(),
                "Session signing secret is shorter than 32 bytes"
            );
        }

        if self.auth.token_ttl_secs == 0 {
            bail!("[auth] token_ttl_secs must be greater than zero");
        }
        if self.auth.cookie_name.trim().is_empty()
            || self
                .auth
                .cookie_name
                .contains(|c: char| c.is_whitespace() || c == ';' || c == '=' || c == ',')
        {
            bail!("[auth] cookie_name {:?} is not a valid cookie name", self.auth.cookie_name);
        }

        if self.auth.credential_source == CredentialSource::Config {
            let username = self.auth.admin_username.as_deref().map(str::trim);
            let hash = self.auth.admin_password_hash.as_deref().map(str::trim);
            if username.is_none_or(str::is_empty) || hash.is_none_or(str::is_empty) {
                bail!(
                    "credential_source = \"config\" requires admin_username and \
                     admin_password_hash (see `formdesk hash-password`)"
                );
            }
        }

        if self.chat.capacity == 0 {
            bail!("[chat] capacity must be greater than zero");
        }

        let mut names = HashSet::new();
        let mut paths = HashSet::new();
        for spec in self.effective_collections() {
            spec.check()?;
            if !names.insert(spec.name.clone()) {
                bail!("Duplicate collection name: {}", spec.name);
            }
            if !paths.insert(spec.path.clone()) {
                bail!("Duplicate collection path: {}", spec.path);
            }
            if RESERVED_PATHS
                .iter()
                .any(|reserved| spec.path == *reserved || spec.path.starts_with(&format!("{reserved}/")))
            {
                bail!("Collection path {} collides with a gateway route", spec.path);
            }
        }

        Ok(())
    }
}

/// The contact / portfolio / diary collections served when none are configured.
pub fn builtin_collections() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec {
            name: "contacts".into(),
            path: "/contacts".into(),
            fields: vec![
                FieldRule::required("name", 100),
                FieldRule::required("email", 254).with_kind(FieldKind::Email),
                FieldRule::required("subject", 200),
                FieldRule::required("message", 5000),
            ],
            list_requires_auth: true,
            max_records: None,
        },
        CollectionSpec {
            name: "portfolio".into(),
            path: "/portfolio".into(),
            fields: vec![
                FieldRule::required("name", 100),
                FieldRule::required("email", 254).with_kind(FieldKind::Email),
                FieldRule::required("message", 5000),
                FieldRule::optional("company", 200),
            ],
            list_requires_auth: true,
            max_records: None,
        },
        CollectionSpec {
            name: "diary".into(),
            path: "/diary".into(),
            fields: vec![
                FieldRule::required("title", 200),
                FieldRule::required("content", 10_000),
                FieldRule::optional("mood", 50),
            ],
            list_requires_auth: false,
            max_records: None,
        },
    ]
}
