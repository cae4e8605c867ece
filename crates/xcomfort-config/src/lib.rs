//! Shared configuration for xComfort bridge tools.
//!
//! TOML bridge profiles, auth-key resolution (env + keyring + plaintext),
//! and translation to `xcomfort_core::SessionConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use xcomfort_core::{ReconnectConfig, SessionConfig};

const KEYRING_SERVICE: &str = "xcomfort";

/// Environment variable consulted when a profile names none.
pub const AUTH_KEY_ENV: &str = "XCOMFORT_AUTH_KEY";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no auth key configured for profile '{profile}'")]
    NoAuthKey { profile: String },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named bridge profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The profile called `name`, or the default profile.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile(name.into()))
    }
}

/// Settings applied to every profile that does not override them.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Reconnect attempts after a lost connection.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// First reconnect delay in milliseconds; later attempts back off.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Ceiling on the reconnect backoff, in milliseconds.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// State updates buffered for slow observers before the oldest are
    /// dropped.
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            handshake_timeout: default_handshake_timeout(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            dispatch_capacity: default_dispatch_capacity(),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    10
}
fn default_reconnect_attempts() -> u32 {
    1
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_dispatch_capacity() -> usize {
    xcomfort_core::config::DEFAULT_DISPATCH_CAPACITY
}

/// A named bridge.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Bridge host, `host:port` or `ws://` URL.
    pub address: String,

    /// Auth key from the bridge label (plaintext; prefer keyring or env var).
    pub auth_key: Option<String>,

    /// Environment variable holding the auth key.
    pub auth_key_env: Option<String>,

    /// Override the handshake timeout (seconds).
    pub handshake_timeout: Option<u64>,

    /// Override reconnect attempts.
    pub reconnect_attempts: Option<u32>,

    /// Override the reconnect backoff ceiling (milliseconds).
    pub reconnect_max_delay_ms: Option<u64>,

    /// Override the state dispatch queue capacity.
    pub dispatch_capacity: Option<usize>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "xcomfort", "xcomfort").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("xcomfort");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing file is fine) layered under `XCOMFORT_`
/// environment variables; nested keys use `__`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("XCOMFORT_").split("__"))
        .extract()?;
    tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Auth key resolution ─────────────────────────────────────────────

/// Resolve a profile's auth key: the profile's env var, then
/// `XCOMFORT_AUTH_KEY`, then the system keyring, then plaintext.
pub fn resolve_auth_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.auth_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
        tracing::debug!(env = %env_name, "auth key variable not set");
    }

    if let Ok(val) = std::env::var(AUTH_KEY_ENV) {
        return Ok(SecretString::from(val));
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/auth-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(ref key) = profile.auth_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoAuthKey {
        profile: profile_name.into(),
    })
}

/// Store `auth_key` for `profile_name` in the system keyring.
pub fn store_auth_key(profile_name: &str, auth_key: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/auth-key"))
        .and_then(|entry| entry.set_password(auth_key))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── SessionConfig ───────────────────────────────────────────────────

/// Build a `SessionConfig` from a profile and the global defaults.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let auth_key = resolve_auth_key(profile, profile_name)?;
    build_session_config(profile, auth_key, defaults)
}

fn build_session_config(
    profile: &Profile,
    auth_key: SecretString,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    if profile.address.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "address".into(),
            reason: "must not be empty".into(),
        });
    }
    xcomfort_api::transport::bridge_url(&profile.address).map_err(|e| {
        ConfigError::Validation {
            field: "address".into(),
            reason: e.to_string(),
        }
    })?;

    let timeout = profile
        .handshake_timeout
        .unwrap_or(defaults.handshake_timeout);
    if timeout == 0 {
        return Err(ConfigError::Validation {
            field: "handshake_timeout".into(),
            reason: "must be at least one second".into(),
        });
    }

    let dispatch_capacity = profile
        .dispatch_capacity
        .unwrap_or(defaults.dispatch_capacity);
    if dispatch_capacity == 0 {
        return Err(ConfigError::Validation {
            field: "dispatch_capacity".into(),
            reason: "must be at least 1".into(),
        });
    }

    let initial_delay = Duration::from_millis(defaults.reconnect_delay_ms);
    let max_delay = Duration::from_millis(
        profile
            .reconnect_max_delay_ms
            .unwrap_or(defaults.reconnect_max_delay_ms),
    );
    if max_delay < initial_delay {
        return Err(ConfigError::Validation {
            field: "reconnect_max_delay_ms".into(),
            reason: format!(
                "{}ms is below the initial delay of {}ms",
                max_delay.as_millis(),
                initial_delay.as_millis()
            ),
        });
    }

    let mut config = SessionConfig::new(profile.address.clone(), String::new());
    config.auth_key = auth_key;
    config.handshake_timeout = Duration::from_secs(timeout);
    config.dispatch_capacity = dispatch_capacity;
    config.reconnect = ReconnectConfig {
        initial_delay,
        max_delay,
        max_attempts: profile
            .reconnect_attempts
            .unwrap_or(defaults.reconnect_attempts),
    };
    Ok(config)
}
