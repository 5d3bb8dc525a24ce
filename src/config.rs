// Configuration loading and parsing (client.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// client.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire client.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ClientFile {
    api: ApiSection,
    push: PushSection,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    /// HTTP(S) base URL of the platform API. Also the source of the push
    /// endpoint after scheme rewriting.
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushSection {
    /// Path of the event-stream endpoint, appended to the rewritten base.
    pub path: String,
    pub keepalive_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_max_jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthSection {
    pub access_token: Option<String>,
}

/// The assembled, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiSection,
    pub push: PushSection,
    pub auth: AuthSection,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.push.keepalive_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.push.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.push.backoff_cap_ms)
    }

    pub fn backoff_max_jitter(&self) -> Duration {
        Duration::from_millis(self.push.backoff_max_jitter_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/client.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let client_path = base_dir.join("config").join("client.toml");
    let client_text = read_file(&client_path)?;
    let client_file: ClientFile =
        toml::from_str(&client_text).map_err(|e| ConfigError::ParseError {
            path: client_path.clone(),
            source: e,
        })?;

    let config = Config {
        api: client_file.api,
        push: client_file.push,
        auth: client_file.auth,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure `config/client.toml` exists, seeding it from
/// `defaults/client.toml` on first run. Returns the path if a copy was made.
pub fn ensure_config_files(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let default_path = base_dir.join("defaults").join("client.toml");
    let config_dir = base_dir.join("config");
    let target = config_dir.join("client.toml");

    if target.exists() {
        return Ok(None);
    }

    if !default_path.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/client.toml nor config/ found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        // config/ exists but holds no client.toml yet; loading will report
        // the missing file with its full path.
        return Ok(None);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    // create_new so a concurrent first run never truncates the other's copy.
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(mut dest) => {
            let content =
                std::fs::read(&default_path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", default_path.display()),
                })?;
            std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                ConfigError::DefaultsCopyError {
                    message: format!("failed to write {}: {e}", target.display()),
                }
            })?;
            Ok(Some(target))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", target.display()),
        }),
    }
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let base = &config.api.base_url;
    if !base.starts_with("http://") && !base.starts_with("https://") {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: format!("must start with http:// or https://, got `{base}`"),
        });
    }

    if config.api.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "api.request_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if !config.push.path.starts_with('/') {
        return Err(ConfigError::ValidationError {
            field: "push.path".into(),
            message: format!("must start with `/`, got `{}`", config.push.path),
        });
    }

    if config.push.keepalive_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "push.keepalive_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.push.backoff_base_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "push.backoff_base_ms".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.push.backoff_cap_ms < config.push.backoff_base_ms {
        return Err(ConfigError::ValidationError {
            field: "push.backoff_cap_ms".into(),
            message: format!(
                "must be >= backoff_base_ms ({}), got {}",
                config.push.backoff_base_ms, config.push.backoff_cap_ms
            ),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
