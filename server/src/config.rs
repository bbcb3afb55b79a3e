use crate::store::RetryPolicy;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    GitHub,
    Memory,
}

#[derive(Clone)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub api_url: String,
    pub raw_url: String,
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("raw_url", &self.raw_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    pub production_branch: String,
    pub development_branch: String,
    pub backend: StoreBackend,
    pub github: GitHubConfig,
    pub access_password: String,
    pub session_secret: String,
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub max_upload_bytes: usize,
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("branch", &self.active_branch())
            .field("backend", &self.backend)
            .field("github", &self.github)
            .field("bind_addr", &self.bind_addr)
            .field("data_dir", &self.data_dir)
            .field("static_dir", &self.static_dir)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("CMS_ENV").or_else(|| get("NODE_ENV")) {
            None => Environment::Production,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "development" | "dev" => Environment::Development,
                "production" | "prod" => Environment::Production,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "CMS_ENV",
                        value: v,
                        reason: "expected development or production".to_string(),
                    })
                }
            },
        };

        let backend = match get("CMS_STORE").as_deref() {
            None | Some("github") => StoreBackend::GitHub,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CMS_STORE",
                    value: other.to_string(),
                    reason: "expected github or memory".to_string(),
                })
            }
        };

        let required = |key: &'static str| -> Result<String, ConfigError> {
            match backend {
                StoreBackend::GitHub => get(key).ok_or(ConfigError::Missing(key)),
                StoreBackend::Memory => Ok(get(key).unwrap_or_default()),
            }
        };
        let github = GitHubConfig {
            owner: required("GITHUB_OWNER")?,
            repo: required("GITHUB_REPO")?,
            token: required("GITHUB_TOKEN")?,
            api_url: get("GITHUB_API_URL").unwrap_or_else(|| "https://api.github.com".to_string()),
            raw_url: get("GITHUB_RAW_URL")
                .unwrap_or_else(|| "https://raw.githubusercontent.com".to_string()),
        };

        let access_password = get("ACCESS_PASSWORD").ok_or(ConfigError::Missing("ACCESS_PASSWORD"))?;
        let session_secret = get("SESSION_SECRET").unwrap_or_else(|| access_password.clone());

        let bind_addr = match get("CMS_BIND") {
            None => SocketAddr::from(([127, 0, 0, 1], 3000)),
            Some(v) => v.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: "CMS_BIND",
                value: v.clone(),
                reason: e.to_string(),
            })?,
        };

        Ok(Config {
            environment,
            production_branch: get("GITHUB_API_BRANCH").unwrap_or_else(|| "main".to_string()),
            development_branch: get("GITHUB_DEV_BRANCH").unwrap_or_else(|| "dev".to_string()),
            backend,
            github,
            access_password,
            session_secret,
            bind_addr,
            data_dir: get("CMS_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            static_dir: get("CMS_STATIC_DIR").map(PathBuf::from),
            retry: RetryPolicy {
                max_attempts: parse_number(&get, "CMS_WRITE_RETRIES", 3)?,
                base_backoff_ms: parse_number(&get, "CMS_RETRY_BACKOFF_MS", 100)?,
            },
            max_upload_bytes: parse_number(&get, "CMS_MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            log_json: parse_bool(&get, "CMS_LOG_JSON", false)?,
        })
    }

    /// Development runs read and write the dev ref, everything else the production ref.
    pub fn active_branch(&self) -> &str {
        match self.environment {
            Environment::Development => &self.development_branch,
            Environment::Production => &self.production_branch,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn parse_number<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes" | "YES") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "NO") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
