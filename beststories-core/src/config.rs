use crate::error::{ConfigError, CoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://hacker-news.firebaseio.com/v0/";

/// Environment variable that overrides `base_url` from the config file.
pub const BASE_URL_ENV: &str = "BESTSTORIES_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    /// Lifetime of the cached ranked id list.
    pub id_list_ttl_secs: u64,
    /// Lifetime of each cached item.
    pub item_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Largest `n` the command line accepts.
    pub max_stories: usize,
    /// Cap on in-flight upstream requests. Zero leaves it unbounded.
    pub max_concurrent_requests: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            id_list_ttl_secs: 30,
            item_ttl_secs: 30 * 60,
            request_timeout_secs: 30,
            user_agent: concat!("beststories/", env!("CARGO_PKG_VERSION")).to_string(),
            max_stories: 500,
            max_concurrent_requests: 0,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from `path` (or defaults when absent), applies
    /// the environment override and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        CoreError::Config(ConfigError::FileNotFound {
                            path: path.display().to_string(),
                        })
                    } else {
                        CoreError::Io(e)
                    }
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&raw)?
            }
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };

        let config = config
            .with_base_url_override(std::env::var(BASE_URL_ENV).ok())
            .validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn with_base_url_override(mut self, base_url: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) {
            debug!("Overriding base_url with {}", base_url);
            self.base_url = base_url;
        }
        self
    }

    /// Checks every field and normalizes the base URL so that relative
    /// endpoint joins keep its path.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        let url = self.base_url()?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.clone(),
            });
        }

        if self.id_list_ttl_secs == 0 || self.item_ttl_secs == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "cache TTLs must be greater than zero".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "request_timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.max_stories == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "max_stories must be greater than zero".to_string(),
            });
        }

        Ok(self)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidValue {
            field: "base_url".to_string(),
            value: self.base_url.clone(),
        })
    }

    pub fn id_list_ttl(&self) -> Duration {
        Duration::from_secs(self.id_list_ttl_secs)
    }

    pub fn item_ttl(&self) -> Duration {
        Duration::from_secs(self.item_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
