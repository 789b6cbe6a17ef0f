//! Environment configuration for seeding, the webhook worker and the CLI.

use std::path::PathBuf;
use std::time::Duration;

use brewbook_cms::{StoryblokConfig, DEFAULT_BASE_URL, MAX_PER_PAGE};
use brewbook_search::AlgoliaConfig;
use brewbook_storage::{HttpClientConfig, TokenBucketConfig};
use thiserror::Error;

const REQUIRED_VARS: &[&str] = &["ALGOLIA_APPLICATION_ID", "ALGOLIA_WRITE_API_KEY", "STORYBLOK_TOKEN"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// A credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone)]
pub struct SearchCredentials {
    pub app_id: String,
    pub write_api_key: Secret,
    /// Search-only key used by the public search API.
    pub search_api_key: Option<Secret>,
    pub index_name: String,
    pub host: Option<String>,
}

impl SearchCredentials {
    fn algolia(&self, key: &Secret) -> AlgoliaConfig {
        let mut config = AlgoliaConfig::new(&self.app_id, key.expose(), &self.index_name);
        config.host = self.host.clone();
        config
    }

    pub fn write_config(&self) -> AlgoliaConfig {
        self.algolia(&self.write_api_key)
    }

    pub fn search_config(&self) -> Option<AlgoliaConfig> {
        self.search_api_key.as_ref().map(|key| self.algolia(key))
    }
}

#[derive(Debug, Clone)]
pub struct SeedConfig {
    pub search: SearchCredentials,
    pub storyblok: StoryblokConfig,
    pub webhook_secret: Option<Secret>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Outbound requests per second; unlimited when absent.
    pub http_rate_limit: Option<u32>,
    pub reports_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub min_cafes: usize,
    pub min_events: usize,
    pub scheduler_enabled: bool,
    pub seed_cron: String,
    pub search_config_path: Option<PathBuf>,
    pub web_port: u16,
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(lookup, name) {
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    non_empty(lookup, name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl SeedConfig {
    /// Loads `.env` (when present) and then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let missing: Vec<String> = REQUIRED_VARS
            .iter()
            .filter(|name| non_empty(&lookup, name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing));
        }
        let required = |name: &str| non_empty(&lookup, name).unwrap_or_default();

        let per_page: u32 = parse_or(&lookup, "STORYBLOK_PER_PAGE", MAX_PER_PAGE)?;
        let storyblok = StoryblokConfig {
            token: required("STORYBLOK_TOKEN"),
            base_url: non_empty(&lookup, "STORYBLOK_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        };

        Ok(Self {
            search: SearchCredentials {
                app_id: required("ALGOLIA_APPLICATION_ID"),
                write_api_key: Secret::new(required("ALGOLIA_WRITE_API_KEY")),
                search_api_key: non_empty(&lookup, "ALGOLIA_SEARCH_API_KEY").map(Secret::new),
                index_name: non_empty(&lookup, "ALGOLIA_INDEX_NAME").unwrap_or_else(|| "brewbook".to_string()),
                host: non_empty(&lookup, "ALGOLIA_HOST"),
            },
            storyblok,
            webhook_secret: non_empty(&lookup, "STORYBLOK_WEBHOOK_SECRET").map(Secret::new),
            user_agent: non_empty(&lookup, "BREWBOOK_USER_AGENT")
                .unwrap_or_else(|| "brewbook-seeder/0.1".to_string()),
            http_timeout_secs: parse_or(&lookup, "BREWBOOK_HTTP_TIMEOUT_SECS", 20)?,
            http_rate_limit: match parse_or(&lookup, "BREWBOOK_HTTP_RATE_LIMIT", 0u32)? {
                0 => None,
                n => Some(n),
            },
            reports_dir: non_empty(&lookup, "BREWBOOK_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            artifacts_dir: non_empty(&lookup, "BREWBOOK_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./artifacts")),
            min_cafes: parse_or(&lookup, "BREWBOOK_MIN_CAFES", 10)?,
            min_events: parse_or(&lookup, "BREWBOOK_MIN_EVENTS", 3)?,
            scheduler_enabled: flag(&lookup, "BREWBOOK_SCHEDULER_ENABLED"),
            seed_cron: non_empty(&lookup, "BREWBOOK_SEED_CRON").unwrap_or_else(|| "0 0 */6 * * *".to_string()),
            search_config_path: non_empty(&lookup, "BREWBOOK_SEARCH_CONFIG").map(PathBuf::from),
            web_port: parse_or(&lookup, "BREWBOOK_WEB_PORT", 8000)?,
        })
    }

    /// Reports directory alone, for commands that need no credentials.
    pub fn reports_dir_from_env() -> PathBuf {
        dotenv::dotenv().ok();
        std::env::var("BREWBOOK_REPORTS_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./reports"))
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            token_bucket: self.http_rate_limit.map(|per_sec| TokenBucketConfig {
                capacity: per_sec,
                refill_every: Duration::from_secs(1) / per_sec.max(1),
            }),
            ..Default::default()
        }
    }
}
