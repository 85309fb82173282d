// ⚙️ Configuration - Environment-driven settings and log setup

use crate::fetcher::{RetryPolicy, SourceSite};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "legislature_scraper=info";

/// Runtime settings, loaded from the environment (and `.env` when present)
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: String,
    pub export_dir: PathBuf,

    // Politeness
    pub min_delay: Duration,
    pub max_attempts: u32,
    pub challenge_attempts: u32,
    pub request_timeout: Duration,
    pub concurrency: usize,

    // Source
    pub source_base_url: String,
    /// Headless-browser rendering service used when the site soft-blocks us
    pub challenge_solver_url: Option<String>,

    /// `RUST_LOG`, read along with everything else so `.env` can set it
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "hawaii_legislature.db".to_string(),
            export_dir: PathBuf::from("export"),
            min_delay: Duration::from_millis(1000),
            max_attempts: 4,
            challenge_attempts: 3,
            request_timeout: Duration::from_secs(30),
            concurrency: 2,
            source_base_url: SourceSite::DEFAULT_BASE.to_string(),
            challenge_solver_url: None,
            log_filter: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults,
    /// malformed values are errors naming the variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Config {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            export_dir: get("EXPORT_DIR").map(PathBuf::from).unwrap_or(defaults.export_dir),
            min_delay: match get("SCRAPE_DELAY_MS") {
                Some(v) => Duration::from_millis(parse_var("SCRAPE_DELAY_MS", &v)?),
                None => defaults.min_delay,
            },
            max_attempts: match get("SCRAPE_MAX_ATTEMPTS") {
                Some(v) => parse_var("SCRAPE_MAX_ATTEMPTS", &v)?,
                None => defaults.max_attempts,
            },
            challenge_attempts: match get("SCRAPE_CHALLENGE_ATTEMPTS") {
                Some(v) => parse_var("SCRAPE_CHALLENGE_ATTEMPTS", &v)?,
                None => defaults.challenge_attempts,
            },
            request_timeout: match get("SCRAPE_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse_var("SCRAPE_TIMEOUT_SECS", &v)?),
                None => defaults.request_timeout,
            },
            concurrency: match get("SCRAPE_CONCURRENCY") {
                Some(v) => parse_var("SCRAPE_CONCURRENCY", &v)?,
                None => defaults.concurrency,
            },
            source_base_url: get("SOURCE_BASE_URL").unwrap_or(defaults.source_base_url),
            challenge_solver_url: get("CHALLENGE_SOLVER_URL"),
            log_filter: get("RUST_LOG"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("SCRAPE_MAX_ATTEMPTS must be at least 1");
        }
        if self.concurrency == 0 {
            bail!("SCRAPE_CONCURRENCY must be at least 1");
        }
        SourceSite::new(&self.source_base_url)
            .with_context(|| format!("SOURCE_BASE_URL is not a valid URL: {}", self.source_base_url))?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_challenge_attempts: self.challenge_attempts,
            ..RetryPolicy::default()
        }
    }

    /// `RUST_LOG` when it parses, the crate default otherwise
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }

    pub fn source_site(&self) -> Result<SourceSite> {
        SourceSite::new(&self.source_base_url)
            .with_context(|| format!("SOURCE_BASE_URL is not a valid URL: {}", self.source_base_url))
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, value))
}

/// Install the fmt subscriber. Call after `Config::from_env` so a
/// `RUST_LOG` from `.env` is already loaded.
pub fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(false)
        .init();
}
