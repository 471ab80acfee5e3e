use std::str::FromStr;

use anyhow::{Context, Result};

use crate::{
    clicks::RecorderConfig,
    codegen::{DEFAULT_CODE_LENGTH, DEFAULT_MAX_ATTEMPTS, MAX_CODE_LENGTH},
    retry::RetryConfig,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./linkly.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL used when generating short links, e.g. "https://go.example.com"
    /// Must NOT have a trailing slash.
    pub base_url: String,

    /// URL to redirect visitors to when they hit the root path ("/").
    pub root_redirect_url: String,

    /// Symbols per newly minted short code.
    pub code_length: usize,

    /// Collisions tolerated before giving up on a new code.
    pub code_max_attempts: u32,

    /// Days until a new link expires. `None` means links never expire.
    pub link_ttl_days: Option<i64>,

    /// Clicks that may wait in memory for the background writer.
    pub click_queue_capacity: usize,

    /// Clicks written per transaction.
    pub click_batch_size: usize,

    /// Per-attempt timeout for store operations, in milliseconds.
    pub store_timeout_ms: u64,

    /// Retries after the first attempt for transient store errors.
    pub store_max_retries: u32,

    /// Months covered by the dashboard line chart.
    pub dashboard_months: u32,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = parse_or(&lookup, "PORT", 3000)
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = lookup("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let root_redirect_url = lookup("ROOT_REDIRECT_URL")
            .unwrap_or_else(|| "https://example.com".into())
            .trim_end_matches('/')
            .to_owned();

        let code_length: usize = parse_or(&lookup, "CODE_LENGTH", DEFAULT_CODE_LENGTH)
            .context("CODE_LENGTH must be a positive integer")?;
        if !(4..=MAX_CODE_LENGTH).contains(&code_length) {
            anyhow::bail!("CODE_LENGTH must be between 4 and {MAX_CODE_LENGTH}");
        }

        let code_max_attempts: u32 =
            parse_or(&lookup, "CODE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)
                .context("CODE_MAX_ATTEMPTS must be a positive integer")?;
        if code_max_attempts == 0 {
            anyhow::bail!("CODE_MAX_ATTEMPTS must be at least 1");
        }

        let link_ttl_days = match lookup("LINK_TTL_DAYS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                let days = raw
                    .trim()
                    .parse::<i64>()
                    .context("LINK_TTL_DAYS must be a whole number of days")?;
                if days <= 0 {
                    anyhow::bail!("LINK_TTL_DAYS must be positive, or unset for no expiry");
                }
                Some(days)
            }
            None => None,
        };

        let dashboard_months: u32 = parse_or(&lookup, "DASHBOARD_MONTHS", 6)
            .context("DASHBOARD_MONTHS must be a positive integer")?;
        if !(1..=120).contains(&dashboard_months) {
            anyhow::bail!("DASHBOARD_MONTHS must be between 1 and 120");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite:./linkly.db".into()),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            base_url,
            root_redirect_url,
            code_length,
            code_max_attempts,
            link_ttl_days,
            click_queue_capacity: parse_or(&lookup, "CLICK_QUEUE_CAPACITY", 10_000)
                .context("CLICK_QUEUE_CAPACITY must be a positive integer")?,
            click_batch_size: parse_or(&lookup, "CLICK_BATCH_SIZE", 100)
                .context("CLICK_BATCH_SIZE must be a positive integer")?,
            store_timeout_ms: parse_or(&lookup, "STORE_TIMEOUT_MS", 2000)
                .context("STORE_TIMEOUT_MS must be a number of milliseconds")?,
            store_max_retries: parse_or(&lookup, "STORE_MAX_RETRIES", 3)
                .context("STORE_MAX_RETRIES must be a non-negative integer")?,
            dashboard_months,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.store_max_retries,
            timeout_ms: self.store_timeout_ms,
            ..RetryConfig::default()
        }
    }

    pub fn recorder(&self) -> RecorderConfig {
        RecorderConfig {
            capacity: self.click_queue_capacity,
            batch_size: self.click_batch_size,
            retry: self.retry(),
        }
    }

    pub fn link_ttl(&self) -> Option<chrono::Duration> {
        self.link_ttl_days.map(chrono::Duration::days)
    }

    /// Full short URL for `code`.
    pub fn short_url(&self, code: &str) -> String {
        format!("{}/{}", self.base_url, code)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        _ => Ok(default),
    }
}
