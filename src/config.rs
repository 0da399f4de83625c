//! # Configuration Module
//!
//! This module defines the runtime configuration of the bot: transport and
//! store endpoints, catalog paging, the display name alphabet, and the
//! recovery settings used at the publishing boundary.

use anyhow::{Context, Result};
use regex::Regex;
use std::env;

// Constants for bot configuration
pub const DEFAULT_PAGE_SIZE: usize = 7;
pub const DEFAULT_NAME_PATTERN: &str = r"^[\p{L}\p{N} .'_-]{1,64}$";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Recovery configuration for calls that leave the process
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Timeout for a single attempt in seconds
    pub operation_timeout_secs: u64,
    /// Circuit breaker failure threshold
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 5000,
            operation_timeout_secs: 20,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 60, // 1 minute
        }
    }
}

impl RecoveryConfig {
    /// Backoff before retry number `attempt` (1-based), without jitter
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        self.base_retry_delay_ms
            .saturating_mul(factor)
            .min(self.max_retry_delay_ms)
    }
}

/// Where sessions, identities, catalog and chats live
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Postgres(String),
    Memory,
}

/// Publishing gateway settings; absent means publishing is disabled
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub base_url: String,
    pub token: Option<String>,
}

/// Application configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: Option<String>,
    pub store: StoreBackend,
    /// Number of catalog rows per page
    pub page_size: usize,
    /// Accepted display names
    pub name_pattern: Regex,
    pub default_language: String,
    pub publish: Option<PublishConfig>,
    pub recovery: RecoveryConfig,
}

impl AppConfig {
    /// Configuration with built-in defaults: in-memory store, no publishing
    pub fn with_defaults() -> Result<Self> {
        let name_pattern = Regex::new(DEFAULT_NAME_PATTERN)
            .context("Default name pattern is not a valid regex")?;

        Ok(Self {
            bot_token: None,
            store: StoreBackend::Memory,
            page_size: DEFAULT_PAGE_SIZE,
            name_pattern,
            default_language: DEFAULT_LANGUAGE.to_string(),
            publish: None,
            recovery: RecoveryConfig::default(),
        })
    }

    /// Build the configuration from environment variables
    ///
    /// Call `dotenv::dotenv()` beforehand to pick up a local `.env` file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::with_defaults()?;

        config.bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.store = StoreBackend::Postgres(url);
        }

        if let Ok(raw) = env::var("CATALOG_PAGE_SIZE") {
            let size: usize = raw
                .parse()
                .with_context(|| format!("CATALOG_PAGE_SIZE is not a number: {raw}"))?;
            anyhow::ensure!(size > 0, "CATALOG_PAGE_SIZE must be positive");
            config.page_size = size;
        }

        if let Ok(pattern) = env::var("NAME_PATTERN") {
            config.name_pattern = Regex::new(&pattern)
                .with_context(|| format!("NAME_PATTERN is not a valid regex: {pattern}"))?;
        }

        if let Ok(lang) = env::var("DEFAULT_LANGUAGE") {
            config.default_language = lang;
        }

        if let Ok(base_url) = env::var("PUBLISH_API_URL") {
            config.publish = Some(PublishConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                token: env::var("PUBLISH_API_TOKEN").ok(),
            });
        }

        if let Ok(raw) = env::var("PUBLISH_MAX_RETRIES") {
            config.recovery.max_retries = raw
                .parse()
                .with_context(|| format!("PUBLISH_MAX_RETRIES is not a number: {raw}"))?;
        }

        if let Ok(raw) = env::var("PUBLISH_TIMEOUT_SECS") {
            config.recovery.operation_timeout_secs = raw
                .parse()
                .with_context(|| format!("PUBLISH_TIMEOUT_SECS is not a number: {raw}"))?;
        }

        Ok(config)
    }
}
