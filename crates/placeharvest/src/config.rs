//! Run configuration.
//!
//! Sources, highest priority first:
//! 1. command-line flags (applied by the CLI on top of the loaded file)
//! 2. the file named by `--config`
//! 3. the file named by `PLACEHARVEST_CONFIG`
//! 4. `~/.placeharvest/config.json`, if present
//! 5. built-in defaults
//!
//! Every missing key falls back to its default, so a partial file is
//! valid. [`HarvestConfig::validate`] runs before any extraction starts.

use crate::acquisition::GatewayOptions;
use crate::error::{HarvestError, HarvestResult};
use crate::extraction::SelectorSet;
use crate::pool::PoolLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PLACEHARVEST_CONFIG";

/// Largest accepted per-query result limit.
pub const MAX_RESULTS_LIMIT: usize = 10_000;
/// Largest accepted concurrency ceiling.
pub const MAX_CONCURRENCY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Ceiling on simultaneous extraction attempts.
    pub concurrency: usize,
    /// Budget for one whole attempt, fetch and render included.
    pub request_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub include_reviews: bool,
    pub include_images: bool,
    /// Per-query cap on emitted entries. `None` means unlimited.
    pub max_results: Option<usize>,
    pub retry: RetryConfig,
    pub identity: IdentityConfig,
    /// Proxy URLs handed out round-robin to new identities.
    pub proxies: Vec<String>,
    pub pacing: PacingConfig,
    /// Locale hint (`hl=`), e.g. `en` or `pt-BR`.
    pub locale: Option<String>,
    pub headless: bool,
    /// Replacement selector set; the embedded one is used otherwise.
    pub selectors_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_transient_retries: u32,
    pub max_challenge_retries: u32,
    /// Base delay before a retry; jitter of up to the same amount is added.
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub max_uses: u32,
    pub max_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            request_timeout_ms: 90_000,
            fetch_timeout_ms: 10_000,
            render_timeout_ms: 30_000,
            include_reviews: false,
            include_images: false,
            max_results: None,
            retry: RetryConfig::default(),
            identity: IdentityConfig::default(),
            proxies: Vec::new(),
            pacing: PacingConfig::default(),
            locale: None,
            headless: true,
            selectors_path: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 2,
            max_challenge_retries: 1,
            backoff_ms: 1_000,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            max_uses: 20,
            max_errors: 3,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 400,
            max_delay_ms: 1_200,
        }
    }
}

impl HarvestConfig {
    /// Load from an explicit path, the environment, or the home directory.
    pub fn load(path: Option<&Path>) -> HarvestResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            if !env_path.trim().is_empty() {
                return Self::from_file(Path::new(&env_path));
            }
        }
        match default_path() {
            Some(home_path) if home_path.exists() => Self::from_file(&home_path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> HarvestResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| HarvestError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| HarvestError::config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Reject configurations that cannot produce a sensible run.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(HarvestError::config(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if let Some(limit) = self.max_results {
            if limit == 0 || limit > MAX_RESULTS_LIMIT {
                return Err(HarvestError::config(format!(
                    "max_results must be between 1 and {MAX_RESULTS_LIMIT}, got {limit}"
                )));
            }
        }
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("render_timeout_ms", self.render_timeout_ms),
        ] {
            if value == 0 {
                return Err(HarvestError::config(format!("{name} must be positive")));
            }
        }
        if self.pacing.min_delay_ms > self.pacing.max_delay_ms {
            return Err(HarvestError::config(format!(
                "pacing.min_delay_ms ({}) exceeds pacing.max_delay_ms ({})",
                self.pacing.min_delay_ms, self.pacing.max_delay_ms
            )));
        }
        if self.identity.max_uses == 0 || self.identity.max_errors == 0 {
            return Err(HarvestError::config(
                "identity.max_uses and identity.max_errors must be positive",
            ));
        }
        for proxy in &self.proxies {
            validate_proxy(proxy)?;
        }
        if matches!(self.locale.as_deref(), Some(l) if l.trim().is_empty()) {
            return Err(HarvestError::config("locale must not be blank"));
        }
        Ok(())
    }

    /// The configured selector set, validated.
    pub fn selectors(&self) -> HarvestResult<SelectorSet> {
        match &self.selectors_path {
            Some(path) => SelectorSet::from_file(path),
            None => Ok(SelectorSet::builtin().clone()),
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            fetch_timeout_ms: self.fetch_timeout_ms,
            render_timeout_ms: self.render_timeout_ms,
            min_delay_ms: self.pacing.min_delay_ms,
            max_delay_ms: self.pacing.max_delay_ms,
            headless: self.headless,
        }
    }

    pub fn pool_limits(&self) -> PoolLimits {
        PoolLimits {
            ceiling: self.concurrency,
            max_uses: self.identity.max_uses,
            max_errors: self.identity.max_errors,
        }
    }
}

/// `~/.placeharvest/config.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".placeharvest").join("config.json"))
}

/// Parse a list of proxies, one per line. Blank lines and `#` comments are
/// skipped.
pub fn parse_proxy_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn validate_proxy(proxy: &str) -> HarvestResult<()> {
    let parsed = url::Url::parse(proxy)
        .map_err(|e| HarvestError::config(format!("invalid proxy URL {proxy:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h") {
        return Err(HarvestError::config(format!(
            "unsupported proxy scheme {:?} in {proxy:?}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(HarvestError::config(format!("proxy URL {proxy:?} has no host")));
    }
    Ok(())
}
