use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Default window during which a cache entry is served without revalidation: 5 minutes
const DEFAULT_FRESH_TTL_SECS: u64 = 5 * 60;
/// Default window after which a cache entry stops being servable at all: 60 minutes
const DEFAULT_STALE_TTL_SECS: u64 = 60 * 60;
/// Default interval between eviction sweeps: 5 minutes
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Origin allowed by CORS; any origin when unset.
    pub cors_origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataverseConfig {
    /// Root URL of the upstream repository (the `/api` prefix is appended
    /// by the client).
    pub base_url: String,
    pub api_token: Option<String>,
    /// Request draft/unpublished content from the upstream. Only effective
    /// together with an API token.
    pub show_hidden: bool,
    /// Collection aliases every search is scoped to, in order. Empty means
    /// the whole repository is searched unscoped.
    pub collections: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub fresh_ttl: Duration,
    pub stale_ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub dataverse: DataverseConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let fresh_ttl = duration_from_env("CACHE_FRESH_TTL_SECS", DEFAULT_FRESH_TTL_SECS)?;
        let stale_ttl = duration_from_env("CACHE_STALE_TTL_SECS", DEFAULT_STALE_TTL_SECS)?;
        let sweep_interval =
            duration_from_env("CACHE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;

        if fresh_ttl >= stale_ttl {
            bail!(
                "CACHE_FRESH_TTL_SECS ({}s) must be shorter than CACHE_STALE_TTL_SECS ({}s)",
                fresh_ttl.as_secs(),
                stale_ttl.as_secs()
            );
        }

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3001".to_string())
                    .parse()
                    .context("PORT must be a port number")?,
                cors_origin: env::var("CORS_ORIGIN").ok().filter(|o| !o.is_empty()),
            },
            dataverse: DataverseConfig {
                base_url: env::var("DATAVERSE_BASE_URL")
                    .unwrap_or_else(|_| "https://demo.dataverse.org".to_string()),
                api_token: env::var("DATAVERSE_API_TOKEN")
                    .ok()
                    .filter(|t| !t.is_empty()),
                show_hidden: env::var("SHOW_HIDDEN").map(|v| v == "true").unwrap_or(false),
                collections: env::var("DATAVERSE_COLLECTIONS")
                    .map(|raw| parse_collections(&raw))
                    .unwrap_or_default(),
            },
            cache: CacheConfig {
                fresh_ttl,
                stale_ttl,
                sweep_interval,
            },
        })
    }

    /// Whether draft/unpublished content should be requested upstream.
    /// The flag alone does nothing: hidden content is only reachable with
    /// an API token.
    pub fn show_hidden_active(&self) -> bool {
        self.dataverse.show_hidden && self.dataverse.api_token.is_some()
    }
}

fn duration_from_env(key: &str, default_secs: u64) -> Result<Duration> {
    let secs = match env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a number of seconds"))?,
        Err(_) => default_secs,
    };
    Ok(Duration::from_secs(secs))
}

/// Split a comma-separated collection list, dropping whitespace and empties.
fn parse_collections(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|alias| !alias.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_trimmed_and_empties_dropped() {
        assert_eq!(
            parse_collections("alpha, beta ,,gamma "),
            vec!["alpha", "beta", "gamma"]
        );
        assert!(parse_collections("").is_empty());
        assert!(parse_collections(" , ").is_empty());
    }

    #[test]
    fn show_hidden_requires_a_token() {
        let mut config = Config {
            server: ServerConfig {
                port: 3001,
                cors_origin: None,
            },
            dataverse: DataverseConfig {
                base_url: "https://demo.dataverse.org".to_string(),
                api_token: None,
                show_hidden: true,
                collections: vec![],
            },
            cache: CacheConfig {
                fresh_ttl: Duration::from_secs(300),
                stale_ttl: Duration::from_secs(3600),
                sweep_interval: Duration::from_secs(300),
            },
        };
        assert!(!config.show_hidden_active());

        config.dataverse.api_token = Some("token".to_string());
        assert!(config.show_hidden_active());

        config.dataverse.show_hidden = false;
        assert!(!config.show_hidden_active());
    }
}
