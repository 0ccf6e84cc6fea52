//! Configuration for the symbols cache, search and parser

use crate::SymbolsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration as TOML
pub const DEFAULT_CONFIG: &str = r#"# Symbols Configuration

[cache]
# Directory holding cached index artifacts
dir = ".symbols-cache"
# Total size budget for the cache directory, in megabytes
max_size_mb = 100000
# Builds run against their own timeout so one impatient caller does not
# abort a build others are waiting on ("0s" ties builds to the caller)
background_timeout = "10m"
# How often the service runs an eviction pass
eviction_interval = "1m"

[search]
# Upper bound on a search, including a cache-miss index build
timeout = "60s"

[parser]
# Files larger than this (bytes) are not parsed
max_file_size = 1048576

[git]
# Repositories are resolved as <repos_root>/<repo>
repos_root = "repos"
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_background_timeout")]
    pub background_timeout: String,
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_repos_root")]
    pub repos_root: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".symbols-cache")
}
fn default_max_size_mb() -> u64 {
    100_000
}
fn default_background_timeout() -> String {
    "10m".to_string()
}
fn default_eviction_interval() -> String {
    "1m".to_string()
}
fn default_search_timeout() -> String {
    "60s".to_string()
}
fn default_max_file_size() -> u64 {
    1 << 20
}
fn default_repos_root() -> PathBuf {
    PathBuf::from("repos")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_size_mb: default_max_size_mb(),
            background_timeout: default_background_timeout(),
            eviction_interval: default_eviction_interval(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: default_search_timeout(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repos_root: default_repos_root(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SymbolsError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations the typed accessors could not honor.
    pub fn validate(&self) -> crate::Result<()> {
        let durations = [
            ("cache.background_timeout", &self.cache.background_timeout, true),
            ("cache.eviction_interval", &self.cache.eviction_interval, false),
            ("search.timeout", &self.search.timeout, false),
        ];
        for (field, value, zero_ok) in durations {
            match parse_duration(value) {
                None => {
                    return Err(SymbolsError::ConfigParse(format!(
                        "{field}: invalid duration {value:?} (expected e.g. \"30s\", \"5m\", \"1h\", \"2d\")"
                    )))
                }
                Some(d) if d.is_zero() && !zero_ok => {
                    return Err(SymbolsError::ConfigParse(format!(
                        "{field}: duration must be greater than zero"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Eviction budget in bytes
    pub fn cache_max_bytes(&self) -> u64 {
        self.cache.max_size_mb.saturating_mul(1024 * 1024)
    }

    /// Isolated build timeout; `None` when disabled with "0s"
    pub fn background_timeout(&self) -> Option<Duration> {
        parse_duration(&self.cache.background_timeout).filter(|d| !d.is_zero())
    }

    pub fn eviction_interval(&self) -> Duration {
        parse_duration(&self.cache.eviction_interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn search_timeout(&self) -> Duration {
        parse_duration(&self.search.timeout).unwrap_or(Duration::from_secs(60))
    }
}

/// Parse duration string (e.g., "1h", "30m", "1d")
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || !s.is_ascii() {
        return None;
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse().ok()?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return None,
    };
    num.checked_mul(multiplier).map(Duration::from_secs)
}
