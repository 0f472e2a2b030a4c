//! Configuration loading from TOML files

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cumulus_core::{RetryPolicy, SourceTag};
use cumulus_sources::SourceSettings;
use cumulus_store::DownloadOptions;
use serde::Deserialize;

/// Global configuration for cumulus
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub output: OutputConfig,
    pub http: HttpConfig,
    pub query: QueryConfig,
    pub download: DownloadConfig,
    /// Keyed by source name (`met_museum`, `harvard`, ...)
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cumulus-output"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Seconds before a request is abandoned
    pub read_timeout: u64,
    pub max_retries: u32,
    /// Backoff unit; the n-th retry waits `backoff_base_ms * 2^n`
    pub backoff_base_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub terms: Vec<String>,
    pub exclude: Vec<String>,
    /// Items examined per source and term
    pub max_results: Option<usize>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            terms: vec!["cloud".to_string()],
            exclude: ["saint cloud", "saint-cloud", "st cloud", "st. cloud"]
                .map(String::from)
                .to_vec(),
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub images: bool,
    /// Resolution labels to fetch; all when unset
    pub labels: Option<Vec<String>>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            images: true,
            labels: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub requests_per_second: Option<f64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: None,
            requests_per_second: None,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

/// `HARVARD_API_KEY`, `SMITHSONIAN_API_KEY`, ...
fn env_key_name(tag: SourceTag) -> String {
    format!("{}_API_KEY", tag.name().to_uppercase())
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./cumulus.toml (current directory)
    /// 2. ~/.config/cumulus/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("cumulus.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "cumulus") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.check_source_names()?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn check_source_names(&self) -> Result<()> {
        for name in self.sources.keys() {
            if SourceTag::from_name(name).is_none_or(|tag| tag == SourceTag::Manual) {
                anyhow::bail!("unknown source [sources.{name}]");
            }
        }
        Ok(())
    }

    fn source(&self, tag: SourceTag) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|(name, _)| SourceTag::from_name(name) == Some(tag))
            .map(|(_, cfg)| cfg)
    }

    /// Connection settings for one adapter; the key falls back to `<TAG>_API_KEY`.
    pub fn settings_for(&self, tag: SourceTag) -> SourceSettings {
        let cfg = self.source(tag);
        let api_key = cfg
            .and_then(|c| c.api_key.clone())
            .or_else(|| std::env::var(env_key_name(tag)).ok())
            .filter(|k| !k.trim().is_empty());
        SourceSettings {
            api_key,
            base_url: cfg.and_then(|c| c.base_url.clone()),
            timeout: Duration::from_secs(self.http.read_timeout),
        }
    }

    /// Sources collected when the command line names none: every enabled
    /// institution that has the credential it needs.
    pub fn default_sources(&self) -> Vec<SourceTag> {
        SourceTag::institutions()
            .iter()
            .copied()
            .filter(|&tag| self.source(tag).is_none_or(|c| c.enabled))
            .filter(|&tag| {
                let usable =
                    !cumulus_sources::requires_key(tag) || self.settings_for(tag).api_key.is_some();
                if !usable {
                    log::warn!(
                        "skipping {tag}: no API key (set sources.{tag}.api_key or {})",
                        env_key_name(tag)
                    );
                }
                usable
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.http.max_retries,
            base: Duration::from_millis(self.http.backoff_base_ms),
        }
    }

    /// Per-source pacing overrides
    pub fn rates(&self) -> BTreeMap<SourceTag, f64> {
        self.sources
            .iter()
            .filter_map(|(name, cfg)| Some((SourceTag::from_name(name)?, cfg.requests_per_second?)))
            .collect()
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            images: self.download.images,
            labels: self
                .download
                .labels
                .as_ref()
                .map(|labels| labels.iter().cloned().collect::<BTreeSet<_>>()),
        }
    }
}
