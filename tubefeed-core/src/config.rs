use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::freshness::FreshnessPolicy;

const APP_DIR: &str = "tubefeed";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub full_fetch_ttl_secs: u64,
    pub incremental_ttl_secs: u64,
    pub metadata_ttl_secs: u64,
    /// Feed entries and channel metadata older than this are evicted and not rehydrated.
    pub max_age_secs: u64,
    /// Channels whose videos are fetched at once.
    pub batch_size: usize,
    pub metadata_concurrency: usize,
    /// Largest counter increment a single full fetch may report.
    pub new_video_cap: usize,
    pub mark_seen_delay_ms: u64,
    pub auto_refresh_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub youtube: YouTubeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct YouTubeConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub max_results: u32,
    pub request_timeout_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            full_fetch_ttl_secs: 15 * 60,
            incremental_ttl_secs: 5 * 60,
            metadata_ttl_secs: 30 * 60,
            max_age_secs: 60 * 60,
            batch_size: 3,
            metadata_concurrency: 8,
            new_video_cap: 10,
            mark_seen_delay_ms: 2_000,
            auto_refresh_interval_secs: 5 * 60,
            cleanup_interval_secs: 10 * 60,
            youtube: YouTubeConfig::default(),
        }
    }
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/youtube/v3".to_owned(),
            api_key: None,
            max_results: 25,
            request_timeout_seconds: 10,
        }
    }
}

impl CacheConfig {
    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy {
            full_fetch_ttl: secs(self.full_fetch_ttl_secs),
            incremental_ttl: secs(self.incremental_ttl_secs),
        }
    }

    pub fn metadata_ttl(&self) -> chrono::Duration {
        secs(self.metadata_ttl_secs)
    }

    pub fn max_age(&self) -> chrono::Duration {
        secs(self.max_age_secs)
    }

    pub fn mark_seen_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.mark_seen_delay_ms)
    }

    pub fn auto_refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_refresh_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// `~/.config/tubefeed` on Linux.
    pub fn config_dir() -> Result<PathBuf, StoreError> {
        let dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(dir.join(APP_DIR))
    }

    pub fn config_file_path() -> Result<PathBuf, StoreError> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads the config file, or writes and returns the defaults.
    pub fn load() -> Self {
        let path = match Self::config_file_path() {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "using default configuration");
                return Self::default();
            }
        };
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to load configuration, using defaults");
                let config = Self::default();
                if let Err(save_err) = config.save_to(&path) {
                    warn!(error = %save_err, "failed to write default configuration");
                }
                config
            }
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

/// A named group of channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub name: String,
    pub channel_ids: Vec<String>,
}

/// Reads `feeds.json`, falling back to `feeds.json.tmp` if the main file is corrupt.
pub async fn load_feeds(path: impl AsRef<Path>) -> Vec<FeedDescriptor> {
    read_json_with_tmp_fallback(path.as_ref()).await
}

pub(crate) async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                let tmp = tmp_path(path);
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => Default::default(),
                }
            }
        },
        Err(e) => {
            debug!(error = %e, path = %path.display(), "nothing to load");
            Default::default()
        }
    }
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "batch_size": 5, "youtube": { "max_results": 10 } }"#).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.youtube.max_results, 10);
        assert_eq!(config.full_fetch_ttl_secs, 900);
        assert_eq!(config.youtube.api_base, YouTubeConfig::default().api_base);
    }

    #[test]
    fn policy_uses_configured_ttls() {
        let config = CacheConfig {
            full_fetch_ttl_secs: 60,
            incremental_ttl_secs: 10,
            ..CacheConfig::default()
        };
        let policy = config.freshness_policy();
        assert_eq!(policy.full_fetch_ttl, chrono::Duration::seconds(60));
        assert_eq!(policy.incremental_ttl, chrono::Duration::seconds(10));
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/x/feeds.json")), PathBuf::from("/x/feeds.json.tmp"));
    }
}
