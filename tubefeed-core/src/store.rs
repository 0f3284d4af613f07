use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::freshness::FeedTimestamps;
use crate::merge::{merge_videos, replace_channel_videos, unseen_videos};
use crate::video::{ChannelMeta, Video};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedCacheEntry {
    pub videos: Arc<Vec<Video>>,
    pub channels: HashMap<String, ChannelMeta>,
    /// Channel set the entry was built from.
    pub channel_ids: Vec<String>,
    pub last_full_fetch: Option<DateTime<Utc>>,
    pub last_incremental_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl FeedCacheEntry {
    pub fn timestamps(&self) -> FeedTimestamps {
        FeedTimestamps {
            last_full_fetch: self.last_full_fetch,
            last_incremental_check: self.last_incremental_check,
        }
    }

    /// Same channels, ignoring order and repeats.
    pub fn covers_channels(&self, channel_ids: &[String]) -> bool {
        let mut mine: Vec<&str> = self.channel_ids.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = channel_ids.iter().map(String::as_str).collect();
        mine.sort_unstable();
        mine.dedup();
        theirs.sort_unstable();
        theirs.dedup();
        mine == theirs
    }

    pub fn videos_of(&self, channel_id: &str) -> Vec<Video> {
        self.videos
            .iter()
            .filter(|v| v.channel_id == channel_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChannel {
    pub meta: ChannelMeta,
    pub fetched_at: DateTime<Utc>,
}

/// Persistable part of the store.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheSnapshot {
    pub feeds: HashMap<String, FeedCacheEntry>,
    pub channels: HashMap<String, StoredChannel>,
    #[serde(default)]
    pub new_video_counts: HashMap<String, usize>,
}

impl CacheSnapshot {
    /// Drops everything older than `max_age`.
    pub fn retain_fresh(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.feeds.len() + self.channels.len();
        let cutoff = now - max_age;
        self.feeds
            .retain(|_, entry| entry.last_full_fetch.is_some_and(|at| at >= cutoff));
        self.channels.retain(|_, stored| stored.fetched_at >= cutoff);
        let feeds = &self.feeds;
        self.new_video_counts.retain(|name, _| feeds.contains_key(name));
        before - (self.feeds.len() + self.channels.len())
    }
}

#[derive(Debug, Default)]
struct Tables {
    snapshot: CacheSnapshot,
    loading: HashMap<String, bool>,
    errors: HashMap<String, String>,
}

/// Feed and channel tables plus per-feed UI state.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<Tables>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Tables {
                snapshot,
                ..Tables::default()
            })),
        }
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        self.inner.read().await.snapshot.clone()
    }

    // selectors

    pub async fn entry(&self, feed: &str) -> Option<FeedCacheEntry> {
        self.inner.read().await.snapshot.feeds.get(feed).cloned()
    }

    pub async fn videos(&self, feed: &str) -> Option<Arc<Vec<Video>>> {
        let inner = self.inner.read().await;
        inner.snapshot.feeds.get(feed).map(|e| Arc::clone(&e.videos))
    }

    pub async fn channel_meta(&self, channel_id: &str) -> Option<ChannelMeta> {
        let inner = self.inner.read().await;
        inner.snapshot.channels.get(channel_id).map(|s| s.meta.clone())
    }

    pub async fn channel_fetched_at(&self, channel_id: &str) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner.snapshot.channels.get(channel_id).map(|s| s.fetched_at)
    }

    pub async fn is_loading(&self, feed: &str) -> bool {
        let inner = self.inner.read().await;
        inner.loading.get(feed).copied().unwrap_or(false)
    }

    pub async fn error(&self, feed: &str) -> Option<String> {
        self.inner.read().await.errors.get(feed).cloned()
    }

    pub async fn new_video_count(&self, feed: &str) -> usize {
        let inner = self.inner.read().await;
        inner.snapshot.new_video_counts.get(feed).copied().unwrap_or(0)
    }

    pub async fn feed_names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner.snapshot.feeds.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata of the given channels currently in the shared table.
    pub async fn channels_for(&self, channel_ids: &[String]) -> HashMap<String, ChannelMeta> {
        let inner = self.inner.read().await;
        channel_ids
            .iter()
            .filter_map(|id| {
                inner
                    .snapshot
                    .channels
                    .get(id)
                    .map(|s| (id.clone(), s.meta.clone()))
            })
            .collect()
    }

    // mutations

    pub async fn write_entry(&self, feed: &str, entry: FeedCacheEntry) {
        let mut inner = self.inner.write().await;
        inner.snapshot.feeds.insert(feed.to_owned(), entry);
    }

    /// Writes a fetched entry and bumps the feed's counter by `discovered` in one step,
    /// unless `still_wanted` says otherwise once the lock is held.
    pub async fn commit_entry(
        &self,
        feed: &str,
        entry: FeedCacheEntry,
        discovered: usize,
        still_wanted: impl FnOnce() -> bool,
    ) -> bool {
        let mut inner = self.inner.write().await;
        if !still_wanted() {
            return false;
        }
        inner.snapshot.feeds.insert(feed.to_owned(), entry);
        if discovered > 0 {
            let count = inner
                .snapshot
                .new_video_counts
                .entry(feed.to_owned())
                .or_default();
            *count = count.saturating_add(discovered);
        }
        true
    }

    pub async fn patch_timestamps(&self, feed: &str, timestamps: FeedTimestamps) -> bool {
        let mut inner = self.inner.write().await;
        match inner.snapshot.feeds.get_mut(feed) {
            Some(entry) => {
                if timestamps.last_full_fetch.is_some() {
                    entry.last_full_fetch = timestamps.last_full_fetch;
                }
                if timestamps.last_incremental_check.is_some() {
                    entry.last_incremental_check = timestamps.last_incremental_check;
                }
                true
            }
            None => false,
        }
    }

    /// Merges `new_videos` into the feed's list and returns the ones actually added.
    pub async fn prepend_videos(&self, feed: &str, new_videos: &[Video]) -> Vec<Video> {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.snapshot.feeds.get_mut(feed) else {
            return Vec::new();
        };
        let fresh = unseen_videos(&entry.videos, new_videos.to_vec());
        if !fresh.is_empty() {
            entry.videos = Arc::new(merge_videos(&entry.videos, &fresh));
        }
        fresh
    }

    /// Replaces one channel's videos in the feed and records its metadata.
    pub async fn replace_channel(
        &self,
        feed: &str,
        channel_id: &str,
        fresh: &[Video],
        meta: Option<ChannelMeta>,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.snapshot.feeds.get_mut(feed) else {
            return false;
        };
        entry.videos = Arc::new(replace_channel_videos(&entry.videos, channel_id, fresh));
        if !entry.channel_ids.iter().any(|id| id == channel_id) {
            entry.channel_ids.push(channel_id.to_owned());
        }
        if let Some(meta) = meta {
            entry.channels.insert(channel_id.to_owned(), meta);
        }
        true
    }

    pub async fn set_loading(&self, feed: &str, loading: bool) {
        let mut inner = self.inner.write().await;
        if loading {
            inner.loading.insert(feed.to_owned(), true);
        } else {
            inner.loading.remove(feed);
        }
    }

    /// Sets or clears the feed's error. Also mirrored into the entry's `last_error`.
    pub async fn set_error(&self, feed: &str, error: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.snapshot.feeds.get_mut(feed) {
            entry.last_error = error.clone();
        }
        match error {
            Some(message) => {
                inner.errors.insert(feed.to_owned(), message);
            }
            None => {
                inner.errors.remove(feed);
            }
        }
    }

    pub async fn increment_new_count(&self, feed: &str, by: usize) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner
            .snapshot
            .new_video_counts
            .entry(feed.to_owned())
            .or_default();
        *count = count.saturating_add(by);
        *count
    }

    /// Returns whether anything changed.
    pub async fn reset_new_count(&self, feed: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner
            .snapshot
            .new_video_counts
            .remove(feed)
            .is_some_and(|count| count > 0)
    }

    /// Applies channel metadata only if `fetched_at` is newer than what is stored.
    pub async fn put_channel_meta(&self, meta: ChannelMeta, fetched_at: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write().await;
        let channel_id = meta.channel_id.clone();
        match inner.snapshot.channels.get(&channel_id) {
            Some(current) if current.fetched_at >= fetched_at => {
                debug!(channel = %channel_id, "ignoring stale channel metadata");
                false
            }
            _ => {
                inner
                    .snapshot
                    .channels
                    .insert(channel_id, StoredChannel { meta, fetched_at });
                true
            }
        }
    }

    pub async fn evict(&self, feed: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.loading.remove(feed);
        inner.errors.remove(feed);
        inner.snapshot.new_video_counts.remove(feed);
        inner.snapshot.feeds.remove(feed).is_some()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = Tables::default();
    }

    /// Evicts feeds and channel metadata older than `max_age`; returns the evicted feed names.
    pub async fn sweep_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let cutoff = now - max_age;
        let stale: Vec<String> = inner
            .snapshot
            .feeds
            .iter()
            .filter(|(_, entry)| !entry.last_full_fetch.is_some_and(|at| at >= cutoff))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            inner.snapshot.feeds.remove(name);
            inner.snapshot.new_video_counts.remove(name);
            inner.errors.remove(name);
        }
        inner
            .snapshot
            .channels
            .retain(|_, stored| stored.fetched_at >= cutoff);
        stale
    }
}
