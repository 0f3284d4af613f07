#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tubefeed_core::{
    CacheConfig, ChannelMeta, FeedCache, ManualClock, MemoryStore, SourceError, Video, VideoSource,
};

/// Scriptable upstream with call counters.
#[derive(Default)]
pub struct FakeSource {
    videos: Mutex<HashMap<String, Vec<Video>>>,
    failing: Mutex<HashSet<String>>,
    failing_meta: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    meta_delay: Mutex<Option<Duration>>,
    pub video_calls: AtomicUsize,
    pub latest_calls: AtomicUsize,
    pub meta_calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets a channel's uploads; kept sorted newest first like the real API.
    pub fn set_videos(&self, channel: &str, mut videos: Vec<Video>) {
        videos.sort_by_key(|v| std::cmp::Reverse(v.published()));
        self.videos.lock().unwrap().insert(channel.to_owned(), videos);
    }

    pub fn push_video(&self, channel: &str, video: Video) {
        let mut list = self.videos.lock().unwrap().get(channel).cloned().unwrap_or_default();
        list.push(video);
        self.set_videos(channel, list);
    }

    pub fn fail(&self, channel: &str) {
        self.failing.lock().unwrap().insert(channel.to_owned());
    }

    pub fn recover(&self, channel: &str) {
        self.failing.lock().unwrap().remove(channel);
    }

    /// Fails only the metadata lookups of `channel`.
    pub fn fail_metadata(&self, channel: &str) {
        self.failing_meta.lock().unwrap().insert(channel.to_owned());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_meta_delay(&self, delay: Duration) {
        *self.meta_delay.lock().unwrap() = Some(delay);
    }

    pub fn video_calls(&self) -> usize {
        self.video_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn meta_calls(&self) -> usize {
        self.meta_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(&self, channel: &str) -> Result<(), SourceError> {
        if self.failing.lock().unwrap().contains(channel) {
            Err(SourceError::Status {
                status: 503,
                body: format!("{channel} unavailable"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VideoSource for FakeSource {
    async fn fetch_channel_videos(&self, channel_id: &str) -> Result<Vec<Video>, SourceError> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.pause().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.check(channel_id)?;
        Ok(self.videos.lock().unwrap().get(channel_id).cloned().unwrap_or_default())
    }

    async fn fetch_latest_video(&self, channel_id: &str) -> Result<Option<Video>, SourceError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.check(channel_id)?;
        Ok(self
            .videos
            .lock()
            .unwrap()
            .get(channel_id)
            .and_then(|list| list.first().cloned()))
    }

    async fn fetch_channel_metadata(&self, channel_id: &str) -> Result<Option<ChannelMeta>, SourceError> {
        self.meta_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.meta_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(channel_id)?;
        if self.failing_meta.lock().unwrap().contains(channel_id) {
            return Err(SourceError::Other(format!("{channel_id} metadata unavailable")));
        }
        Ok(Some(ChannelMeta::new(channel_id, format!("Channel {channel_id}"))))
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// `count` videos for `channel`, one hour apart, newest at `start_time() - offset_hours`.
pub fn videos(channel: &str, count: usize, offset_hours: i64) -> Vec<Video> {
    (0..count)
        .map(|i| {
            let published = start_time() - chrono::Duration::hours(offset_hours + (i as i64) * 2);
            Video::new(format!("{channel}-v{i}"), channel, published.to_rfc3339())
                .with_extra("title", format!("{channel} video {i}"))
        })
        .collect()
}

pub fn channels(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub struct Harness {
    pub cache: FeedCache,
    pub source: Arc<FakeSource>,
    pub clock: Arc<ManualClock>,
    pub persistence: Arc<MemoryStore>,
}

pub fn harness(config: CacheConfig) -> Harness {
    let source = FakeSource::new();
    let clock = Arc::new(ManualClock::new(start_time()));
    let persistence = Arc::new(MemoryStore::new());
    let cache = FeedCache::with_parts(source.clone(), persistence.clone(), clock.clone(), config);
    Harness {
        cache,
        source,
        clock,
        persistence,
    }
}

pub fn assert_sorted_unique(list: &[Video]) {
    for pair in list.windows(2) {
        assert!(
            pair[0].published() >= pair[1].published(),
            "{} before {} breaks ordering",
            pair[0].id,
            pair[1].id
        );
    }
    let ids: HashSet<&str> = list.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids.len(), list.len(), "duplicate video ids");
}
