use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::abort::{AbortHandle, AbortSignal};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{FetchError, SourceError};
use crate::freshness::{evaluate, FeedTimestamps, Freshness};
use crate::merge::{merge_videos, newest_by_channel, unseen_videos};
use crate::persist::{MemoryStore, SnapshotStore};
use crate::source::VideoSource;
use crate::store::{CacheSnapshot, CacheStore, FeedCacheEntry};
use crate::video::{ChannelMeta, Video};

const EVENT_CAPACITY: usize = 64;

/// Store changes observers can react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Loading(String, bool),
    FeedUpdated(String),
    /// Feed name and how many videos were just discovered.
    NewVideos(String, usize),
    Failed(String, String),
    Seen(String),
    Evicted(String),
    Cleared,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub force_refresh: bool,
    pub abort: Option<AbortSignal>,
}

impl FetchOptions {
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            abort: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedFetchResult {
    pub entry: FeedCacheEntry,
    /// No full fetch ran: the entry came from the store, possibly after an incremental check.
    pub from_cache: bool,
    pub has_new_videos: bool,
    /// Videos in the entry that were not cached before this call.
    pub new_video_count: usize,
    /// The videos counted by `new_video_count`, newest first.
    pub new_videos: Vec<Video>,
    /// Some or all of the entry is stale data kept because upstream failed.
    pub fallback_used: bool,
    pub error: Option<String>,
}

impl FeedFetchResult {
    fn cached(entry: FeedCacheEntry) -> Self {
        Self {
            error: entry.last_error.clone(),
            entry,
            from_cache: true,
            has_new_videos: false,
            new_video_count: 0,
            new_videos: Vec::new(),
            fallback_used: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewVideosResult {
    pub has_new_videos: bool,
    pub new_videos: Vec<Video>,
}

type FetchOutcome = Result<FeedFetchResult, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Full,
    Incremental,
}

struct InFlight {
    id: u64,
    abort: AbortHandle,
    result: SharedFetch,
}

struct Inner {
    store: CacheStore,
    source: Arc<dyn VideoSource>,
    clock: Arc<dyn Clock>,
    persistence: Arc<dyn SnapshotStore>,
    config: CacheConfig,
    events: broadcast::Sender<CacheEvent>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    save_lock: tokio::sync::Mutex<()>,
    next_op: AtomicU64,
}

/// Video cache for named feeds of channels.
///
/// Cloning is cheap; clones share the same store, in-flight table and event channel.
#[derive(Clone)]
pub struct FeedCache {
    inner: Arc<Inner>,
}

impl FeedCache {
    /// In-memory cache on the system clock.
    pub fn new(source: Arc<dyn VideoSource>, config: CacheConfig) -> Self {
        Self::with_parts(
            source,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            config,
        )
    }

    /// Empty cache with explicit collaborators. Nothing is read from `persistence`.
    pub fn with_parts(
        source: Arc<dyn VideoSource>,
        persistence: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        Self::from_store(CacheStore::new(), source, persistence, clock, config)
    }

    /// Rehydrates from `persistence`, skipping anything older than the configured max age.
    pub async fn load(
        source: Arc<dyn VideoSource>,
        persistence: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let snapshot = match persistence.load().await {
            Ok(Some(mut snapshot)) => {
                let dropped = snapshot.retain_fresh(clock.now(), config.max_age());
                debug!(
                    feeds = snapshot.feeds.len(),
                    dropped, "rehydrated cache snapshot"
                );
                snapshot
            }
            Ok(None) => CacheSnapshot::default(),
            Err(e) => {
                warn!(error = %e, "failed to load cache snapshot, starting empty");
                CacheSnapshot::default()
            }
        };
        Self::from_store(
            CacheStore::from_snapshot(snapshot),
            source,
            persistence,
            clock,
            config,
        )
    }

    fn from_store(
        store: CacheStore,
        source: Arc<dyn VideoSource>,
        persistence: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                clock,
                persistence,
                config,
                events,
                in_flight: Mutex::new(HashMap::new()),
                save_lock: tokio::sync::Mutex::new(()),
                next_op: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    // selectors

    pub async fn entry(&self, feed: &str) -> Option<FeedCacheEntry> {
        self.inner.store.entry(feed).await
    }

    pub async fn videos(&self, feed: &str) -> Option<Arc<Vec<Video>>> {
        self.inner.store.videos(feed).await
    }

    pub async fn channel_meta(&self, channel_id: &str) -> Option<ChannelMeta> {
        self.inner.store.channel_meta(channel_id).await
    }

    pub async fn is_loading(&self, feed: &str) -> bool {
        self.inner.store.is_loading(feed).await
    }

    pub async fn error(&self, feed: &str) -> Option<String> {
        self.inner.store.error(feed).await
    }

    pub async fn new_video_count(&self, feed: &str) -> usize {
        self.inner.store.new_video_count(feed).await
    }

    pub async fn feed_names(&self) -> Vec<String> {
        self.inner.store.feed_names().await
    }

    pub fn is_fetching(&self, feed: &str) -> bool {
        self.lock_in_flight().contains_key(feed)
    }

    // operations

    /// Returns the feed's videos, fetching from upstream when the cache is stale.
    ///
    /// At most one fetch per feed runs at a time; concurrent callers share its result.
    pub async fn fetch_feed(
        &self,
        feed: &str,
        channel_ids: &[String],
        options: FetchOptions,
    ) -> FetchOutcome {
        let caller_abort = options.abort.unwrap_or_default();
        if caller_abort.is_aborted() {
            return Err(FetchError::Cancelled);
        }
        let channel_ids = dedup_channels(channel_ids);

        if let Some(running) = self.running_fetch(feed) {
            debug!(feed = %feed, "joining in-flight fetch");
            return wait_for(running, &caller_abort).await;
        }

        let mut plan = Plan::Full;
        if !options.force_refresh {
            if let Some(entry) = self.inner.store.entry(feed).await {
                if entry.covers_channels(&channel_ids) {
                    let policy = self.inner.config.freshness_policy();
                    match evaluate(Some(entry.timestamps()), self.inner.clock.now(), &policy) {
                        Freshness::ServeCache => {
                            debug!(feed = %feed, "serving feed from cache");
                            return Ok(FeedFetchResult::cached(entry));
                        }
                        Freshness::IncrementalCheckDue => plan = Plan::Incremental,
                        Freshness::FullFetchRequired => {}
                    }
                } else {
                    debug!(feed = %feed, "channel set changed, refetching");
                }
            }
        }

        let running = self.start_or_join(feed, channel_ids, plan, &caller_abort);
        wait_for(running, &caller_abort).await
    }

    /// Asks each channel for its latest upload and merges anything newer than the cache.
    ///
    /// Without a cache entry this falls back to a full [`fetch_feed`](Self::fetch_feed).
    /// The check shares the feed's single-flight slot, so while a full fetch is running
    /// the caller gets that fetch's result instead of starting a second round.
    pub async fn check_for_new_videos(
        &self,
        feed: &str,
        channel_ids: &[String],
        abort: Option<AbortSignal>,
    ) -> Result<NewVideosResult, FetchError> {
        let abort = abort.unwrap_or_default();
        if abort.is_aborted() {
            return Err(FetchError::Cancelled);
        }
        let result = if self.inner.store.entry(feed).await.is_none() {
            let options = FetchOptions {
                force_refresh: false,
                abort: Some(abort),
            };
            self.fetch_feed(feed, channel_ids, options).await?
        } else {
            let running = self.start_or_join(feed, dedup_channels(channel_ids), Plan::Incremental, &abort);
            wait_for(running, &abort).await?
        };
        Ok(NewVideosResult {
            has_new_videos: result.has_new_videos,
            new_videos: result.new_videos,
        })
    }

    /// Refetches one channel of a cached feed and swaps its videos in place.
    pub async fn refresh_channel(&self, feed: &str, channel_id: &str) -> Result<(), FetchError> {
        let store = &self.inner.store;
        if store.entry(feed).await.is_none() {
            return Err(FetchError::NotCached(feed.to_owned()));
        }

        let requested_at = self.inner.clock.now();
        let source = &self.inner.source;
        let (videos, meta) = tokio::join!(
            source.fetch_channel_videos(channel_id),
            source.fetch_channel_metadata(channel_id)
        );

        match meta {
            Ok(Some(mut meta)) => {
                meta.channel_id = channel_id.to_owned();
                store.put_channel_meta(meta, requested_at).await;
            }
            Ok(None) => debug!(channel = %channel_id, "no metadata for channel"),
            Err(e) => warn!(channel = %channel_id, error = %e, "channel metadata fetch failed"),
        }

        let videos = match videos {
            Ok(videos) => normalize_channel(videos, channel_id),
            Err(e) => {
                let message = e.to_string();
                warn!(feed = %feed, channel = %channel_id, error = %message, "channel refresh failed");
                store
                    .set_error(feed, Some(format!("{channel_id}: {message}")))
                    .await;
                self.emit(CacheEvent::Failed(feed.to_owned(), message.clone()));
                self.persist().await;
                return Err(FetchError::ChannelFailed {
                    channel: channel_id.to_owned(),
                    message,
                });
            }
        };

        let meta = store.channel_meta(channel_id).await;
        if !store.replace_channel(feed, channel_id, &videos, meta).await {
            return Err(FetchError::NotCached(feed.to_owned()));
        }
        store.set_error(feed, None).await;
        info!(feed = %feed, channel = %channel_id, videos = videos.len(), "channel refreshed");
        self.emit(CacheEvent::FeedUpdated(feed.to_owned()));
        self.persist().await;
        Ok(())
    }

    /// Aborts the in-flight fetch of `feed`, if any.
    pub fn cancel_feed(&self, feed: &str) -> bool {
        match self.lock_in_flight().get(feed) {
            Some(running) => {
                running.abort.abort();
                true
            }
            None => false,
        }
    }

    pub async fn clear_feed_cache(&self, feed: &str) {
        self.cancel_feed(feed);
        if self.inner.store.evict(feed).await {
            self.emit(CacheEvent::Evicted(feed.to_owned()));
        }
        self.persist().await;
    }

    pub async fn clear_all_cache(&self) {
        for running in self.lock_in_flight().values() {
            running.abort.abort();
        }
        self.inner.store.clear().await;
        self.emit(CacheEvent::Cleared);
        self.persist().await;
    }

    /// Acknowledges the feed's new videos.
    pub async fn mark_seen(&self, feed: &str) {
        if self.inner.store.reset_new_count(feed).await {
            self.emit(CacheEvent::Seen(feed.to_owned()));
            self.persist().await;
        }
    }

    /// Evicts feeds and channel metadata older than the configured max age.
    pub async fn sweep_stale(&self) -> Vec<String> {
        let evicted = self
            .inner
            .store
            .sweep_stale(self.inner.clock.now(), self.inner.config.max_age())
            .await;
        if !evicted.is_empty() {
            info!(feeds = evicted.len(), "evicted stale feeds");
            for feed in &evicted {
                self.emit(CacheEvent::Evicted(feed.clone()));
            }
        }
        self.persist().await;
        evicted
    }

    // single-flight

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn running_fetch(&self, feed: &str) -> Option<SharedFetch> {
        self.lock_in_flight()
            .get(feed)
            .map(|running| running.result.clone())
    }

    fn start_or_join(
        &self,
        feed: &str,
        channel_ids: Vec<String>,
        plan: Plan,
        caller_abort: &AbortSignal,
    ) -> SharedFetch {
        let mut in_flight = self.lock_in_flight();
        if let Some(running) = in_flight.get(feed) {
            return running.result.clone();
        }

        let id = self.inner.next_op.fetch_add(1, Ordering::Relaxed);
        let abort = AbortHandle::new();
        let signal = abort.signal().or(caller_abort);
        let this = self.clone();
        let name = feed.to_owned();
        let task = tokio::spawn(async move {
            let outcome = match plan {
                Plan::Full => this.run_full_fetch(&name, &channel_ids, &signal).await,
                Plan::Incremental => this.run_incremental_fetch(&name, &channel_ids, &signal).await,
            };
            this.finish(&name, id);
            outcome
        });
        let result = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(FetchError::from(e)),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            feed.to_owned(),
            InFlight {
                id,
                abort,
                result: result.clone(),
            },
        );
        result
    }

    fn finish(&self, feed: &str, id: u64) {
        let mut in_flight = self.lock_in_flight();
        if in_flight.get(feed).is_some_and(|running| running.id == id) {
            in_flight.remove(feed);
        }
    }

    // full fetch

    async fn run_full_fetch(
        &self,
        feed: &str,
        channel_ids: &[String],
        abort: &AbortSignal,
    ) -> FetchOutcome {
        let store = &self.inner.store;
        store.set_loading(feed, true).await;
        store.set_error(feed, None).await;
        self.emit(CacheEvent::Loading(feed.to_owned(), true));

        let outcome = self.full_fetch(feed, channel_ids, abort).await;

        store.set_loading(feed, false).await;
        self.emit(CacheEvent::Loading(feed.to_owned(), false));
        match &outcome {
            Err(FetchError::Cancelled) => info!(feed = %feed, "feed fetch cancelled"),
            Err(e) => {
                warn!(feed = %feed, error = %e, "feed fetch failed");
                store.set_error(feed, Some(e.to_string())).await;
                self.emit(CacheEvent::Failed(feed.to_owned(), e.to_string()));
            }
            Ok(result) => {
                if let Some(message) = &result.error {
                    store.set_error(feed, Some(message.clone())).await;
                }
            }
        }
        self.persist().await;
        outcome
    }

    async fn full_fetch(
        &self,
        feed: &str,
        channel_ids: &[String],
        abort: &AbortSignal,
    ) -> FetchOutcome {
        if abort.is_aborted() {
            return Err(FetchError::Cancelled);
        }
        let store = &self.inner.store;
        let previous = store.entry(feed).await;

        let source = Arc::clone(&self.inner.source);
        let ((), fetched) = tokio::join!(
            self.refresh_stale_metadata(channel_ids, abort),
            self.in_batches(channel_ids, abort, move |id| {
                let source = Arc::clone(&source);
                async move {
                    source
                        .fetch_channel_videos(&id)
                        .await
                        .map(|videos| normalize_channel(videos, &id))
                }
            })
        );
        let fetched = fetched?;
        if abort.is_aborted() {
            debug!(feed = %feed, "aborted after channel fetches");
            return Err(FetchError::Cancelled);
        }

        let mut lists: Vec<Vec<Video>> = Vec::with_capacity(fetched.len());
        let mut failures: Vec<String> = Vec::new();
        let mut fallback_used = false;
        for (channel, result) in fetched {
            match result {
                Ok(videos) => lists.push(videos),
                Err(message) => {
                    let fallback = previous
                        .as_ref()
                        .map(|entry| entry.videos_of(&channel))
                        .unwrap_or_default();
                    warn!(
                        feed = %feed,
                        channel = %channel,
                        error = %message,
                        fallback = fallback.len(),
                        "channel fetch failed"
                    );
                    fallback_used |= !fallback.is_empty();
                    failures.push(format!("{channel}: {message}"));
                    lists.push(fallback);
                }
            }
        }
        let error = (!failures.is_empty()).then(|| failures.join("; "));

        if !channel_ids.is_empty() && failures.len() == channel_ids.len() {
            let message = error.unwrap_or_default();
            return match previous {
                Some(mut entry) => {
                    warn!(feed = %feed, "every channel failed, serving stale cache");
                    entry.last_error = Some(message.clone());
                    Ok(FeedFetchResult {
                        entry,
                        from_cache: true,
                        has_new_videos: false,
                        new_video_count: 0,
                        new_videos: Vec::new(),
                        fallback_used: true,
                        error: Some(message),
                    })
                }
                None => Err(FetchError::AllChannelsFailed {
                    feed: feed.to_owned(),
                    message,
                }),
            };
        }

        let all: Vec<Video> = lists.into_iter().flatten().collect();
        let videos = merge_videos(&[], &all);

        let (has_new_videos, new_videos) = match &previous {
            Some(entry) => {
                let before = newest_by_channel(&entry.videos);
                let has_new = newest_by_channel(&videos)
                    .iter()
                    .any(|(channel, newest)| before.get(channel).map_or(true, |old| newest > old));
                let known: HashSet<&str> = entry.videos.iter().map(|v| v.id.as_str()).collect();
                let discovered: Vec<Video> = videos
                    .iter()
                    .filter(|v| !known.contains(v.id.as_str()))
                    .cloned()
                    .collect();
                (has_new, discovered)
            }
            None => (!videos.is_empty(), videos.clone()),
        };
        let new_video_count = new_videos.len();

        let now = self.inner.clock.now();
        let entry = FeedCacheEntry {
            videos: Arc::new(videos),
            channels: store.channels_for(channel_ids).await,
            channel_ids: channel_ids.to_vec(),
            last_full_fetch: Some(now),
            last_incremental_check: Some(now),
            last_error: error.clone(),
        };
        let increment = if has_new_videos {
            new_video_count.min(self.inner.config.new_video_cap)
        } else {
            0
        };
        // a clear or cancel racing the write must win
        if !store
            .commit_entry(feed, entry.clone(), increment, || !abort.is_aborted())
            .await
        {
            debug!(feed = %feed, "aborted before commit");
            return Err(FetchError::Cancelled);
        }
        if increment > 0 {
            self.emit(CacheEvent::NewVideos(feed.to_owned(), increment));
        }
        self.emit(CacheEvent::FeedUpdated(feed.to_owned()));
        info!(
            feed = %feed,
            videos = entry.videos.len(),
            failed = failures.len(),
            new = new_video_count,
            "feed fetched"
        );

        Ok(FeedFetchResult {
            entry,
            from_cache: false,
            has_new_videos,
            new_video_count,
            new_videos,
            fallback_used,
            error,
        })
    }

    /// Fetches metadata for channels missing from the shared table or past the metadata TTL.
    /// Pending requests are dropped once `abort` fires.
    async fn refresh_stale_metadata(&self, channel_ids: &[String], abort: &AbortSignal) {
        let store = &self.inner.store;
        let clock = &self.inner.clock;
        let now = clock.now();
        let ttl = self.inner.config.metadata_ttl();

        let mut stale = Vec::new();
        for id in channel_ids {
            match store.channel_fetched_at(id).await {
                Some(fetched_at) if now - fetched_at < ttl => {}
                _ => stale.push(id.clone()),
            }
        }
        if stale.is_empty() {
            return;
        }

        let source = Arc::clone(&self.inner.source);
        let clock = Arc::clone(clock);
        let signal = abort.clone();
        let results: Vec<_> = stream::iter(stale)
            .map(move |id| {
                let source = Arc::clone(&source);
                let clock = Arc::clone(&clock);
                let abort = signal.clone();
                async move {
                    let requested_at = clock.now();
                    let result = tokio::select! {
                        biased;
                        _ = abort.aborted() => return None,
                        result = source.fetch_channel_metadata(&id) => result,
                    };
                    Some((id, requested_at, result))
                }
            })
            .buffer_unordered(self.inner.config.metadata_concurrency.max(1))
            .filter_map(|settled| async move { settled })
            .collect()
            .await;
        if abort.is_aborted() {
            debug!("metadata refresh aborted");
            return;
        }

        for (id, requested_at, result) in results {
            match result {
                Ok(Some(mut meta)) => {
                    meta.channel_id = id;
                    store.put_channel_meta(meta, requested_at).await;
                }
                Ok(None) => debug!(channel = %id, "no metadata for channel"),
                Err(e) => warn!(channel = %id, error = %e, "channel metadata fetch failed"),
            }
        }
    }

    /// Runs `fetch` for every channel, `batch_size` at a time, each batch settled
    /// before the next starts.
    async fn in_batches<T, F, Fut>(
        &self,
        channel_ids: &[String],
        abort: &AbortSignal,
        fetch: F,
    ) -> Result<Vec<(String, Result<T, String>)>, FetchError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let batch_size = self.inner.config.batch_size.max(1);
        let mut settled = Vec::with_capacity(channel_ids.len());
        for (index, batch) in channel_ids.chunks(batch_size).enumerate() {
            if abort.is_aborted() {
                debug!(batch = index, "aborted before batch");
                return Err(FetchError::Cancelled);
            }
            let results = join_all(batch.iter().cloned().map(|id| {
                let pending = fetch(id.clone());
                let abort = abort.clone();
                async move {
                    let result = pending.await.map_err(|e| e.to_string());
                    (id, result, abort.is_aborted())
                }
            }))
            .await;
            for (id, result, aborted) in results {
                if aborted {
                    debug!(batch = index, channel = %id, "aborted after fetch");
                    return Err(FetchError::Cancelled);
                }
                settled.push((id, result));
            }
        }
        Ok(settled)
    }

    // incremental check

    async fn run_incremental_fetch(
        &self,
        feed: &str,
        channel_ids: &[String],
        abort: &AbortSignal,
    ) -> FetchOutcome {
        let check = self.run_incremental(feed, channel_ids, abort).await?;
        let entry = self
            .inner
            .store
            .entry(feed)
            .await
            .ok_or_else(|| FetchError::NotCached(feed.to_owned()))?;
        Ok(FeedFetchResult {
            error: entry.last_error.clone(),
            entry,
            from_cache: true,
            has_new_videos: check.has_new_videos,
            new_video_count: check.new_videos.len(),
            new_videos: check.new_videos,
            fallback_used: false,
        })
    }

    async fn run_incremental(
        &self,
        feed: &str,
        channel_ids: &[String],
        abort: &AbortSignal,
    ) -> Result<NewVideosResult, FetchError> {
        let store = &self.inner.store;
        let entry = store
            .entry(feed)
            .await
            .ok_or_else(|| FetchError::NotCached(feed.to_owned()))?;
        let newest = newest_by_channel(&entry.videos);

        let source = Arc::clone(&self.inner.source);
        let latest = self
            .in_batches(channel_ids, abort, move |id| {
                let source = Arc::clone(&source);
                async move { source.fetch_latest_video(&id).await }
            })
            .await?;

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for (channel, result) in latest {
            match result {
                Ok(Some(mut video)) => {
                    if video.channel_id.is_empty() {
                        video.channel_id = channel.clone();
                    }
                    let is_newer = newest
                        .get(&channel)
                        .map_or(true, |cached| video.published() > *cached);
                    if is_newer {
                        candidates.push(video);
                    }
                }
                Ok(None) => {}
                Err(message) => {
                    warn!(feed = %feed, channel = %channel, error = %message, "latest video lookup failed");
                    failures.push(format!("{channel}: {message}"));
                }
            }
        }

        if !channel_ids.is_empty() && failures.len() == channel_ids.len() {
            let message = failures.join("; ");
            store.set_error(feed, Some(message.clone())).await;
            self.emit(CacheEvent::Failed(feed.to_owned(), message));
            self.persist().await;
            return Ok(NewVideosResult::default());
        }

        let candidates = unseen_videos(&entry.videos, candidates);
        let added = store.prepend_videos(feed, &candidates).await;
        store
            .patch_timestamps(
                feed,
                FeedTimestamps {
                    last_full_fetch: None,
                    last_incremental_check: Some(self.inner.clock.now()),
                },
            )
            .await;
        store
            .set_error(feed, (!failures.is_empty()).then(|| failures.join("; ")))
            .await;

        if !added.is_empty() {
            store.increment_new_count(feed, added.len()).await;
            info!(feed = %feed, new = added.len(), "new videos found");
            self.emit(CacheEvent::NewVideos(feed.to_owned(), added.len()));
            self.emit(CacheEvent::FeedUpdated(feed.to_owned()));
        } else {
            debug!(feed = %feed, "no new videos");
        }
        self.persist().await;

        Ok(NewVideosResult {
            has_new_videos: !added.is_empty(),
            new_videos: added,
        })
    }

    // plumbing

    fn emit(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    async fn persist(&self) {
        let _guard = self.inner.save_lock.lock().await;
        let snapshot = self.inner.store.snapshot().await;
        if let Err(e) = self.inner.persistence.save(&snapshot).await {
            warn!(error = %e, "failed to persist cache snapshot");
        }
    }
}

async fn wait_for(running: SharedFetch, abort: &AbortSignal) -> FetchOutcome {
    tokio::select! {
        biased;
        outcome = running => outcome,
        _ = abort.aborted() => Err(FetchError::Cancelled),
    }
}

fn dedup_channels(channel_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    channel_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Fills in the channel id when upstream left it blank.
fn normalize_channel(mut videos: Vec<Video>, channel_id: &str) -> Vec<Video> {
    for video in &mut videos {
        if video.channel_id.is_empty() {
            video.channel_id = channel_id.to_owned();
        }
    }
    videos
}
