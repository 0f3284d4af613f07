pub mod abort;
pub mod clock;
pub mod config;
pub mod error;
pub mod freshness;
pub mod merge;
pub mod orchestrator;
pub mod persist;
pub mod refresh;
pub mod source;
pub mod store;
pub mod video;
pub mod youtube;

pub use abort::{AbortHandle, AbortSignal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_feeds, CacheConfig, FeedDescriptor, YouTubeConfig};
pub use error::{FetchError, SourceError, StoreError};
pub use freshness::{evaluate, FeedTimestamps, Freshness, FreshnessPolicy};
pub use merge::merge_videos;
pub use orchestrator::{CacheEvent, FeedCache, FeedFetchResult, FetchOptions, NewVideosResult};
pub use persist::{JsonFileStore, MemoryStore, SnapshotStore};
pub use refresh::{spawn_auto_refresh, spawn_cleanup, AutoRefreshHandle, CleanupHandle, SeenTimer};
pub use source::VideoSource;
pub use store::{CacheSnapshot, CacheStore, FeedCacheEntry, StoredChannel};
pub use video::{ChannelMeta, Video};
pub use youtube::YouTubeSource;
