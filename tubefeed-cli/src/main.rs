use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tubefeed_core::{
    load_feeds, spawn_cleanup, CacheConfig, CacheEvent, FeedCache, FeedDescriptor, FeedFetchResult,
    FetchOptions, JsonFileStore, SystemClock, YouTubeSource,
};

#[derive(Parser, Debug)]
#[clap(name = "tubefeed", version)]
struct Args {
    /// Feed to show; lists the configured feeds when omitted
    #[clap(name = "FEED")]
    feed: Option<String>,

    /// Skip the cache and fetch every channel
    #[clap(long)]
    force: bool,

    /// Keep running and report new uploads until interrupted
    #[clap(long)]
    watch: bool,

    /// Print the feed's videos as JSON
    #[clap(long)]
    json: bool,

    /// Mark the feed's new videos as seen after printing
    #[clap(long)]
    seen: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let mut config = CacheConfig::load();
    if let Ok(key) = std::env::var("YOUTUBE_API_KEY") {
        config.youtube.api_key = Some(key);
    }
    if config.youtube.api_key.is_none() {
        warn!("no YouTube API key configured, requests will likely be rejected");
    }

    let dir = config_dir();
    let feeds = load_feeds(dir.join("feeds.json")).await;
    let Some(name) = args.feed else {
        list_feeds(&feeds);
        return Ok(());
    };
    let Some(feed) = feeds.into_iter().find(|f| f.name == name) else {
        eprintln!("no feed named {name} in {}", dir.join("feeds.json").display());
        std::process::exit(1);
    };

    let source = Arc::new(YouTubeSource::from_config(&config.youtube)?);
    let cache = FeedCache::load(
        source,
        Arc::new(JsonFileStore::in_dir(&dir)),
        Arc::new(SystemClock),
        config.clone(),
    )
    .await;

    let options = if args.force {
        FetchOptions::forced()
    } else {
        FetchOptions::default()
    };
    let result = cache.fetch_feed(&feed.name, &feed.channel_ids, options).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(result.entry.videos.as_ref())?);
    } else {
        print_result(&feed, &result, cache.new_video_count(&feed.name).await);
    }
    if args.seen {
        cache.mark_seen(&feed.name).await;
    }

    if args.watch {
        watch(&cache, &feed).await?;
    }
    Ok(())
}

async fn watch(cache: &FeedCache, feed: &FeedDescriptor) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = cache.subscribe();
    let refresher = cache.auto_refresh(&feed.name, &feed.channel_ids);
    let cleanup = spawn_cleanup(cache.clone(), cache.config().cleanup_interval());
    info!(feed = %feed.name, "watching for new videos, ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(CacheEvent::NewVideos(name, count)) if name == feed.name => {
                    println!("{count} new video(s) in {name}");
                    if let Some(videos) = cache.videos(&name).await {
                        for video in videos.iter().take(count) {
                            println!("  {}  {}  {}", video.published_at, video.id, video.title().unwrap_or("-"));
                        }
                    }
                }
                Ok(CacheEvent::Failed(name, message)) if name == feed.name => {
                    eprintln!("refresh of {name} failed: {message}");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event listener lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    refresher.stop().await?;
    cleanup.stop().await?;
    Ok(())
}

fn list_feeds(feeds: &[FeedDescriptor]) {
    if feeds.is_empty() {
        println!("no feeds configured; add some to {}", config_dir().join("feeds.json").display());
        return;
    }
    for feed in feeds {
        println!("{}  ({} channels)", feed.name, feed.channel_ids.len());
    }
}

fn print_result(feed: &FeedDescriptor, result: &FeedFetchResult, unseen: usize) {
    let origin = if result.from_cache { "cache" } else { "upstream" };
    println!("{}: {} videos from {origin}, {unseen} new", feed.name, result.entry.videos.len());
    if let Some(error) = &result.error {
        eprintln!("warning: {error}");
    }
    if result.fallback_used {
        eprintln!("warning: some channels are showing cached videos");
    }
    for video in result.entry.videos.iter() {
        println!("{}  {}  {}", video.published_at, video.id, video.title().unwrap_or("-"));
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn config_dir() -> PathBuf {
    // Linux: ~/.config/tubefeed
    CacheConfig::config_dir().unwrap_or_else(|_| {
        let mut dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.push(".tubefeed");
        dir
    })
}
