mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{channels, harness, start_time, videos};
use tubefeed_core::{spawn_auto_refresh, spawn_cleanup, CacheConfig, CacheEvent, FetchOptions, Video};

fn quick_config() -> CacheConfig {
    CacheConfig {
        mark_seen_delay_ms: 20,
        ..CacheConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn mark_seen_fires_after_delay() {
    let h = harness(quick_config());
    h.source.set_videos("a", videos("a", 2, 1));
    h.cache
        .fetch_feed("f", &channels(&["a"]), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(h.cache.new_video_count("f").await, 2);
    let mut events = h.cache.subscribe();

    let timer = h.cache.schedule_mark_seen("f");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.cache.new_video_count("f").await, 2);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(timer.is_finished());
    assert_eq!(h.cache.new_video_count("f").await, 0);
    assert_eq!(events.recv().await.unwrap(), CacheEvent::Seen("f".into()));
}

#[tokio::test(start_paused = true)]
async fn cancelled_mark_seen_keeps_counter() {
    let h = harness(quick_config());
    h.source.set_videos("a", videos("a", 2, 1));
    h.cache
        .fetch_feed("f", &channels(&["a"]), FetchOptions::default())
        .await
        .unwrap();

    let timer = h.cache.schedule_mark_seen("f");
    tokio::time::sleep(Duration::from_millis(5)).await;
    timer.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.cache.new_video_count("f").await, 2);

    // leaving the feed drops the timer the same way
    drop(h.cache.schedule_mark_seen("f"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.cache.new_video_count("f").await, 2);
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_reports_new_uploads() {
    let h = harness(CacheConfig::default());
    h.source.set_videos("a", videos("a", 2, 1));
    let ids = channels(&["a"]);
    h.cache.fetch_feed("f", &ids, FetchOptions::default()).await.unwrap();
    h.cache.mark_seen("f").await;
    let mut events = h.cache.subscribe();

    let handle = spawn_auto_refresh(h.cache.clone(), "f".into(), ids.clone(), Duration::from_millis(100));
    // first tick fires immediately and finds nothing
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.source.latest_calls(), 1);
    assert_eq!(h.source.video_calls(), 1);

    h.source.push_video("a", Video::new("a-new", "a", start_time().to_rfc3339()));
    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match events.recv().await.unwrap() {
                CacheEvent::NewVideos(feed, count) => break (feed, count),
                _ => continue,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, ("f".to_string(), 1));
    assert_eq!(h.cache.new_video_count("f").await, 1);
    assert_eq!(h.cache.videos("f").await.unwrap()[0].id, "a-new");

    handle.stop().await.unwrap();
    let calls = h.source.latest_calls();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.source.latest_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn nudge_triggers_an_early_check() {
    let h = harness(CacheConfig::default());
    h.source.set_videos("a", videos("a", 1, 1));
    let ids = channels(&["a"]);
    h.cache.fetch_feed("f", &ids, FetchOptions::default()).await.unwrap();

    let handle = spawn_auto_refresh(h.cache.clone(), "f".into(), ids, Duration::from_secs(300));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.source.latest_calls(), 1);

    handle.nudge();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.source.latest_calls(), 2);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cleanup_task_sweeps_expired_feeds() {
    let h = harness(CacheConfig::default());
    h.source.set_videos("a", videos("a", 1, 1));
    h.cache
        .fetch_feed("f", &channels(&["a"]), FetchOptions::default())
        .await
        .unwrap();
    let mut events = h.cache.subscribe();

    h.clock.advance(ChronoDuration::hours(2));
    let cleanup = spawn_cleanup(h.cache.clone(), Duration::from_millis(50));
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, CacheEvent::Evicted("f".into()));
    assert!(h.cache.entry("f").await.is_none());

    cleanup.stop().await.unwrap();
}
