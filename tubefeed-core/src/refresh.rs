use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::abort::AbortHandle;
use crate::error::FetchError;
use crate::orchestrator::FeedCache;

/// Periodic incremental checks for one displayed feed.
///
/// Dropping the handle stops the task; [`stop`](Self::stop) also waits for it.
pub struct AutoRefreshHandle {
    cancel_tx: broadcast::Sender<()>,
    nudge_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl AutoRefreshHandle {
    /// Requests an immediate check, e.g. when the feed becomes visible again.
    pub fn nudge(&self) {
        // a pending nudge already covers this one
        let _ = self.nudge_tx.try_send(());
    }

    pub async fn stop(mut self) -> Result<(), FetchError> {
        let _ = self.cancel_tx.send(());
        match self.join.take() {
            Some(join) => join.await.map_err(FetchError::from),
            None => Ok(()),
        }
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub fn spawn_auto_refresh(
    cache: FeedCache,
    feed: String,
    channel_ids: Vec<String>,
    interval: Duration,
) -> AutoRefreshHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let (nudge_tx, mut nudge_rx) = mpsc::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the check in flight when the handle is stopped
        let abort = AbortHandle::new();

        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    abort.abort();
                    info!(feed = %feed, "auto refresh stopped");
                    break;
                }
                _ = ticker.tick() => {}
                Some(()) = nudge_rx.recv() => {
                    debug!(feed = %feed, "auto refresh nudged");
                    ticker.reset();
                }
            }

            let check = cache.check_for_new_videos(&feed, &channel_ids, Some(abort.signal()));
            tokio::select! {
                _ = cancel_rx.recv() => {
                    abort.abort();
                    info!(feed = %feed, "auto refresh stopped");
                    break;
                }
                outcome = check => match outcome {
                    Ok(result) if result.has_new_videos => {
                        debug!(feed = %feed, new = result.new_videos.len(), "auto refresh found videos");
                    }
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => debug!(feed = %feed, "auto refresh check cancelled"),
                    Err(e) => warn!(feed = %feed, error = %e, "auto refresh check failed"),
                },
            }
        }
    });

    AutoRefreshHandle {
        cancel_tx,
        nudge_tx,
        join: Some(join),
    }
}

/// Periodic staleness sweep over the whole cache.
pub struct CleanupHandle {
    cancel_tx: broadcast::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    pub async fn stop(mut self) -> Result<(), FetchError> {
        let _ = self.cancel_tx.send(());
        match self.join.take() {
            Some(join) => join.await.map_err(FetchError::from),
            None => Ok(()),
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub fn spawn_cleanup(cache: FeedCache, interval: Duration) -> CleanupHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    debug!("cleanup task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    cache.sweep_stale().await;
                }
            }
        }
    });
    CleanupHandle {
        cancel_tx,
        join: Some(join),
    }
}

/// Pending delayed acknowledgement of a feed; cancelled when dropped.
pub struct SeenTimer {
    join: Option<JoinHandle<()>>,
}

impl SeenTimer {
    pub fn cancel(mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SeenTimer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

impl FeedCache {
    /// Marks the feed seen after the configured dwell time, unless the timer is cancelled first.
    pub fn schedule_mark_seen(&self, feed: &str) -> SeenTimer {
        let cache = self.clone();
        let feed = feed.to_owned();
        let delay = self.config().mark_seen_delay();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            cache.mark_seen(&feed).await;
        });
        SeenTimer { join: Some(join) }
    }

    /// Starts [`spawn_auto_refresh`] with the configured interval.
    pub fn auto_refresh(&self, feed: &str, channel_ids: &[String]) -> AutoRefreshHandle {
        spawn_auto_refresh(
            self.clone(),
            feed.to_owned(),
            channel_ids.to_vec(),
            self.config().auto_refresh_interval(),
        )
    }
}
