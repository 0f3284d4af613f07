use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    FullFetchRequired,
    IncrementalCheckDue,
    ServeCache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub full_fetch_ttl: Duration,
    pub incremental_ttl: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            full_fetch_ttl: Duration::minutes(15),
            incremental_ttl: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedTimestamps {
    pub last_full_fetch: Option<DateTime<Utc>>,
    pub last_incremental_check: Option<DateTime<Utc>>,
}

/// Decides what a read of a feed needs. `None` means no cache entry exists.
pub fn evaluate(
    timestamps: Option<FeedTimestamps>,
    now: DateTime<Utc>,
    policy: &FreshnessPolicy,
) -> Freshness {
    let Some(timestamps) = timestamps else {
        return Freshness::FullFetchRequired;
    };
    let Some(last_full) = timestamps.last_full_fetch else {
        return Freshness::FullFetchRequired;
    };
    if elapsed(last_full, now) >= policy.full_fetch_ttl {
        return Freshness::FullFetchRequired;
    }
    match timestamps.last_incremental_check {
        Some(last_check) if elapsed(last_check, now) < policy.incremental_ttl => {
            Freshness::ServeCache
        }
        _ => Freshness::IncrementalCheckDue,
    }
}

// Timestamps ahead of the clock count as just now.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).max(Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::UNIX_EPOCH + Duration::minutes(minutes)
    }

    fn stamps(full: i64, check: i64) -> Option<FeedTimestamps> {
        Some(FeedTimestamps {
            last_full_fetch: Some(at(full)),
            last_incremental_check: Some(at(check)),
        })
    }

    #[test]
    fn missing_entry_needs_full_fetch() {
        let policy = FreshnessPolicy::default();
        assert_eq!(evaluate(None, at(0), &policy), Freshness::FullFetchRequired);
        assert_eq!(
            evaluate(Some(FeedTimestamps::default()), at(0), &policy),
            Freshness::FullFetchRequired
        );
    }

    #[test]
    fn fresh_entry_is_served() {
        let policy = FreshnessPolicy::default();
        assert_eq!(evaluate(stamps(0, 0), at(4), &policy), Freshness::ServeCache);
    }

    #[test]
    fn incremental_ttl_flips_to_check() {
        let policy = FreshnessPolicy::default();
        assert_eq!(evaluate(stamps(0, 0), at(5), &policy), Freshness::IncrementalCheckDue);
        assert_eq!(evaluate(stamps(0, 6), at(10), &policy), Freshness::ServeCache);
    }

    #[test]
    fn full_ttl_wins_over_recent_check() {
        let policy = FreshnessPolicy::default();
        assert_eq!(evaluate(stamps(0, 14), at(15), &policy), Freshness::FullFetchRequired);
    }

    #[test]
    fn missing_check_timestamp_is_due() {
        let policy = FreshnessPolicy::default();
        let timestamps = Some(FeedTimestamps {
            last_full_fetch: Some(at(0)),
            last_incremental_check: None,
        });
        assert_eq!(evaluate(timestamps, at(1), &policy), Freshness::IncrementalCheckDue);
    }

    #[test]
    fn future_timestamps_do_not_expire() {
        let policy = FreshnessPolicy::default();
        assert_eq!(evaluate(stamps(30, 30), at(0), &policy), Freshness::ServeCache);
    }
}
