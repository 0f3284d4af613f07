//! Duplicate-free, newest-first video lists.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::video::Video;

/// Merges `incoming` into `existing`.
///
/// Incoming videos whose id is already present (in `existing` or earlier in
/// `incoming`) are dropped. New videos are placed ahead of the existing ones and
/// the result is stable-sorted by publish time, newest first, so equal timestamps
/// keep that relative order.
pub fn merge_videos(existing: &[Video], incoming: &[Video]) -> Vec<Video> {
    let mut seen: HashSet<&str> = existing.iter().map(|v| v.id.as_str()).collect();
    let mut merged: Vec<Video> = Vec::with_capacity(existing.len() + incoming.len());
    for video in incoming {
        if seen.insert(video.id.as_str()) {
            merged.push(video.clone());
        }
    }
    merged.extend(existing.iter().cloned());
    sort_newest_first(&mut merged);
    merged
}

/// Videos of `incoming` not present in `existing`, deduplicated among themselves.
pub fn unseen_videos(existing: &[Video], incoming: Vec<Video>) -> Vec<Video> {
    let mut seen: HashSet<String> = existing.iter().map(|v| v.id.clone()).collect();
    incoming
        .into_iter()
        .filter(|v| seen.insert(v.id.clone()))
        .collect()
}

/// Drops every video of `channel_id` from `list` and merges `fresh` in its place.
pub fn replace_channel_videos(list: &[Video], channel_id: &str, fresh: &[Video]) -> Vec<Video> {
    let kept: Vec<Video> = list
        .iter()
        .filter(|v| v.channel_id != channel_id)
        .cloned()
        .collect();
    merge_videos(&kept, fresh)
}

/// Newest publish time per channel.
pub fn newest_by_channel(list: &[Video]) -> HashMap<String, DateTime<Utc>> {
    let mut newest: HashMap<String, DateTime<Utc>> = HashMap::new();
    for video in list {
        let published = video.published();
        newest
            .entry(video.channel_id.clone())
            .and_modify(|current| {
                if published > *current {
                    *current = published;
                }
            })
            .or_insert(published);
    }
    newest
}

pub fn sort_newest_first(list: &mut [Video]) {
    list.sort_by_cached_key(|v| Reverse(v.published()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str, channel: &str, ts: i64) -> Video {
        Video::new(id, channel, ts.to_string())
    }

    fn ids(list: &[Video]) -> Vec<&str> {
        list.iter().map(|v| v.id.as_str()).collect()
    }

    fn assert_sorted(list: &[Video]) {
        for pair in list.windows(2) {
            assert!(pair[0].published() >= pair[1].published());
        }
    }

    #[test]
    fn merge_drops_duplicates_and_sorts() {
        let existing = vec![v("a", "c1", 300), v("b", "c1", 100)];
        let incoming = vec![v("c", "c2", 200), v("a", "c1", 300), v("d", "c2", 400)];

        let merged = merge_videos(&existing, &incoming);
        assert_eq!(ids(&merged), vec!["d", "a", "c", "b"]);
        assert_sorted(&merged);
    }

    #[test]
    fn merge_len_matches_union_by_id() {
        let existing = vec![v("a", "c1", 1), v("b", "c1", 2), v("c", "c1", 3)];
        let incoming = vec![v("c", "c1", 3), v("d", "c1", 4), v("d", "c1", 4), v("e", "c1", 0)];

        let merged = merge_videos(&existing, &incoming);
        let unique: HashSet<&str> = merged.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(unique.len(), merged.len());
        assert_eq!(merged.len(), 5);
        assert_sorted(&merged);
    }

    #[test]
    fn ties_keep_new_videos_first() {
        let existing = vec![v("old", "c1", 500)];
        let incoming = vec![v("new", "c2", 500)];
        let merged = merge_videos(&existing, &incoming);
        assert_eq!(ids(&merged), vec!["new", "old"]);
    }

    #[test]
    fn malformed_timestamps_sink_to_the_end() {
        let existing = vec![Video::new("broken", "c1", "yesterday-ish")];
        let incoming = vec![v("ok", "c1", 10)];
        let merged = merge_videos(&existing, &incoming);
        assert_eq!(ids(&merged), vec!["ok", "broken"]);
    }

    #[test]
    fn replace_channel_swaps_only_that_channel() {
        let list = vec![v("a1", "a", 50), v("b1", "b", 40), v("a2", "a", 30)];
        let fresh = vec![v("a3", "a", 60), v("a1", "a", 50)];

        let replaced = replace_channel_videos(&list, "a", &fresh);
        assert_eq!(ids(&replaced), vec!["a3", "a1", "b1"]);
    }

    #[test]
    fn newest_per_channel() {
        let list = vec![v("x", "a", 5), v("y", "a", 9), v("z", "b", 1)];
        let newest = newest_by_channel(&list);
        assert_eq!(newest["a"].timestamp(), 9);
        assert_eq!(newest["b"].timestamp(), 1);
    }

    #[test]
    fn unseen_filters_known_and_repeated_ids() {
        let existing = vec![v("a", "c", 1)];
        let fresh = unseen_videos(&existing, vec![v("a", "c", 1), v("b", "c", 2), v("b", "c", 2)]);
        assert_eq!(ids(&fresh), vec!["b"]);
    }
}
