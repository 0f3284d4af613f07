use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    pub id: String,
    pub channel_id: String,
    /// ISO-8601 timestamp or decimal epoch, as the upstream reported it.
    pub published_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Video {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        published_at: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            published_at: published_at.into(),
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.extra.get("title").and_then(Value::as_str)
    }

    /// Publish time used for ordering. Unparseable values order as the Unix epoch.
    pub fn published(&self) -> DateTime<Utc> {
        parse_timestamp(&self.published_at).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let value: i64 = raw.parse().ok()?;
    if value.unsigned_abs() > EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMeta {
    pub channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub subscriber_count: Option<u64>,
    pub video_count: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelMeta {
    pub fn new(channel_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            title: title.into(),
            thumbnail_url: None,
            subscriber_count: None,
            video_count: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_epochs() {
        let iso = parse_timestamp("2024-10-21T08:00:00Z").unwrap();
        assert_eq!(iso.timestamp(), 1_729_497_600);

        let secs = parse_timestamp("1729497600").unwrap();
        assert_eq!(secs, iso);

        let millis = parse_timestamp("1729497600000").unwrap();
        assert_eq!(millis, iso);
    }

    #[test]
    fn garbage_orders_as_epoch() {
        let video = Video::new("v", "c", "not a date");
        assert_eq!(video.published(), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn extreme_epochs_do_not_panic() {
        for raw in ["-9223372036854775808", "9223372036854775807"] {
            let video = Video::new("v", "c", raw);
            assert_eq!(video.published(), DateTime::UNIX_EPOCH);
        }
        let merged = crate::merge::merge_videos(
            &[Video::new("a", "c", "-9223372036854775808")],
            &[Video::new("b", "c", "10")],
        );
        assert_eq!(merged[0].id, "b");
    }

    #[test]
    fn extra_fields_survive_serde() {
        let json = r#"{"id":"v1","channel_id":"c1","published_at":"2024-01-01T00:00:00Z","title":"Hello","duration":"PT3M"}"#;
        let video: Video = serde_json::from_str(json).unwrap();
        assert_eq!(video.title(), Some("Hello"));
        assert_eq!(video.extra.get("duration").and_then(Value::as_str), Some("PT3M"));

        let back = serde_json::to_value(&video).unwrap();
        assert_eq!(back["duration"], "PT3M");
    }
}
