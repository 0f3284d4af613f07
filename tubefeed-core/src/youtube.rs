use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::YouTubeConfig;
use crate::error::SourceError;
use crate::merge::sort_newest_first;
use crate::source::VideoSource;
use crate::video::{ChannelMeta, Video};

const USER_AGENT: &str = "tubefeed/0.1";

/// [`VideoSource`] backed by the YouTube Data API v3.
#[derive(Debug, Clone)]
pub struct YouTubeSource {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    max_results: u32,
}

impl YouTubeSource {
    pub fn new(client: Client, config: &YouTubeConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            max_results: config.max_results.clamp(1, 50),
        }
    }

    pub fn from_config(config: &YouTubeConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::new(client, config))
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/{}", self.api_base, path))
            .map_err(|e| SourceError::Other(format!("invalid api base: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.extend_pairs(params);
            if let Some(key) = &self.api_key {
                query.append_pair("key", key);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }

    /// Channel ids `UC…` map onto upload playlists `UU…`; anything else is looked up.
    async fn uploads_playlist(&self, channel_id: &str) -> Result<String, SourceError> {
        if let Some(rest) = channel_id.strip_prefix("UC") {
            return Ok(format!("UU{rest}"));
        }
        let url = self.endpoint("channels", &[("part", "contentDetails"), ("id", channel_id)])?;
        let response: ListResponse<ChannelItem> = self.get_json(url).await?;
        response
            .items
            .into_iter()
            .find_map(|item| item.content_details?.related_playlists?.uploads)
            .ok_or_else(|| SourceError::NotFound(channel_id.to_owned()))
    }

    async fn uploads(&self, channel_id: &str, max_results: u32) -> Result<Vec<Video>, SourceError> {
        let playlist = self.uploads_playlist(channel_id).await?;
        let max_results = max_results.to_string();
        let url = self.endpoint(
            "playlistItems",
            &[
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist.as_str()),
                ("maxResults", max_results.as_str()),
            ],
        )?;
        let response: ListResponse<PlaylistItem> = self.get_json(url).await?;
        let total = response.items.len();
        let mut videos: Vec<Video> = response
            .items
            .into_iter()
            .filter_map(|item| item.into_video(channel_id))
            .collect();
        if videos.len() < total {
            debug!(channel = %channel_id, skipped = total - videos.len(), "skipped unavailable uploads");
        }
        sort_newest_first(&mut videos);
        Ok(videos)
    }
}

#[async_trait]
impl VideoSource for YouTubeSource {
    async fn fetch_channel_videos(&self, channel_id: &str) -> Result<Vec<Video>, SourceError> {
        self.uploads(channel_id, self.max_results).await
    }

    async fn fetch_latest_video(&self, channel_id: &str) -> Result<Option<Video>, SourceError> {
        Ok(self.uploads(channel_id, 1).await?.into_iter().next())
    }

    async fn fetch_channel_metadata(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelMeta>, SourceError> {
        let url = self.endpoint("channels", &[("part", "snippet,statistics"), ("id", channel_id)])?;
        let response: ListResponse<ChannelItem> = self.get_json(url).await?;
        Ok(response
            .items
            .into_iter()
            .next()
            .map(|item| item.into_meta(channel_id)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ListResponse<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    published_at: Option<String>,
    channel_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    channel_title: Option<String>,
    thumbnails: Option<Thumbnails>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    video_id: Option<String>,
    video_published_at: Option<String>,
}

impl PlaylistItem {
    /// `None` for deleted or private uploads, which carry no publish time.
    fn into_video(self, channel_id: &str) -> Option<Video> {
        let snippet = self.snippet.unwrap_or_default();
        let details = self.content_details;
        let video_id = details
            .as_ref()
            .and_then(|d| d.video_id.clone())
            .or_else(|| snippet.resource_id.as_ref()?.video_id.clone())?;
        let published_at = details.and_then(|d| d.video_published_at)?;

        let mut video = Video::new(
            video_id,
            snippet.channel_id.unwrap_or_else(|| channel_id.to_owned()),
            published_at,
        );
        if let Some(title) = snippet.title {
            video = video.with_extra("title", title);
        }
        if let Some(description) = snippet.description {
            video = video.with_extra("description", description);
        }
        if let Some(channel_title) = snippet.channel_title {
            video = video.with_extra("channel_title", channel_title);
        }
        if let Some(url) = snippet.thumbnails.and_then(Thumbnails::best) {
            video = video.with_extra("thumbnail_url", url);
        }
        if let Some(uploaded) = snippet.published_at {
            video = video.with_extra("added_at", uploaded);
        }
        Some(video)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    id: Option<String>,
    snippet: Option<ChannelSnippet>,
    statistics: Option<ChannelStatistics>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: Option<String>,
    custom_url: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    #[serde(default)]
    hidden_subscriber_count: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

impl ChannelItem {
    fn into_meta(self, channel_id: &str) -> ChannelMeta {
        let snippet = self.snippet;
        let title = snippet
            .as_ref()
            .and_then(|s| s.title.clone())
            .unwrap_or_default();
        let mut meta = ChannelMeta::new(self.id.unwrap_or_else(|| channel_id.to_owned()), title);
        if let Some(snippet) = snippet {
            meta.thumbnail_url = snippet.thumbnails.and_then(Thumbnails::best);
            if let Some(handle) = snippet.custom_url {
                meta.extra.insert("custom_url".to_owned(), handle.into());
            }
        }
        if let Some(stats) = self.statistics {
            if !stats.hidden_subscriber_count {
                meta.subscriber_count = stats.subscriber_count.and_then(|s| s.parse().ok());
            }
            meta.video_count = stats.video_count.and_then(|s| s.parse().ok());
        }
        meta
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    maxres: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl Thumbnails {
    fn best(self) -> Option<String> {
        self.maxres
            .or(self.standard)
            .or(self.high)
            .or(self.medium)
            .or(self.default)
            .map(|t| t.url)
    }
}
