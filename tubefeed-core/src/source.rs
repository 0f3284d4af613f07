use async_trait::async_trait;

use crate::error::SourceError;
use crate::video::{ChannelMeta, Video};

/// Upstream provider of channel listings and details.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Uploads of a channel, newest first. May be empty.
    async fn fetch_channel_videos(&self, channel_id: &str) -> Result<Vec<Video>, SourceError>;

    /// Cheap lookup of the most recent upload only.
    async fn fetch_latest_video(&self, channel_id: &str) -> Result<Option<Video>, SourceError>;

    async fn fetch_channel_metadata(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelMeta>, SourceError>;
}
