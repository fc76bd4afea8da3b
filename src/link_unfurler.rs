use std::collections::HashSet;

use futures::future::join_all;
use serde_derive::Deserialize;
use serde_json::Map;
use tracing::{error, info, warn};

use crate::{
    errors::AppError,
    service_provider::{bluesky::Post, slack::Slack},
    unfurl_builder::{create_complete_unfurl, create_error_unfurl, PreparedUnfurl, UnfurlBuilder, VIDEO_FAILED_MESSAGE},
    video_processor::{thumbnail_file_name, VideoProcessor},
};

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SharedLink {
    pub url: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LinkSharedEvent {
    pub channel: String,
    pub message_ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub links: Vec<SharedLink>,
}

/// Answers `link_shared` events: one `chat.unfurl` for the cards, then one
/// more per video once it has been transcoded.
#[derive(Clone)]
pub struct LinkUnfurler {
    builder: UnfurlBuilder,
    videos: VideoProcessor,
    app_url: String,
}

impl LinkUnfurler {
    pub fn new(builder: UnfurlBuilder, videos: VideoProcessor, app_url: &str) -> LinkUnfurler {
        LinkUnfurler { builder, videos, app_url: app_url.trim_end_matches('/').to_string() }
    }

    /// Returns how many links were unfurled; video jobs keep running after it returns.
    pub async fn handle_link_shared(&self, slack: &Slack, event: &LinkSharedEvent) -> Result<usize, AppError> {
        let mut seen = HashSet::new();
        let urls: Vec<&str> = event.links.iter()
            .map(|link| link.url.as_str())
            .filter(|url| seen.insert(*url))
            .collect();

        let prepared: Vec<PreparedUnfurl> = join_all(urls.iter().map(|url| self.builder.create_unfurl(url))).await
            .into_iter()
            .flatten()
            .collect();

        if prepared.is_empty() {
            info!(channel = %event.channel, "No supported links to unfurl");
            return Ok(0);
        }

        let unfurls: Map<String, _> = prepared.iter()
            .map(|p| (p.url.clone(), p.unfurl.clone()))
            .collect();

        if let Err(err) = slack.chat_unfurl(&event.channel, &event.message_ts, &unfurls).await {
            error!(channel = %event.channel, error = %err, "Error unfurling");
            return Err(err);
        }

        info!("Successfully unfurled {} link(s)", unfurls.len());

        for unfurl in prepared {
            let source_url = unfurl.pending_video().and_then(|video| video.source_url.clone());
            let (Some(source_url), Some(post)) = (source_url, unfurl.post) else {
                continue;
            };

            let url = unfurl.url;
            let unfurler = self.clone();
            let slack = slack.clone();
            let channel = event.channel.clone();
            let message_ts = event.message_ts.clone();

            tokio::spawn(async move {
                if let Err(err) = unfurler.process_video_unfurl(&slack, &channel, &message_ts, &url, &post, &source_url).await {
                    error!(url = %url, error = %err, "Failed to update video unfurl");
                }
            });
        }

        Ok(unfurls.len())
    }

    /// Transcodes the post's video and replaces the placeholder card.
    pub async fn process_video_unfurl(&self, slack: &Slack, channel: &str, message_ts: &str, url: &str, post: &Post, source_url: &str) -> Result<(), AppError> {
        let unfurl = match self.videos.process_video(source_url).await {
            Ok(video_id) => {
                let player_url = format!("{}/player/{}", self.app_url, video_id);
                let thumbnail_url = self.thumbnail_url(&video_id)
                    .or_else(|| post.video.as_ref().and_then(|v| v.thumbnail_url.clone()));

                create_complete_unfurl(post, &player_url, thumbnail_url.as_deref())
            },
            Err(err) => {
                warn!(url, error = %err, "Video processing failed");
                create_error_unfurl(post, VIDEO_FAILED_MESSAGE)
            },
        };

        let mut unfurls = Map::new();
        unfurls.insert(url.to_string(), unfurl);

        slack.chat_unfurl(channel, message_ts, &unfurls).await?;
        info!(url, "Updated video unfurl");

        Ok(())
    }

    fn thumbnail_url(&self, video_id: &str) -> Option<String> {
        self.videos.thumbnail_path(video_id)
            .map(|_| format!("{}/videos/{}", self.app_url, thumbnail_file_name(video_id)))
    }
}
