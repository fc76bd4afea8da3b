use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::service_provider::bluesky::{BlueskyClient, Post, PostVideo, Thread, DEFAULT_MAX_THREAD_POSTS};

/// Slack rejects section text longer than this.
const MAX_SECTION_TEXT: usize = 3000;
const MAX_ALT_TEXT: usize = 2000;

pub const NOT_ACCESSIBLE_MESSAGE: &str = "Post not accessible";
pub const PROCESSING_VIDEO_MESSAGE: &str = "🎬 *Processing video...* ⏳";
pub const VIDEO_FAILED_MESSAGE: &str = "⚠️ Video could not be processed";

/// Initial unfurl for one shared link, with the post it was built from.
#[derive(Debug, Clone)]
pub struct PreparedUnfurl {
    pub url: String,
    pub unfurl: Value,
    pub post: Option<Post>,
}

impl PreparedUnfurl {
    /// The video still to be transcoded, if the card shows the placeholder.
    pub fn pending_video(&self) -> Option<&PostVideo> {
        self.post.as_ref()
            .and_then(|post| post.video.as_ref())
            .filter(|video| video.source_url.is_some())
    }
}

/// Builds Slack Block Kit unfurls for Bluesky posts.
#[derive(Clone)]
pub struct UnfurlBuilder {
    bluesky: BlueskyClient,
    unroll_threads: bool,
    max_thread_posts: usize,
}

impl UnfurlBuilder {
    pub fn new(bluesky: BlueskyClient, unroll_threads: bool) -> UnfurlBuilder {
        UnfurlBuilder { bluesky, unroll_threads, max_thread_posts: DEFAULT_MAX_THREAD_POSTS }
    }

    pub fn with_max_thread_posts(mut self, max_thread_posts: usize) -> UnfurlBuilder {
        self.max_thread_posts = max_thread_posts;
        self
    }

    pub fn bluesky(&self) -> &BlueskyClient {
        &self.bluesky
    }

    /// `None` when the URL is not a post on a supported domain.
    pub async fn create_unfurl(&self, url: &str) -> Option<PreparedUnfurl> {
        let post_info = self.bluesky.extract_post_info(url)?;

        let post = match self.bluesky.get_post(&post_info.handle, &post_info.post_id).await {
            Ok(Some(post)) => post,
            Ok(None) => {
                debug!(url, "Post not found");
                return Some(PreparedUnfurl { url: url.to_string(), unfurl: build_error_unfurl(NOT_ACCESSIBLE_MESSAGE), post: None });
            },
            Err(err) => {
                warn!(url, error = %err, "Failed to fetch post");
                return Some(PreparedUnfurl { url: url.to_string(), unfurl: build_error_unfurl(NOT_ACCESSIBLE_MESSAGE), post: None });
            },
        };

        let thread = if self.unroll_threads {
            self.bluesky.get_thread_posts(&post_info.handle, &post_info.post_id, self.max_thread_posts).await
                .unwrap_or_else(|err| {
                    warn!(url, error = %err, "Failed to unroll thread");
                    None
                })
        } else {
            None
        };

        let mut blocks = post_blocks(&post, thread.as_ref());

        if let Some(video) = &post.video {
            // without a source there is nothing to transcode
            if video.source_url.is_some() {
                blocks.push(section(PROCESSING_VIDEO_MESSAGE));
            } else {
                blocks.push(section(VIDEO_FAILED_MESSAGE));
            }
        }

        blocks.push(footer_block(&post));

        Some(PreparedUnfurl { url: url.to_string(), unfurl: json!({ "blocks": blocks }), post: Some(post) })
    }
}

/// Unfurl shown once the video has been transcoded.
///
/// Slack's video block needs a thumbnail, without one the player is linked instead.
pub fn create_complete_unfurl(post: &Post, video_url: &str, thumbnail_url: Option<&str>) -> Value {
    let mut blocks = post_blocks(post, None);

    match thumbnail_url {
        Some(thumbnail_url) => blocks.push(video_block(video_url, thumbnail_url)),
        None => blocks.push(section(&format!("🎬 <{}|Watch video>", video_url))),
    }

    blocks.push(footer_block(post));

    json!({ "blocks": blocks })
}

pub fn create_error_unfurl(post: &Post, error_message: &str) -> Value {
    let mut blocks = post_blocks(post, None);
    blocks.push(section(error_message));
    blocks.push(footer_block(post));

    json!({ "blocks": blocks })
}

/// Unfurl for posts that could not be fetched at all.
pub fn build_error_unfurl(message: &str) -> Value {
    json!({
        "blocks": [
            section(&format!("*{}*\n\nThis post may not be viewable without being logged in or has been deleted.", message))
        ]
    })
}

fn post_blocks(post: &Post, thread: Option<&Thread>) -> Vec<Value> {
    let mut blocks = vec![author_block(post)];

    if !post.text.trim().is_empty() {
        blocks.push(section(&escape_and_truncate(&post.text, MAX_SECTION_TEXT)));
    }

    if let Some(thread) = thread {
        blocks.extend(thread_blocks(post, thread));
    }

    // videos replace images in the card
    if post.video.is_none() {
        blocks.extend(post.images.iter().filter_map(|image| {
            let image_url = image.fullsize.as_ref().or(image.thumb.as_ref())?;
            let alt_text = if image.alt.trim().is_empty() { "Image from Bluesky post" } else { image.alt.as_str() };

            Some(json!({
                "type": "image",
                "image_url": image_url,
                "alt_text": truncate(alt_text, MAX_ALT_TEXT),
            }))
        }));
    }

    if let Some(external) = &post.external {
        let title = external.title.as_deref().unwrap_or(external.uri.as_str());
        let mut text = format!("🔗 <{}|{}>", external.uri, escape_mrkdwn(title));

        if let Some(description) = &external.description {
            let remaining = MAX_SECTION_TEXT.saturating_sub(text.chars().count() + 1);
            text.push('\n');
            text.push_str(&escape_and_truncate(description, remaining));
        }

        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": truncate(&text, MAX_SECTION_TEXT) }]
        }));
    }

    blocks
}

fn author_block(post: &Post) -> Value {
    let author = &post.author;
    let mut elements = Vec::new();

    if let Some(avatar) = &author.avatar {
        elements.push(json!({ "type": "image", "image_url": avatar, "alt_text": author.handle }));
    }

    elements.push(json!({
        "type": "mrkdwn",
        "text": format!("*{}* @{}", escape_mrkdwn(&author.display_name), author.handle),
    }));

    json!({ "type": "context", "elements": elements })
}

/// Follow-up posts by the author; the linked post itself is already shown.
fn thread_blocks(post: &Post, thread: &Thread) -> Vec<Value> {
    if thread.total_count <= 1 {
        return Vec::new();
    }

    let mut blocks: Vec<Value> = thread.posts.iter()
        .filter(|p| p.uri != post.uri && !p.text.trim().is_empty())
        .map(|p| section(&escape_and_truncate(&p.text, MAX_SECTION_TEXT)))
        .collect();

    let summary = if thread.truncated {
        format!("🧵 Showing {} of {} posts in this thread", thread.posts.len(), thread.total_count)
    } else {
        format!("🧵 Thread of {} posts", thread.total_count)
    };

    blocks.push(json!({
        "type": "context",
        "elements": [{ "type": "mrkdwn", "text": summary }]
    }));

    blocks
}

fn footer_block(post: &Post) -> Value {
    json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!("💬 {}   🔁 {}   ❤️ {}   · <{}|View on Bluesky>", post.reply_count, post.repost_count, post.like_count, post.url),
        }]
    })
}

fn video_block(video_url: &str, thumbnail_url: &str) -> Value {
    json!({
        "type": "video",
        "video_url": video_url,
        "alt_text": "Video from Bluesky post",
        "title": { "type": "plain_text", "text": "Video", "emoji": true },
        "thumbnail_url": thumbnail_url,
    })
}

fn section(text: &str) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": truncate(text, MAX_SECTION_TEXT) }
    })
}

/// Escapes the characters Slack treats as control sequences in mrkdwn.
pub fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escapes `text` and cuts it to `max_chars` without splitting an escape sequence.
fn escape_and_truncate(text: &str, max_chars: usize) -> String {
    let escaped = escape_mrkdwn(text);
    if escaped.chars().count() <= max_chars {
        return escaped;
    }

    if max_chars == 0 {
        return String::new();
    }

    let mut truncated = String::new();
    let mut count = 0;
    let mut buf = [0; 4];

    for c in text.chars() {
        let piece: &str = match c {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            _ => c.encode_utf8(&mut buf),
        };

        let len = piece.chars().count();
        if count + len > max_chars - 1 {
            break;
        }

        truncated.push_str(piece);
        count += len;
    }

    truncated.push('…');
    truncated
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push('…');
    truncated
}
