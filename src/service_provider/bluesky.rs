use std::sync::Arc;

use chrono::DateTime;
use derive_more::Display;
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AppError;

pub const DEFAULT_MAX_THREAD_POSTS: usize = 25;

const THREAD_DEPTH: u32 = 100;
const BLOB_HOST: &str = "https://bsky.social";
const POST_URL_HOST: &str = "https://bsky.app";

/// Handle and record key parsed from a post URL.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{}/{}", handle, post_id)]
pub struct PostRef {
    pub handle: String,
    pub post_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub did: String,
    pub handle: String,
    /// Falls back to the handle when the profile has no display name.
    pub display_name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostImage {
    pub alt: String,
    pub thumb: Option<String>,
    pub fullsize: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostVideo {
    /// HLS playlist, or the raw blob when the AppView has not processed the video yet.
    pub source_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub alt: String,
    pub aspect_ratio: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalLink {
    pub uri: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    /// Web link to the post on bsky.app.
    pub url: String,
    pub author: Author,
    pub text: String,
    pub created_at: Option<String>,
    pub images: Vec<PostImage>,
    pub video: Option<PostVideo>,
    pub external: Option<ExternalLink>,
    pub reply_count: u64,
    pub repost_count: u64,
    pub like_count: u64,
}

/// The original author's posts in a thread, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub posts: Vec<Post>,
    pub total_count: usize,
    pub truncated: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    refresh_jwt: Option<String>,
}

#[derive(Deserialize, Debug)]
struct XrpcError {
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ProfileView {
    did: String,
}

#[derive(Deserialize, Debug)]
struct PostThreadResponse {
    thread: ThreadNode,
}

#[derive(Deserialize, Debug, Clone)]
struct ThreadNode {
    post: Option<PostView>,
    #[serde(default)]
    replies: Vec<ThreadNode>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct PostView {
    uri: String,
    cid: String,
    author: AuthorView,
    #[serde(default)]
    record: PostRecord,
    embed: Option<Embed>,
    reply_count: Option<u64>,
    repost_count: Option<u64>,
    like_count: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct AuthorView {
    did: String,
    handle: String,
    display_name: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(default)]
    text: String,
    created_at: Option<String>,
    embed: Option<Embed>,
}

/// Record embeds and their processed `#view` counterparts share this shape;
/// media is a plain URL in views and a blob reference in records.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct Embed {
    #[serde(rename = "$type", default)]
    embed_type: String,
    #[serde(default)]
    images: Vec<EmbedImage>,
    playlist: Option<String>,
    thumbnail: Option<UrlOrBlob>,
    video: Option<UrlOrBlob>,
    alt: Option<String>,
    aspect_ratio: Option<AspectRatio>,
    external: Option<EmbedExternal>,
    media: Option<Box<Embed>>,
}

#[derive(Deserialize, Debug, Clone)]
struct EmbedImage {
    #[serde(default)]
    alt: String,
    thumb: Option<UrlOrBlob>,
    fullsize: Option<UrlOrBlob>,
    image: Option<UrlOrBlob>,
}

#[derive(Deserialize, Debug, Clone)]
struct EmbedExternal {
    uri: Option<String>,
    title: Option<String>,
    description: Option<String>,
    thumb: Option<UrlOrBlob>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
struct AspectRatio {
    width: u32,
    height: u32,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum UrlOrBlob {
    Url(String),
    Blob(BlobRef),
}

#[derive(Deserialize, Debug, Clone)]
struct BlobRef {
    #[serde(rename = "ref")]
    reference: Option<CidLink>,
    // legacy blobs carry the cid directly
    cid: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
struct CidLink {
    #[serde(rename = "$link")]
    link: String,
}

impl UrlOrBlob {
    fn resolve(&self, did: &str) -> Option<String> {
        match self {
            UrlOrBlob::Url(url) => Some(url.clone()),
            UrlOrBlob::Blob(blob) => blob.reference.as_ref().map(|r| r.link.clone())
                .or_else(|| blob.cid.clone())
                .map(|cid| BlueskyClient::blob_url(did, &cid)),
        }
    }
}

impl Embed {
    fn is_video(&self) -> bool {
        self.playlist.is_some() || self.video.is_some() || self.embed_type.contains("video")
    }

    /// Embeds inside `recordWithMedia` keep their media one level down.
    fn media(&self) -> &Embed {
        self.media.as_deref().unwrap_or(self)
    }

    fn images(&self, did: &str) -> Vec<PostImage> {
        self.media().images.iter()
            .map(|img| {
                let blob = img.image.as_ref().and_then(|i| i.resolve(did));

                PostImage {
                    alt: img.alt.clone(),
                    thumb: img.thumb.as_ref().and_then(|t| t.resolve(did)).or_else(|| blob.clone()),
                    fullsize: img.fullsize.as_ref().and_then(|f| f.resolve(did)).or(blob),
                }
            })
            .collect()
    }

    fn video(&self, did: &str) -> Option<PostVideo> {
        let media = self.media();
        if !media.is_video() {
            return None;
        }

        Some(PostVideo {
            source_url: media.playlist.clone().or_else(|| media.video.as_ref().and_then(|v| v.resolve(did))),
            thumbnail_url: media.thumbnail.as_ref().and_then(|t| t.resolve(did)),
            alt: media.alt.clone().filter(|alt| !alt.is_empty()).unwrap_or_else(|| "Video".to_string()),
            aspect_ratio: media.aspect_ratio.map(|ratio| (ratio.width, ratio.height)),
        })
    }

    fn external(&self, did: &str) -> Option<ExternalLink> {
        let external = self.media().external.as_ref()?;

        Some(ExternalLink {
            uri: external.uri.clone()?,
            title: external.title.clone().filter(|t| !t.is_empty()),
            description: external.description.clone().filter(|d| !d.is_empty()),
            thumb: external.thumb.as_ref().and_then(|t| t.resolve(did)),
        })
    }
}

/// Client for the public AppView; no authentication needed for public posts.
///
/// After a login, requests go to the account's service with its access token,
/// which lets posts limited to logged-in users unfurl.
#[derive(Clone)]
pub struct BlueskyClient {
    http_client: Client,
    base_url: String,
    post_url_pattern: Regex,
    session: Arc<RwLock<Option<Session>>>,
}

impl BlueskyClient {
    pub fn new(http_client: Client, base_url: &str, supported_domains: &[String]) -> Result<BlueskyClient, AppError> {
        if supported_domains.is_empty() {
            return Err(AppError::ConfigError("At least one unfurl domain is required".to_string()));
        }

        let domains_pattern = supported_domains.iter()
            .map(|domain| regex::escape(domain))
            .collect::<Vec<String>>()
            .join("|");

        let post_url_pattern = Regex::new(&format!(r"(?:^|[/.])(?:{})/profile/([^/]+)/post/([^/?#]+)", domains_pattern))
            .map_err(|err| AppError::ConfigError(format!("Invalid unfurl domain: {}", err)))?;

        Ok(BlueskyClient {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            post_url_pattern,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Creates a session with a handle and app password.
    ///
    /// On failure the client keeps using the public AppView.
    pub async fn login_with_password(&mut self, service_url: &str, handle: &str, app_password: &str) -> Result<(), AppError> {
        let service_url = service_url.trim_end_matches('/').to_string();

        let response = self.http_client
            .post(format!("{}/xrpc/com.atproto.server.createSession", service_url))
            .json(&json!({ "identifier": handle, "password": app_password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BlueskyError(format!("createSession failed with status {}: {}", status, body)));
        }

        let session: Session = response.json().await?;

        info!(handle, service = %service_url, "Logged in to Bluesky");
        self.base_url = service_url;
        self.session = Arc::new(RwLock::new(Some(session)));

        Ok(())
    }

    /// Uses an existing access token; it cannot be refreshed once it expires.
    pub fn login_with_token(&mut self, service_url: &str, access_token: &str) {
        self.base_url = service_url.trim_end_matches('/').to_string();
        self.session = Arc::new(RwLock::new(Some(Session { access_jwt: access_token.to_string(), refresh_jwt: None })));
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Parses `https://{domain}/profile/{handle}/post/{post_id}`.
    pub fn extract_post_info(&self, url: &str) -> Option<PostRef> {
        self.post_url_pattern.captures(url).map(|captures| PostRef {
            handle: captures[1].to_string(),
            post_id: captures[2].to_string(),
        })
    }

    pub fn blob_url(did: &str, cid: &str) -> String {
        format!("{}/xrpc/com.atproto.sync.getBlob?did={}&cid={}", BLOB_HOST, did, cid)
    }

    /// Resolves a handle to its DID; DIDs are returned unchanged.
    pub async fn get_profile(&self, handle: &str) -> Result<Option<String>, AppError> {
        if handle.starts_with("did:") {
            return Ok(Some(handle.to_string()));
        }

        let profile: Option<ProfileView> = self.xrpc("app.bsky.actor.getProfile", &[("actor", handle.to_string())]).await?;
        Ok(profile.map(|p| p.did))
    }

    pub async fn get_post(&self, handle: &str, post_id: &str) -> Result<Option<Post>, AppError> {
        let Some(did) = self.get_profile(handle).await? else {
            debug!(handle, "Profile not found");
            return Ok(None);
        };

        let thread = self.get_post_thread(&did, post_id, 0).await?;

        Ok(thread.and_then(|t| t.thread.post).map(|post| to_post(&post)))
    }

    /// Unrolls a thread into the posts written by its original author.
    pub async fn get_thread_posts(&self, handle: &str, post_id: &str, max_posts: usize) -> Result<Option<Thread>, AppError> {
        let Some(original_author_did) = self.get_profile(handle).await? else {
            return Ok(None);
        };

        let Some(thread) = self.get_post_thread(&original_author_did, post_id, THREAD_DEPTH).await? else {
            return Ok(None);
        };

        if thread.thread.post.is_none() {
            return Ok(None);
        }

        let mut author_posts = Vec::new();
        collect_author_posts(&thread.thread, &original_author_did, &mut author_posts);

        author_posts.sort_by_key(|p| created_at_key(p.created_at.as_deref()));

        let total_count = author_posts.len();
        let truncated = total_count > max_posts;
        author_posts.truncate(max_posts);

        Ok(Some(Thread { posts: author_posts, total_count, truncated }))
    }

    async fn get_post_thread(&self, did: &str, post_id: &str, depth: u32) -> Result<Option<PostThreadResponse>, AppError> {
        let at_uri = format!("at://{}/app.bsky.feed.post/{}", did, post_id);

        self.xrpc("app.bsky.feed.getPostThread", &[
            ("uri", at_uri),
            ("depth", depth.to_string()),
            ("parentHeight", "0".to_string()),
        ]).await
    }

    /// `Ok(None)` for records the AppView says are missing or not viewable.
    async fn xrpc<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<Option<T>, AppError> {
        let mut refreshed = false;

        loop {
            let response = self.send_xrpc(method, params).await?;

            let status = response.status();
            if status.is_success() {
                return Ok(Some(response.json().await?));
            }

            let body = response.text().await.unwrap_or_default();

            if !refreshed && is_expired_token(&body) && self.refresh_session().await? {
                refreshed = true;
                continue;
            }

            return if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
                debug!(method, %status, body = %body, "Bluesky record not accessible");
                Ok(None)
            } else {
                warn!(method, %status, body = %body, "Bluesky API request failed");
                Err(AppError::BlueskyError(format!("{} failed with status {}", method, status)))
            };
        }
    }

    async fn send_xrpc(&self, method: &str, params: &[(&str, String)]) -> Result<Response, AppError> {
        let url = format!("{}/xrpc/{}", self.base_url, method);
        let mut request = self.http_client.get(&url).query(params);

        if let Some(session) = self.session.read().await.as_ref() {
            request = request.bearer_auth(&session.access_jwt);
        }

        Ok(request.send().await?)
    }

    /// Returns whether a new access token was obtained.
    async fn refresh_session(&self) -> Result<bool, AppError> {
        let refresh_jwt = {
            let session = self.session.read().await;
            session.as_ref().and_then(|s| s.refresh_jwt.clone())
        };

        let Some(refresh_jwt) = refresh_jwt else {
            return Ok(false);
        };

        let response = self.http_client
            .post(format!("{}/xrpc/com.atproto.server.refreshSession", self.base_url))
            .bearer_auth(&refresh_jwt)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Failed to refresh Bluesky session");
            return Ok(false);
        }

        let session: Session = response.json().await?;
        *self.session.write().await = Some(session);

        debug!("Refreshed Bluesky session");
        Ok(true)
    }
}

fn is_expired_token(body: &str) -> bool {
    serde_json::from_str::<XrpcError>(body)
        .ok()
        .and_then(|e| e.error)
        .is_some_and(|error| error == "ExpiredToken")
}

fn collect_author_posts(node: &ThreadNode, author_did: &str, posts: &mut Vec<Post>) {
    let Some(post) = &node.post else {
        return;
    };

    if post.author.did == author_did {
        posts.push(to_post(post));
    }

    for reply in &node.replies {
        collect_author_posts(reply, author_did, posts);
    }
}

fn created_at_key(created_at: Option<&str>) -> i64 {
    created_at
        .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
        .map(|c| c.timestamp_millis())
        .unwrap_or(i64::MIN)
}

fn to_post(view: &PostView) -> Post {
    let did = &view.author.did;
    let rkey = view.uri.rsplit('/').next().unwrap_or_default();

    let mut images = Vec::new();
    let mut video = None;
    let mut external = None;

    if let Some(embed) = &view.record.embed {
        images = embed.images(did);
        video = embed.video(did);
        external = embed.external(did);
    }

    // the processed view has CDN urls, prefer it over the raw record
    if let Some(embed) = &view.embed {
        let view_images = embed.images(did);
        if !view_images.is_empty() {
            images = view_images;
        }

        if let Some(view_video) = embed.video(did) {
            video = Some(merge_video(view_video, video));
        }

        if let Some(view_external) = embed.external(did) {
            external = Some(view_external);
        }
    }

    Post {
        uri: view.uri.clone(),
        cid: view.cid.clone(),
        url: format!("{}/profile/{}/post/{}", POST_URL_HOST, view.author.handle, rkey),
        author: Author {
            did: did.clone(),
            handle: view.author.handle.clone(),
            display_name: view.author.display_name.clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| view.author.handle.clone()),
            avatar: view.author.avatar.clone(),
        },
        text: view.record.text.clone(),
        created_at: view.record.created_at.clone(),
        images,
        video,
        external,
        reply_count: view.reply_count.unwrap_or(0),
        repost_count: view.repost_count.unwrap_or(0),
        like_count: view.like_count.unwrap_or(0),
    }
}

fn merge_video(view: PostVideo, record: Option<PostVideo>) -> PostVideo {
    match record {
        None => view,
        Some(record) => PostVideo {
            source_url: view.source_url.or(record.source_url),
            thumbnail_url: view.thumbnail_url.or(record.thumbnail_url),
            alt: view.alt,
            aspect_ratio: view.aspect_ratio.or(record.aspect_ratio),
        },
    }
}
