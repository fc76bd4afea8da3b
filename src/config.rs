use std::{collections::HashSet, env, path::PathBuf, str::FromStr, time::Duration};

use crate::errors::AppError;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATABASE_PATH: &str = "slack_installations.db";
pub const DEFAULT_VIDEO_STORAGE_DIR: &str = "videos";
pub const DEFAULT_MANIFEST_PATH: &str = "manifest.yaml";
pub const DEFAULT_BLUESKY_API_URL: &str = "https://public.api.bsky.app";
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";
pub const DEFAULT_BLUESKY_SERVICE_URL: &str = "https://bsky.social";

/// Optional Bluesky account used to read posts that need a logged-in viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum BlueskyLogin {
    Password { handle: String, app_password: String },
    Token(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Public base URL Slack and browsers use to reach this service.
    pub app_url: String,

    pub signing_secret: Option<String>,
    pub bot_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// `None` approves every workspace.
    pub approved_workspaces: Option<HashSet<String>>,

    pub database_path: String,
    pub token_encryption_key: Option<String>,

    pub video_storage_dir: PathBuf,
    pub ffmpeg_path: String,
    pub max_concurrent_videos: usize,
    pub video_retention: Duration,

    pub manifest_path: PathBuf,
    pub unroll_threads: bool,

    pub bluesky_api_url: String,
    pub bluesky_service_url: String,
    pub bluesky_login: Option<BlueskyLogin>,
    pub slack_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Config, AppError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(get("PORT"), "PORT", DEFAULT_PORT)?;
        let app_url = get("APP_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let max_concurrent_videos: usize = parse_or(get("MAX_CONCURRENT_VIDEOS"), "MAX_CONCURRENT_VIDEOS", 2)?;
        if max_concurrent_videos == 0 {
            return Err(AppError::ConfigError("MAX_CONCURRENT_VIDEOS must be at least 1".to_string()));
        }

        let retention_hours: u64 = parse_or(get("VIDEO_RETENTION_HOURS"), "VIDEO_RETENTION_HOURS", 72)?;
        let video_retention = hours_to_duration(retention_hours, "VIDEO_RETENTION_HOURS")?;

        let bluesky_login = match (get("BLUESKY_HANDLE"), get("BLUESKY_APP_PASSWORD"), get("BLUESKY_ACCESS_TOKEN")) {
            (Some(handle), Some(app_password), _) => Some(BlueskyLogin::Password { handle, app_password }),
            (Some(_), None, None) => {
                return Err(AppError::ConfigError("BLUESKY_HANDLE is set without BLUESKY_APP_PASSWORD".to_string()));
            },
            (_, _, Some(token)) => Some(BlueskyLogin::Token(token)),
            (None, _, None) => None,
        };

        Ok(Config {
            port,
            app_url,

            signing_secret: get("SLACK_SIGNING_SECRET"),
            bot_token: get("SLACK_BOT_TOKEN"),
            client_id: get("SLACK_CLIENT_ID"),
            client_secret: get("SLACK_CLIENT_SECRET"),
            approved_workspaces: parse_approved_workspaces(get("APPROVED_WORKSPACES").as_deref().unwrap_or("")),

            database_path: get("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            token_encryption_key: get("TOKEN_ENCRYPTION_KEY"),

            video_storage_dir: PathBuf::from(get("VIDEO_STORAGE_DIR").unwrap_or_else(|| DEFAULT_VIDEO_STORAGE_DIR.to_string())),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            max_concurrent_videos,
            video_retention,

            manifest_path: PathBuf::from(get("MANIFEST_PATH").unwrap_or_else(|| DEFAULT_MANIFEST_PATH.to_string())),
            unroll_threads: get("UNROLL_THREADS").map(|v| is_truthy(&v)).unwrap_or(false),

            bluesky_api_url: get("BLUESKY_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BLUESKY_API_URL.to_string()),
            bluesky_service_url: get("BLUESKY_SERVICE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BLUESKY_SERVICE_URL.to_string()),
            bluesky_login,
            slack_api_url: get("SLACK_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_SLACK_API_URL.to_string()),
        })
    }

    pub fn signing_secret(&self) -> Result<&str, AppError> {
        self.signing_secret.as_deref()
            .ok_or_else(|| AppError::ConfigError("SLACK_SIGNING_SECRET is not set".to_string()))
    }

    /// Client id and secret, only when both are configured.
    pub fn oauth_credentials(&self) -> Option<(&str, &str)> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }

    pub fn oauth_redirect_url(&self) -> String {
        format!("{}/slack/oauth_redirect", self.app_url)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database_path)
    }
}

pub fn parse_approved_workspaces(value: &str) -> Option<HashSet<String>> {
    let workspaces: HashSet<String> = value.split(',')
        .map(|ws| ws.trim())
        .filter(|ws| !ws.is_empty())
        .map(|ws| ws.to_string())
        .collect();

    if workspaces.is_empty() {
        None
    } else {
        Some(workspaces)
    }
}

pub fn hours_to_duration(hours: u64, name: &str) -> Result<Duration, AppError> {
    hours.checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::ConfigError(format!("{} is too large: {}", name, hours)))
}

fn parse_or<T: FromStr>(value: Option<String>, name: &str, default: T) -> Result<T, AppError> {
    match value {
        Some(v) => v.parse::<T>().map_err(|_| AppError::ConfigError(format!("{} has an invalid value: {}", name, v))),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
