use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    build_http_client,
    config::{BlueskyLogin, Config},
    db::{SqliteInstallationStore, ValidatedInstallationStore},
    encryption::Encryption,
    errors::AppError,
    link_unfurler::LinkUnfurler,
    manifest::Manifest,
    oauth::OAuthStateStore,
    service_provider::bluesky::BlueskyClient,
    signature::SignatureVerifier,
    slack_handler,
    unfurl_builder::UnfurlBuilder,
    video_processor::VideoProcessor,
};

pub struct AppState {
    pub config: Config,
    pub bot_scopes: Vec<String>,
    pub http_client: Client,
    pub verifier: SignatureVerifier,
    pub installations: ValidatedInstallationStore,
    pub unfurler: LinkUnfurler,
    pub videos: VideoProcessor,
    pub oauth_states: OAuthStateStore,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub async fn new(config: Config, manifest: Manifest) -> Result<AppState, AppError> {
        let verifier = SignatureVerifier::new(config.signing_secret()?);
        let http_client = build_http_client()?;

        let installations = open_installation_store(&config).await?;

        let bluesky = connect_bluesky(&config, http_client.clone(), &manifest).await?;
        let videos = VideoProcessor::new(&config.video_storage_dir, &config.ffmpeg_path, config.max_concurrent_videos)?;
        let unfurler = LinkUnfurler::new(UnfurlBuilder::new(bluesky, config.unroll_threads), videos.clone(), &config.app_url);

        Ok(AppState {
            bot_scopes: manifest.bot_scopes,
            http_client,
            verifier,
            installations,
            unfurler,
            videos,
            oauth_states: OAuthStateStore::default(),
            config,
        })
    }
}

/// Public AppView client, logged in when Bluesky credentials are configured.
pub async fn connect_bluesky(config: &Config, http_client: Client, manifest: &Manifest) -> Result<BlueskyClient, AppError> {
    let mut bluesky = BlueskyClient::new(http_client, &config.bluesky_api_url, &manifest.unfurl_domains)?;

    match &config.bluesky_login {
        Some(BlueskyLogin::Password { handle, app_password }) => {
            if let Err(err) = bluesky.login_with_password(&config.bluesky_service_url, handle, app_password).await {
                warn!(handle = %handle, error = %err, "Bluesky login failed, falling back to the public API");
            }
        },
        Some(BlueskyLogin::Token(token)) => {
            bluesky.login_with_token(&config.bluesky_service_url, token);
            info!(service = %config.bluesky_service_url, "Using the configured Bluesky access token");
        },
        None => {},
    }

    Ok(bluesky)
}

pub async fn open_installation_store(config: &Config) -> Result<ValidatedInstallationStore, AppError> {
    let encryption = config.token_encryption_key.as_deref()
        .map(Encryption::from_base64_key)
        .transpose()?;

    if encryption.is_none() {
        warn!("TOKEN_ENCRYPTION_KEY is not set, tokens are stored unencrypted");
    }

    let store = SqliteInstallationStore::new(&config.database_url(), encryption).await?;
    Ok(ValidatedInstallationStore::new(store, config.approved_workspaces.clone()))
}

pub fn build_router(state: SharedState) -> Router {
    let videos = ServeDir::new(state.videos.storage_dir());

    Router::new()
        .route("/slack/events", post(slack_handler::handle_slack_events))
        .route("/slack/install", get(slack_handler::handle_slack_install))
        .route("/slack/oauth_redirect", get(slack_handler::handle_slack_oauth_redirect))
        .route("/player/{video_id}", get(slack_handler::handle_video_player))
        .route("/health", get(slack_handler::handle_health))
        .nest_service("/videos", videos)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve<F>(config: Config, manifest: Manifest, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(AppState::new(config, manifest).await?);

    if state.config.oauth_credentials().is_none() && state.config.bot_token.is_none() {
        warn!("Neither SLACK_BOT_TOKEN nor SLACK_CLIENT_ID/SLACK_CLIENT_SECRET are set, events cannot be answered");
    }

    let purge_task = tokio::spawn(purge_videos_periodically(state.videos.clone(), state.config.video_retention));

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, app_url = %state.config.app_url, "Skyfurl listening");

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    purge_task.abort();
    info!("Server stopped");

    Ok(result?)
}

async fn purge_videos_periodically(videos: VideoProcessor, retention: std::time::Duration) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));

    loop {
        interval.tick().await;

        if let Err(err) = videos.purge_older_than(retention).await {
            error!(error = %err, "Failed to purge old videos");
        }
    }
}
