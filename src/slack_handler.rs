use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde_derive::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    errors::AppError,
    link_unfurler::LinkSharedEvent,
    oauth::authorize_url,
    player::{escape_html_attribute, render_video_player},
    server::SharedState,
    service_provider::slack::{swap_slack_access_token, Slack},
    video_processor::video_file_name,
};

const SLACK_RETRY_NUM_HEADER: &str = "x-slack-retry-num";
const SLACK_RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification { challenge: String },
    EventCallback(EventCallback),
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize, Debug)]
pub struct EventCallback {
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    #[serde(default)]
    pub is_enterprise_install: bool,
    pub event_id: Option<String>,
    pub event: SlackEvent,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    LinkShared(LinkSharedEvent),
    AppUninstalled {},
    TokensRevoked {},
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize, Debug, Default)]
pub struct OAuthCallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn handle_slack_events(State(state): State<SharedState>, headers: HeaderMap, body: String) -> Result<Response, AppError> {
    state.verifier.verify(&headers, &body)?;

    if is_timeout_retry(&headers) {
        debug!("Acknowledged Slack retry without reprocessing");
        return Ok(StatusCode::OK.into_response());
    }

    let envelope: SlackEnvelope = serde_json::from_str(&body)
        .map_err(|err| AppError::BadRequest(format!("Invalid event payload: {}", err)))?;

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            info!("Answered Slack URL verification");
            Ok(Json(json!({ "challenge": challenge })).into_response())
        },
        SlackEnvelope::EventCallback(callback) => {
            // Slack expects an answer within 3 seconds
            tokio::spawn(async move {
                let event_id = callback.event_id.clone().unwrap_or_default();
                if let Err(err) = process_event(&state, callback).await {
                    error!(event_id, error = %err, "Failed to process Slack event");
                }
            });

            Ok(StatusCode::OK.into_response())
        },
        SlackEnvelope::Unsupported => Ok(StatusCode::OK.into_response()),
    }
}

fn is_timeout_retry(headers: &HeaderMap) -> bool {
    let reason = headers.get(SLACK_RETRY_REASON_HEADER).and_then(|v| v.to_str().ok());
    headers.contains_key(SLACK_RETRY_NUM_HEADER) && reason == Some("http_timeout")
}

pub async fn process_event(state: &SharedState, callback: EventCallback) -> Result<(), AppError> {
    let enterprise_id = callback.enterprise_id.as_deref();
    let team_id = callback.team_id.as_deref();

    match &callback.event {
        SlackEvent::LinkShared(event) => {
            info!(channel = %event.channel, links = event.links.len(), "Link shared event");

            let Some(token) = resolve_bot_token(state, &callback).await? else {
                warn!(?team_id, ?enterprise_id, "No bot token for workspace, dropping event");
                return Ok(());
            };

            let slack = Slack::new(state.http_client.clone(), &state.config.slack_api_url, token);
            state.unfurler.handle_link_shared(&slack, event).await?;
        },
        SlackEvent::AppUninstalled {} | SlackEvent::TokensRevoked {} => {
            let deleted = state.installations.delete_installation(enterprise_id, team_id, None).await?;
            info!(?team_id, ?enterprise_id, deleted, "Removed installation");
        },
        SlackEvent::Unsupported => {
            debug!("Ignored unsupported event");
        },
    }

    Ok(())
}

/// `SLACK_BOT_TOKEN` wins; otherwise the installation stored for the workspace.
pub async fn resolve_bot_token(state: &SharedState, callback: &EventCallback) -> Result<Option<String>, AppError> {
    if let Some(token) = &state.config.bot_token {
        return Ok(Some(token.clone()));
    }

    let enterprise_id = callback.enterprise_id.as_deref();
    let team_id = callback.team_id.as_deref();

    let mut bot = state.installations.find_bot(enterprise_id, team_id).await?;

    // org-wide installs are stored without the team
    if bot.is_none() && enterprise_id.is_some() && callback.is_enterprise_install {
        bot = state.installations.find_bot(enterprise_id, None).await?;
    }

    Ok(bot.map(|b| b.bot_token))
}

pub async fn handle_slack_install(State(state): State<SharedState>) -> Result<Response, AppError> {
    let Some((client_id, _)) = state.config.oauth_credentials() else {
        return Ok((StatusCode::NOT_FOUND, "OAuth is not configured").into_response());
    };

    let oauth_state = state.oauth_states.issue();
    let url = authorize_url(client_id, &state.bot_scopes, &state.config.oauth_redirect_url(), &oauth_state);

    Ok(Redirect::to(&url).into_response())
}

pub async fn handle_slack_oauth_redirect(State(state): State<SharedState>, Query(params): Query<OAuthCallbackParams>) -> Result<Response, AppError> {
    let Some((client_id, client_secret)) = state.config.oauth_credentials() else {
        return Ok((StatusCode::NOT_FOUND, "OAuth is not configured").into_response());
    };

    if let Some(error) = params.error {
        warn!(error = %error, "Slack installation was cancelled");
        return Ok((StatusCode::BAD_REQUEST, html_page("Installation cancelled", &format!("Slack returned: {}", error))).into_response());
    }

    let valid_state = params.state.as_deref().is_some_and(|s| state.oauth_states.consume(s));
    if !valid_state {
        return Err(AppError::InvalidOAuthState);
    }

    let code = params.code
        .ok_or_else(|| AppError::BadRequest("Missing code".to_string()))?;

    let oauth_response = swap_slack_access_token(
        &state.http_client,
        &state.config.slack_api_url,
        &code,
        &state.config.oauth_redirect_url(),
        client_id,
        client_secret,
    ).await?;

    let bot_id = match &oauth_response.access_token {
        Some(token) => Slack::new(state.http_client.clone(), &state.config.slack_api_url, token.clone())
            .auth_test()
            .await
            .map(|auth| auth.bot_id)
            .unwrap_or_else(|err| {
                warn!(error = %err, "auth.test failed, saving installation without bot id");
                None
            }),
        None => None,
    };

    let installation = oauth_response.to_installation(client_id, bot_id, Utc::now().timestamp());

    match state.installations.save(&installation).await {
        Ok(()) => {
            info!(team_id = %installation.team_id, team_name = ?installation.team_name, "Installed to workspace");
            Ok(html_page("Skyfurl installed", "Bluesky links shared in your workspace will now unfurl. You can close this window.").into_response())
        },
        Err(AppError::WorkspaceNotApproved(message)) => {
            Ok((StatusCode::FORBIDDEN, html_page("Installation not approved", &message)).into_response())
        },
        Err(err) => Err(err),
    }
}

pub async fn handle_video_player(State(state): State<SharedState>, Path(video_id): Path<String>) -> Response {
    if state.videos.video_path(&video_id).is_none() {
        return (StatusCode::NOT_FOUND, "Video not found").into_response();
    }

    let video_url = format!("{}/videos/{}", state.config.app_url, video_file_name(&video_id));
    Html(render_video_player(&video_url)).into_response()
}

pub async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn html_page(title: &str, message: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n<p>{message}</p>\n</body>\n</html>\n",
        title = escape_html_attribute(title),
        message = escape_html_attribute(message),
    ))
}
