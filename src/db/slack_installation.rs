
/// One OAuth installation of the app, as returned by `oauth.v2.access`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlackInstallation {
    pub client_id: String,
    pub app_id: String,

    pub enterprise_id: Option<String>,
    pub enterprise_name: Option<String>,
    pub enterprise_url: Option<String>,
    pub team_id: String,
    pub team_name: Option<String>,

    pub bot_token: Option<String>,
    pub bot_id: Option<String>,
    pub bot_user_id: Option<String>,
    pub bot_scopes: Vec<String>,
    pub bot_refresh_token: Option<String>,
    pub bot_token_expires_at: Option<i64>,

    pub user_id: Option<String>,
    pub user_token: Option<String>,
    pub user_scopes: Vec<String>,
    pub user_refresh_token: Option<String>,
    pub user_token_expires_at: Option<i64>,

    pub incoming_webhook_url: Option<String>,
    pub incoming_webhook_channel: Option<String>,
    pub incoming_webhook_channel_id: Option<String>,
    pub incoming_webhook_configuration_url: Option<String>,

    pub is_enterprise_install: bool,
    pub token_type: Option<String>,
    pub installed_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackBot {
    pub app_id: String,
    pub enterprise_id: Option<String>,
    pub enterprise_name: Option<String>,
    pub team_id: String,
    pub team_name: Option<String>,

    pub bot_token: String,
    pub bot_id: Option<String>,
    pub bot_user_id: Option<String>,
    pub bot_scopes: Vec<String>,
    pub bot_refresh_token: Option<String>,
    pub bot_token_expires_at: Option<i64>,

    pub is_enterprise_install: bool,
    pub installed_at: i64,
}

impl SlackInstallation {
    pub fn to_bot(&self) -> Option<SlackBot> {
        let bot_token = self.bot_token.clone()?;

        Some(SlackBot {
            app_id: self.app_id.clone(),
            enterprise_id: self.enterprise_id.clone(),
            enterprise_name: self.enterprise_name.clone(),
            team_id: self.team_id.clone(),
            team_name: self.team_name.clone(),
            bot_token,
            bot_id: self.bot_id.clone(),
            bot_user_id: self.bot_user_id.clone(),
            bot_scopes: self.bot_scopes.clone(),
            bot_refresh_token: self.bot_refresh_token.clone(),
            bot_token_expires_at: self.bot_token_expires_at,
            is_enterprise_install: self.is_enterprise_install,
            installed_at: self.installed_at,
        })
    }
}
