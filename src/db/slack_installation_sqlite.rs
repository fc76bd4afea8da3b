use std::str::FromStr;

use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow}, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use crate::{encryption::Encryption, errors::AppError};

use super::{SlackBot, SlackInstallation};

const CREATE_INSTALLATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS installations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id TEXT NOT NULL,
        app_id TEXT NOT NULL,
        enterprise_id TEXT,
        enterprise_name TEXT,
        enterprise_url TEXT,
        team_id TEXT NOT NULL,
        team_name TEXT,
        bot_token TEXT,
        bot_id TEXT,
        bot_user_id TEXT,
        bot_scopes TEXT,
        bot_refresh_token TEXT,
        bot_token_expires_at INTEGER,
        user_id TEXT,
        user_token TEXT,
        user_scopes TEXT,
        user_refresh_token TEXT,
        user_token_expires_at INTEGER,
        incoming_webhook_url TEXT,
        incoming_webhook_channel TEXT,
        incoming_webhook_channel_id TEXT,
        incoming_webhook_configuration_url TEXT,
        is_enterprise_install INTEGER,
        token_type TEXT,
        installed_at INTEGER NOT NULL,
        UNIQUE(client_id, enterprise_id, team_id, user_id)
    )
"#;

const CREATE_TEAM_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_team_id ON installations(team_id)";
const CREATE_ENTERPRISE_TEAM_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_enterprise_team ON installations(enterprise_id, team_id)";

/// Installation store backed by `slack_installations.db`.
///
/// Tokens are sealed with [`Encryption`] when a key is configured, otherwise
/// they are stored as given.
#[derive(Clone)]
pub struct SqliteInstallationStore {
    pool: SqlitePool,
    encryption: Option<Encryption>,
}

impl SqliteInstallationStore {
    pub async fn new(database_url: &str, encryption: Option<Encryption>) -> Result<SqliteInstallationStore, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = SqliteInstallationStore { pool, encryption };
        store.init_db().await?;

        info!(database = database_url, encrypted = store.encryption.is_some(), "Opened Slack installation store");
        Ok(store)
    }

    async fn init_db(&self) -> Result<(), AppError> {
        sqlx::query(CREATE_INSTALLATIONS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_TEAM_INDEX).execute(&self.pool).await?;
        sqlx::query(CREATE_ENTERPRISE_TEAM_INDEX).execute(&self.pool).await?;

        Ok(())
    }

    pub async fn save(&self, installation: &SlackInstallation) -> Result<(), AppError> {
        let t = installation;
        let mut tx = self.pool.begin().await?;

        // UNIQUE treats NULLs as distinct, so the previous row is replaced by hand
        sqlx::query(r#"
            DELETE FROM installations
            WHERE client_id = ? AND enterprise_id IS ? AND team_id = ? AND user_id IS ?
        "#)
            .bind(&t.client_id)
            .bind(&t.enterprise_id)
            .bind(&t.team_id)
            .bind(&t.user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"
            INSERT INTO installations (
                client_id, app_id, enterprise_id, enterprise_name, enterprise_url,
                team_id, team_name, bot_token, bot_id, bot_user_id, bot_scopes,
                bot_refresh_token, bot_token_expires_at, user_id, user_token,
                user_scopes, user_refresh_token, user_token_expires_at,
                incoming_webhook_url, incoming_webhook_channel,
                incoming_webhook_channel_id, incoming_webhook_configuration_url,
                is_enterprise_install, token_type, installed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#)
            .bind(&t.client_id)
            .bind(&t.app_id)
            .bind(&t.enterprise_id)
            .bind(&t.enterprise_name)
            .bind(&t.enterprise_url)
            .bind(&t.team_id)
            .bind(&t.team_name)
            .bind(self.seal(t.bot_token.as_deref())?)
            .bind(&t.bot_id)
            .bind(&t.bot_user_id)
            .bind(scopes_to_json(&t.bot_scopes)?)
            .bind(self.seal(t.bot_refresh_token.as_deref())?)
            .bind(t.bot_token_expires_at)
            .bind(&t.user_id)
            .bind(self.seal(t.user_token.as_deref())?)
            .bind(scopes_to_json(&t.user_scopes)?)
            .bind(self.seal(t.user_refresh_token.as_deref())?)
            .bind(t.user_token_expires_at)
            .bind(&t.incoming_webhook_url)
            .bind(&t.incoming_webhook_channel)
            .bind(&t.incoming_webhook_channel_id)
            .bind(&t.incoming_webhook_configuration_url)
            .bind(t.is_enterprise_install)
            .bind(&t.token_type)
            .bind(t.installed_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(team_id = %t.team_id, enterprise_id = ?t.enterprise_id, "Saved Slack installation");
        Ok(())
    }

    /// Newest installation matching every key that is given.
    pub async fn find_installation(&self, enterprise_id: Option<&str>, team_id: Option<&str>, user_id: Option<&str>) -> Result<Option<SlackInstallation>, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM installations WHERE 1=1");
        push_filters(&mut query, enterprise_id, team_id, user_id);
        query.push(" ORDER BY installed_at DESC, id DESC LIMIT 1");

        let row = query.build().fetch_optional(&self.pool).await?;

        row.map(|row| self.row_to_installation(&row)).transpose()
    }

    pub async fn find_bot(&self, enterprise_id: Option<&str>, team_id: Option<&str>) -> Result<Option<SlackBot>, AppError> {
        let installation = self.find_installation(enterprise_id, team_id, None).await?;

        Ok(installation.and_then(|i| i.to_bot()))
    }

    /// Returns the number of rows removed.
    pub async fn delete_installation(&self, enterprise_id: Option<&str>, team_id: Option<&str>, user_id: Option<&str>) -> Result<u64, AppError> {
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM installations WHERE 1=1");
        push_filters(&mut query, enterprise_id, team_id, user_id);

        let result = query.build().execute(&self.pool).await?;

        info!(team_id = ?team_id, enterprise_id = ?enterprise_id, user_id = ?user_id, deleted = result.rows_affected(), "Deleted Slack installations");
        Ok(result.rows_affected())
    }

    pub async fn delete_bot(&self, enterprise_id: Option<&str>, team_id: Option<&str>) -> Result<u64, AppError> {
        self.delete_installation(enterprise_id, team_id, None).await
    }

    pub async fn list_installations(&self) -> Result<Vec<SlackInstallation>, AppError> {
        let rows = sqlx::query("SELECT * FROM installations ORDER BY installed_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), "Listed Slack installations");

        rows.iter()
            .map(|row| self.row_to_installation(row))
            .collect()
    }

    /// Raw `bot_token` column, for checking what actually lands on disk.
    #[cfg(test)]
    pub(crate) async fn stored_bot_token(&self, team_id: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT bot_token FROM installations WHERE team_id = ? LIMIT 1")
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| row.get::<Option<String>, _>("bot_token")))
    }

    fn seal(&self, token: Option<&str>) -> Result<Option<String>, AppError> {
        match (token, &self.encryption) {
            (Some(token), Some(encryption)) => Ok(Some(encryption.seal(token)?)),
            (token, _) => Ok(token.map(|t| t.to_string())),
        }
    }

    fn open(&self, stored: Option<String>) -> Result<Option<String>, AppError> {
        match (stored, &self.encryption) {
            // sealed tokens are JSON objects; anything else was saved before the key was set
            (Some(plain), Some(_)) if !plain.starts_with('{') => {
                warn!("Found an unencrypted token, reinstall the workspace to encrypt it");
                Ok(Some(plain))
            },
            (Some(sealed), Some(encryption)) => Ok(Some(encryption.open(&sealed)?)),
            (stored, _) => Ok(stored),
        }
    }

    fn row_to_installation(&self, row: &SqliteRow) -> Result<SlackInstallation, AppError> {
        Ok(SlackInstallation {
            client_id: row.try_get("client_id")?,
            app_id: row.try_get("app_id")?,
            enterprise_id: row.try_get("enterprise_id")?,
            enterprise_name: row.try_get("enterprise_name")?,
            enterprise_url: row.try_get("enterprise_url")?,
            team_id: row.try_get("team_id")?,
            team_name: row.try_get("team_name")?,
            bot_token: self.open(row.try_get("bot_token")?)?,
            bot_id: row.try_get("bot_id")?,
            bot_user_id: row.try_get("bot_user_id")?,
            bot_scopes: scopes_from_json(row.try_get("bot_scopes")?)?,
            bot_refresh_token: self.open(row.try_get("bot_refresh_token")?)?,
            bot_token_expires_at: row.try_get("bot_token_expires_at")?,
            user_id: row.try_get("user_id")?,
            user_token: self.open(row.try_get("user_token")?)?,
            user_scopes: scopes_from_json(row.try_get("user_scopes")?)?,
            user_refresh_token: self.open(row.try_get("user_refresh_token")?)?,
            user_token_expires_at: row.try_get("user_token_expires_at")?,
            incoming_webhook_url: row.try_get("incoming_webhook_url")?,
            incoming_webhook_channel: row.try_get("incoming_webhook_channel")?,
            incoming_webhook_channel_id: row.try_get("incoming_webhook_channel_id")?,
            incoming_webhook_configuration_url: row.try_get("incoming_webhook_configuration_url")?,
            is_enterprise_install: row.try_get::<Option<bool>, _>("is_enterprise_install")?.unwrap_or(false),
            token_type: row.try_get("token_type")?,
            installed_at: row.try_get("installed_at")?,
        })
    }
}

fn push_filters(query: &mut QueryBuilder<Sqlite>, enterprise_id: Option<&str>, team_id: Option<&str>, user_id: Option<&str>) {
    if let Some(enterprise_id) = enterprise_id {
        query.push(" AND enterprise_id = ").push_bind(enterprise_id.to_string());
    }

    if let Some(team_id) = team_id {
        query.push(" AND team_id = ").push_bind(team_id.to_string());
    }

    if let Some(user_id) = user_id {
        query.push(" AND user_id = ").push_bind(user_id.to_string());
    }
}

fn scopes_to_json(scopes: &[String]) -> Result<Option<String>, AppError> {
    if scopes.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(scopes)?))
    }
}

fn scopes_from_json(stored: Option<String>) -> Result<Vec<String>, AppError> {
    match stored {
        Some(json) if !json.is_empty() => Ok(serde_json::from_str(&json)?),
        _ => Ok(Vec::new()),
    }
}
