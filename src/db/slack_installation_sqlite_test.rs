use tempfile::TempDir;

use crate::{config::parse_approved_workspaces, encryption::Encryption, errors::AppError};

use super::{SlackInstallation, SqliteInstallationStore, ValidatedInstallationStore};

async fn create_store(encryption: Option<Encryption>) -> Result<(TempDir, SqliteInstallationStore), AppError> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}", dir.path().join("slack_installations.db").display());
    let store = SqliteInstallationStore::new(&url, encryption).await?;

    Ok((dir, store))
}

fn installation(team_id: &str, team_name: &str, bot_token: &str, installed_at: i64) -> SlackInstallation {
    SlackInstallation {
        client_id: "123.456".to_string(),
        app_id: "A0SKYFURL".to_string(),
        team_id: team_id.to_string(),
        team_name: Some(team_name.to_string()),
        bot_token: Some(bot_token.to_string()),
        bot_id: Some("B0BOT".to_string()),
        bot_user_id: Some("U0BOT".to_string()),
        bot_scopes: vec!["links:read".to_string(), "links:write".to_string()],
        user_id: Some("U6HHP84N9".to_string()),
        token_type: Some("bot".to_string()),
        installed_at,
        ..Default::default()
    }
}

#[tokio::test]
async fn save_and_find_installation() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;
    let saved = installation("T0001", "Acme Corp", "xoxb-acme", 1_700_000_000);

    store.save(&saved).await?;

    let found = store.find_installation(None, Some("T0001"), None).await?;
    assert_eq!(found, Some(saved));

    assert_eq!(store.find_installation(None, Some("T9999"), None).await?, None);
    Ok(())
}

#[tokio::test]
async fn find_returns_newest_installation() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;

    store.save(&installation("T0001", "Acme Corp", "xoxb-old", 1_700_000_000)).await?;
    let mut reinstall = installation("T0001", "Acme Corp", "xoxb-new", 1_700_000_500);
    reinstall.user_id = Some("U0OTHER".to_string());
    store.save(&reinstall).await?;

    let bot = store.find_bot(None, Some("T0001")).await?.expect("bot should exist");
    assert_eq!(bot.bot_token, "xoxb-new");
    assert_eq!(bot.bot_scopes, vec!["links:read", "links:write"]);

    let by_user = store.find_installation(None, Some("T0001"), Some("U6HHP84N9")).await?.expect("original installer");
    assert_eq!(by_user.bot_token.as_deref(), Some("xoxb-old"));
    Ok(())
}

#[tokio::test]
async fn reinstall_by_same_user_replaces_row() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;

    store.save(&installation("T0001", "Acme Corp", "xoxb-first", 1_700_000_000)).await?;
    store.save(&installation("T0001", "Acme Corp", "xoxb-second", 1_700_000_500)).await?;

    let installations = store.list_installations().await?;
    assert_eq!(installations.len(), 1);
    assert_eq!(installations[0].bot_token.as_deref(), Some("xoxb-second"));

    let mut grid = installation("T0003", "Grid Team", "xoxb-grid", 1_700_000_000);
    grid.enterprise_id = Some("E0001".to_string());
    store.save(&grid).await?;
    store.save(&grid).await?;

    assert_eq!(store.list_installations().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn find_bot_requires_bot_token() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;
    let mut user_only = installation("T0002", "Skunkworks", "unused", 1_700_000_000);
    user_only.bot_token = None;
    user_only.user_token = Some("xoxp-user".to_string());

    store.save(&user_only).await?;

    assert!(store.find_installation(None, Some("T0002"), None).await?.is_some());
    assert!(store.find_bot(None, Some("T0002")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn enterprise_filter_applies_when_given() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;
    let mut grid = installation("T0003", "Grid Team", "xoxb-grid", 1_700_000_000);
    grid.enterprise_id = Some("E0001".to_string());
    grid.is_enterprise_install = true;
    store.save(&grid).await?;

    let found = store.find_bot(Some("E0001"), Some("T0003")).await?.expect("grid bot");
    assert!(found.is_enterprise_install);
    assert!(store.find_bot(Some("E0002"), Some("T0003")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn delete_installation_for_team() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;
    store.save(&installation("T0001", "Acme Corp", "xoxb-acme", 1_700_000_000)).await?;
    store.save(&installation("T0002", "Skunkworks", "xoxb-skunk", 1_700_000_000)).await?;

    assert_eq!(store.delete_bot(None, Some("T0001")).await?, 1);

    assert!(store.find_bot(None, Some("T0001")).await?.is_none());
    assert_eq!(store.list_installations().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn encrypts_tokens_at_rest() -> Result<(), AppError> {
    let encryption = Encryption::new(b"plain text key which should be s");
    let (_dir, store) = create_store(Some(encryption)).await?;

    store.save(&installation("T0001", "Acme Corp", "xoxb-secret", 1_700_000_000)).await?;

    let stored = store.stored_bot_token("T0001").await?.expect("token column");
    assert!(!stored.contains("xoxb-secret"));

    let bot = store.find_bot(None, Some("T0001")).await?.expect("bot");
    assert_eq!(bot.bot_token, "xoxb-secret");
    Ok(())
}

#[tokio::test]
async fn reads_tokens_saved_before_encryption_was_enabled() -> Result<(), AppError> {
    let (dir, plain_store) = create_store(None).await?;
    plain_store.save(&installation("T0001", "Acme Corp", "xoxb-plain", 1_700_000_000)).await?;

    let url = format!("sqlite://{}", dir.path().join("slack_installations.db").display());
    let encryption = Encryption::new(b"plain text key which should be s");
    let encrypted_store = SqliteInstallationStore::new(&url, Some(encryption)).await?;

    let bot = encrypted_store.find_bot(None, Some("T0001")).await?.expect("bot");
    assert_eq!(bot.bot_token, "xoxb-plain");
    Ok(())
}

#[tokio::test]
async fn validated_store_rejects_unapproved_workspace() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;
    let validated = ValidatedInstallationStore::new(store, parse_approved_workspaces("Acme Corp"));

    validated.save(&installation("T0001", "Acme Corp", "xoxb-acme", 1_700_000_000)).await?;

    let rejected = validated.save(&installation("T0002", "Skunkworks", "xoxb-skunk", 1_700_000_000)).await;
    match rejected {
        Err(AppError::WorkspaceNotApproved(message)) => assert!(message.contains("'Skunkworks'")),
        other => panic!("expected WorkspaceNotApproved, got {:?}", other),
    }

    let mut unnamed = installation("T0003", "ignored", "xoxb-unnamed", 1_700_000_000);
    unnamed.team_name = None;
    assert!(matches!(validated.save(&unnamed).await, Err(AppError::WorkspaceNotApproved(_))));

    assert_eq!(validated.list_installations().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn validated_store_without_list_approves_everyone() -> Result<(), AppError> {
    let (_dir, store) = create_store(None).await?;
    let validated = ValidatedInstallationStore::new(store, None);

    validated.save(&installation("T0002", "Skunkworks", "xoxb-skunk", 1_700_000_000)).await?;

    assert!(validated.find_bot(None, Some("T0002")).await?.is_some());
    Ok(())
}
