use std::collections::HashSet;

use tracing::warn;

use crate::errors::AppError;

use super::{SlackBot, SlackInstallation, SqliteInstallationStore};

pub const UNKNOWN_WORKSPACE: &str = "Unknown Workspace";

/// Installation store that only accepts installs from approved workspaces.
///
/// Lookups and deletes pass straight through.
#[derive(Clone)]
pub struct ValidatedInstallationStore {
    store: SqliteInstallationStore,
    approved_workspaces: Option<HashSet<String>>,
}

impl ValidatedInstallationStore {
    pub fn new(store: SqliteInstallationStore, approved_workspaces: Option<HashSet<String>>) -> ValidatedInstallationStore {
        ValidatedInstallationStore { store, approved_workspaces }
    }

    pub fn is_workspace_approved(&self, team_name: &str) -> bool {
        match &self.approved_workspaces {
            None => true,
            Some(approved) => approved.contains(team_name),
        }
    }

    pub async fn save(&self, installation: &SlackInstallation) -> Result<(), AppError> {
        let team_name = installation.team_name.as_deref().unwrap_or(UNKNOWN_WORKSPACE);

        if !self.is_workspace_approved(team_name) {
            warn!(team_id = %installation.team_id, team_name, "Rejected installation from unapproved workspace");

            return Err(AppError::WorkspaceNotApproved(format!(
                "Workspace '{}' is not approved for this installation. Please contact the app administrator for access.",
                team_name
            )));
        }

        self.store.save(installation).await
    }

    pub async fn find_installation(&self, enterprise_id: Option<&str>, team_id: Option<&str>, user_id: Option<&str>) -> Result<Option<SlackInstallation>, AppError> {
        self.store.find_installation(enterprise_id, team_id, user_id).await
    }

    pub async fn find_bot(&self, enterprise_id: Option<&str>, team_id: Option<&str>) -> Result<Option<SlackBot>, AppError> {
        self.store.find_bot(enterprise_id, team_id).await
    }

    pub async fn delete_installation(&self, enterprise_id: Option<&str>, team_id: Option<&str>, user_id: Option<&str>) -> Result<u64, AppError> {
        self.store.delete_installation(enterprise_id, team_id, user_id).await
    }

    pub async fn delete_bot(&self, enterprise_id: Option<&str>, team_id: Option<&str>) -> Result<u64, AppError> {
        self.store.delete_bot(enterprise_id, team_id).await
    }

    pub async fn list_installations(&self) -> Result<Vec<SlackInstallation>, AppError> {
        self.store.list_installations().await
    }
}
