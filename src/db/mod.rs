mod slack_installation;
mod slack_installation_sqlite;
mod validated_installation_store;

#[cfg(test)]
mod slack_installation_sqlite_test;

pub use slack_installation::{SlackBot, SlackInstallation};
pub use slack_installation_sqlite::SqliteInstallationStore;
pub use validated_installation_store::{ValidatedInstallationStore, UNKNOWN_WORKSPACE};
