use std::path::Path;

use serde_derive::Deserialize;
use tracing::{info, warn};

use crate::errors::AppError;

pub const DEFAULT_UNFURL_DOMAINS: &[&str] = &[
    "bsky.app",
    "blacksky.community",
];

pub const DEFAULT_BOT_SCOPES: &[&str] = &[
    "links:read",
    "links:write",
];

/// The parts of the Slack app manifest this service reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub unfurl_domains: Vec<String>,
    pub bot_scopes: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RawManifest {
    #[serde(default)]
    features: RawFeatures,
    #[serde(default)]
    oauth_config: RawOAuthConfig,
}

#[derive(Deserialize, Debug, Default)]
struct RawFeatures {
    #[serde(default)]
    unfurl_domains: Vec<String>,
}

#[derive(Deserialize, Debug, Default)]
struct RawOAuthConfig {
    #[serde(default)]
    scopes: RawScopes,
}

#[derive(Deserialize, Debug, Default)]
struct RawScopes {
    #[serde(default)]
    bot: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest {
            unfurl_domains: DEFAULT_UNFURL_DOMAINS.iter().map(|d| d.to_string()).collect(),
            bot_scopes: DEFAULT_BOT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Manifest {
    pub fn parse(yaml: &str) -> Result<Manifest, AppError> {
        let raw: RawManifest = serde_yaml::from_str(yaml)?;
        let defaults = Manifest::default();

        Ok(Manifest {
            unfurl_domains: if raw.features.unfurl_domains.is_empty() { defaults.unfurl_domains } else { raw.features.unfurl_domains },
            bot_scopes: if raw.oauth_config.scopes.bot.is_empty() { defaults.bot_scopes } else { raw.oauth_config.scopes.bot },
        })
    }

    /// Missing file falls back to the defaults, a malformed one is an error.
    pub async fn load(path: &Path) -> Result<Manifest, AppError> {
        match tokio::fs::read_to_string(path).await {
            Ok(yaml) => {
                let manifest = Manifest::parse(&yaml)?;
                info!(path = %path.display(), domains = ?manifest.unfurl_domains, "Loaded Slack app manifest");
                Ok(manifest)
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No Slack app manifest found, using default unfurl domains");
                Ok(Manifest::default())
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::Manifest;

    const MANIFEST: &str = r#"
display_information:
  name: Skyfurl
features:
  bot_user:
    display_name: Skyfurl
  unfurl_domains:
    - bsky.app
    - blacksky.community
    - deer.social
oauth_config:
  redirect_urls:
    - https://skyfurl.example.com/slack/oauth_redirect
  scopes:
    bot:
      - links:read
      - links:write
      - chat:write
settings:
  event_subscriptions:
    request_url: https://skyfurl.example.com/slack/events
    bot_events:
      - link_shared
"#;

    #[test]
    fn reads_unfurl_domains_and_scopes() {
        let manifest = Manifest::parse(MANIFEST).unwrap();

        assert_eq!(manifest.unfurl_domains, vec!["bsky.app", "blacksky.community", "deer.social"]);
        assert_eq!(manifest.bot_scopes, vec!["links:read", "links:write", "chat:write"]);
    }

    #[test]
    fn falls_back_to_defaults_for_missing_sections() {
        let manifest = Manifest::parse("display_information:\n  name: Skyfurl\n").unwrap();

        assert_eq!(manifest, Manifest::default());
    }

    #[tokio::test]
    async fn loads_from_file_or_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();

        let loaded = Manifest::load(file.path()).await.unwrap();
        assert_eq!(loaded.unfurl_domains.len(), 3);

        let dir = tempfile::tempdir().unwrap();
        let missing = Manifest::load(&dir.path().join("manifest.yaml")).await.unwrap();
        assert_eq!(missing, Manifest::default());
    }
}
