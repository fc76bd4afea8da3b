use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use rand::RngCore;

use crate::base64::encode_url_safe;

pub const SLACK_AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);

/// One-time OAuth `state` values issued by `/slack/install`.
#[derive(Clone)]
pub struct OAuthStateStore {
    ttl: Duration,
    states: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Default for OAuthStateStore {
    fn default() -> Self {
        OAuthStateStore::new(STATE_TTL)
    }
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> OAuthStateStore {
        OAuthStateStore { ttl, states: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn issue(&self) -> String {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        let state = encode_url_safe(&bytes);

        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        states.retain(|_, issued_at| now.duration_since(*issued_at) < self.ttl);
        states.insert(state.clone(), now);

        state
    }

    /// True once per issued state, and only before it expires.
    pub fn consume(&self, state: &str) -> bool {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match states.remove(state) {
            Some(issued_at) => issued_at.elapsed() < self.ttl,
            None => false,
        }
    }
}

pub fn authorize_url(client_id: &str, scopes: &[String], redirect_uri: &str, state: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", client_id)
        .append_pair("scope", &scopes.join(","))
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .finish();

    format!("{}?{}", SLACK_AUTHORIZE_URL, query)
}
