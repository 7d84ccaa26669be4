use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Contents of `.chalkline/config.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub version: u32,

    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,

    /// Resource collections whose mutations the service accepts but does not
    /// persist. The facade records these locally without a network attempt.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub record_only: HashSet<String>,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        RemoteConfig {
            base_url: base_url.into(),
            record_only: HashSet::new(),
        }
    }
}

/// Authentication state established by login, torn down by logout or an
/// expired-credential response. Consulted before every outgoing request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub token: String,

    #[serde(default)]
    pub role: Option<String>,
}

/// Contents of `.chalkline/state.json`. The credential lives here, not in
/// config.json, so purging it never touches the remote configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientState {
    pub version: u32,

    #[serde(default)]
    pub session: Option<Session>,
}
