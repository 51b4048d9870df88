//! Access token state for the remote directory

use serde::{Deserialize, Serialize};

/// Tokens this close to expiry are refreshed before use
pub const EXPIRY_MARGIN_MS: i64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_at_ms: i64,
    pub scope: String,
    pub valid: bool,
}

impl AuthToken {
    pub fn is_usable_at(&self, now_ms: i64) -> bool {
        self.valid && self.expires_at_ms > now_ms.saturating_add(EXPIRY_MARGIN_MS)
    }

    /// Value for the `authorization` header
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    pub(crate) fn apply(&mut self, response: TokenResponse, now_ms: i64) {
        self.access_token = response.access_token;
        self.token_type = response.token_type;
        self.expires_at_ms = now_ms.saturating_add(response.expires_in.saturating_mul(1000));
        self.scope = response.scope;
        self.valid = true;
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub audience: &'a str,
    pub grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
