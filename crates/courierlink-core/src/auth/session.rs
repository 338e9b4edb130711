use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::TokenGrant;

/// Default lifetime of an upstream session, in minutes.
/// The courier app's access tokens are issued for 15 minutes.
pub const SESSION_LIFETIME_MINUTES: i64 = 15;

/// Buffer time before expiry inside which a token is no longer served (5 minutes)
pub const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// The cached upstream session for one local account: the bearer token
/// triple and the moment it stops being valid. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

impl SessionTokens {
    /// Build a record from a fresh grant issued at `now`.
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            access_token: grant.access_token,
            id_token: grant.id_token,
            refresh_token: grant.refresh_token,
            expiry: now + lifetime,
        }
    }

    /// Usable only while `now < expiry - buffer`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now < self.expiry - buffer
    }

    pub fn is_usable(&self, buffer: Duration) -> bool {
        self.is_usable_at(Utc::now(), buffer)
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expiry - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}
