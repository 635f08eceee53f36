//! The persisted token record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a token. The only transition is `Active -> Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// Usable, subject to expiry.
    Active,
    /// Terminal. Never returns to `Active`.
    Revoked,
}

impl TokenStatus {
    /// The lowercase name stored by SQL backends.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown token status '{other}'")),
        }
    }
}

/// A token and the encrypted payload it stands in for.
///
/// `ciphertext` is written once at creation and never mutated; revocation and
/// expiry change whether the record may be read, not what it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// 32 lowercase hex characters (128 bits of randomness).
    pub token: String,
    /// Self-describing, base64-encoded ciphertext blob.
    pub ciphertext: String,
    /// When the token was created.
    pub created_at: DateTime<Utc>,
    /// When the token stops being usable (None = never).
    pub expires_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: TokenStatus,
    /// Advisory counter of successful reads.
    pub usage_count: u64,
}

impl TokenRecord {
    /// Whether the record is past its expiry at `now`.
    ///
    /// A record stays usable while `expires_at > now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
