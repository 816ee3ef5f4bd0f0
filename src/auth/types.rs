// Authentication types

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Store key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key for the token type (auth scheme, e.g. "Bearer")
pub const TOKEN_TYPE_KEY: &str = "token_type";

/// Store key for the absolute expiry, persisted as epoch milliseconds
pub const EXPIRES_KEY: &str = "expires_in";

/// Store key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Every key that belongs to the token set
pub const TOKEN_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    TOKEN_TYPE_KEY,
    EXPIRES_KEY,
    REFRESH_TOKEN_KEY,
];

/// Cached session entries that live next to the token set
pub const SESSION_ENTRY_KEYS: [&str; 6] = [
    "TOKEN",
    "USER_INFO",
    "MENU",
    "PERMISSIONS",
    "APP_LANG",
    "grid",
];

/// Session entry holding the user's selected language
pub const LANG_KEY: &str = "APP_LANG";

/// Complete credential set
///
/// Either all four fields exist or there is no token set at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
}

impl TokenSet {
    /// Value for the authorization header: "<token type> <access token>"
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Serialize into store entries, one per token key
    pub fn to_entries(&self) -> [(&'static str, String); 4] {
        [
            (ACCESS_TOKEN_KEY, self.access_token.clone()),
            (TOKEN_TYPE_KEY, self.token_type.clone()),
            (EXPIRES_KEY, self.expires_at.timestamp_millis().to_string()),
            (REFRESH_TOKEN_KEY, self.refresh_token.clone()),
        ]
    }

    /// Rebuild from raw store values. Returns None unless all four are usable.
    pub fn from_entries(
        access_token: Option<String>,
        token_type: Option<String>,
        expires: Option<String>,
        refresh_token: Option<String>,
    ) -> Option<Self> {
        let expires_at = expires
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())?;

        Some(Self {
            access_token: access_token?,
            token_type: token_type?,
            expires_at,
            refresh_token: refresh_token?,
        })
    }
}

/// Refresh request body
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh response payload
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub token_type: String,
}

impl RefreshResponse {
    /// First field that is empty or unusable, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.access_token.is_empty() {
            Some(ACCESS_TOKEN_KEY)
        } else if self.token_type.is_empty() {
            Some(TOKEN_TYPE_KEY)
        } else if self.expires_in <= 0 {
            Some(EXPIRES_KEY)
        } else if self.refresh_token.is_empty() {
            Some(REFRESH_TOKEN_KEY)
        } else {
            None
        }
    }

    /// Convert into a token set expiring `expires_in` seconds after `issued_at`
    pub fn into_token_set(self, issued_at: DateTime<Utc>) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            token_type: self.token_type,
            expires_at: issued_at + Duration::seconds(self.expires_in),
            refresh_token: self.refresh_token,
        }
    }
}

/// The backend wraps most payloads in `{"message": ...}`; accept both shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RefreshEnvelope {
    Wrapped { message: RefreshResponse },
    Bare(RefreshResponse),
}

impl RefreshEnvelope {
    pub fn into_inner(self) -> RefreshResponse {
        match self {
            RefreshEnvelope::Wrapped { message } => message,
            RefreshEnvelope::Bare(response) => response,
        }
    }
}
