use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

/// OAuth client identity used for the refresh-token grant.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<REDACTED>")
            .finish()
    }
}

/// Access/refresh pair as persisted for one external-account scope.
#[derive(Clone)]
pub struct TokenPair {
    pub access_token: Zeroizing<String>,
    pub refresh_token: Zeroizing<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    /// A token with no known expiry counts as expired.
    pub fn expires_within(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - buffer <= now,
            None => true,
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<REDACTED>")
            .field("refresh_token", &"<REDACTED>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Tokens returned by the provider's refresh-token grant.
#[derive(Clone)]
pub struct RefreshedTokens {
    pub access_token: Zeroizing<String>,
    pub refresh_token: Zeroizing<String>,
    pub expires_in_secs: i64,
}

impl RefreshedTokens {
    pub fn into_pair(self, now: DateTime<Utc>) -> TokenPair {
        TokenPair {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Some(now + Duration::seconds(self.expires_in_secs)),
        }
    }
}
