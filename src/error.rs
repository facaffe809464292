use thiserror::Error;

/// Error taxonomy for the Dexcom Share client.
///
/// The polling driver maps these onto user-visible states: configuration and
/// authentication failures need user action before another attempt makes
/// sense (the vendor rate-limits repeated bad logins), while network errors
/// and empty results are transient and only delay the next poll.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Missing or unusable configuration; never retried automatically.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid credentials or a malformed authentication response.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The vendor reported the session token as unknown. Handled internally
    /// by exactly one re-authenticate-and-retry cycle per fetch.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The vendor returned an empty reading set. Not fatal to the session.
    #[error("no glucose data available")]
    NoData,

    /// Non-2xx vendor response that is not a session-expiry condition.
    #[error("request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    /// A 2xx vendor response whose body violates the expected shape.
    #[error("malformed vendor payload: {0}")]
    Payload(String),

    /// Transport failure or timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ShareError {
    /// True for failures that require user action (credentials, settings)
    /// before polling again is worthwhile.
    pub fn needs_user_action(&self) -> bool {
        matches!(self, ShareError::Config(_) | ShareError::Auth(_))
    }
}
