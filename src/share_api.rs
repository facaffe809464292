use crate::error::ShareError;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// Vendor-issued application id. Fixed, required by every Share endpoint.
pub const APPLICATION_ID: &str = "d89443d2-327c-4a6f-89e5-496bbb0317db";

/// The Share service rejects unrecognized agents in some deployments, so we
/// identify as the official mobile client.
pub const USER_AGENT: &str = "Dexcom Share/3.0.2.11";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const AUTHENTICATE_PATH: &str = "/ShareWebServices/Services/General/AuthenticatePublisherAccount";
const LOGIN_PATH: &str = "/ShareWebServices/Services/General/LoginPublisherAccountById";
const LATEST_GLUCOSE_PATH: &str =
    "/ShareWebServices/Services/Publisher/ReadPublisherLatestGlucoseValues";

/// One glucose reading as the vendor sends it. Unknown extra fields
/// (ST, DT, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Glucose value, always mg/dL on the wire.
    #[serde(rename = "Value")]
    pub value: i32,
    /// Trend token. The vendor has shipped both string names ("Flat",
    /// "FortyFiveDown") and numeric codes (0-9) here.
    #[serde(rename = "Trend", default)]
    pub trend: Option<TrendToken>,
    /// Wall-clock timestamp string embedding a Unix epoch in milliseconds,
    /// e.g. `"Date(1699999999000)"`.
    #[serde(rename = "WT")]
    pub wt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrendToken {
    Code(u8),
    Name(String),
}

/// Low-level transport for the three Dexcom Share endpoints. Holds one
/// reqwest client with a fixed per-request timeout; all session handling
/// lives a layer up in `GlucoseClient`.
pub struct ShareApi {
    base_url: String,
    client: reqwest::Client,
}

impl ShareApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ShareError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Step one of the login protocol: resolve the account name to an
    /// opaque account id.
    pub async fn authenticate_account(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, ShareError> {
        let payload = serde_json::json!({
            "accountName": username,
            "password": password,
            "applicationId": APPLICATION_ID,
        });
        self.post_for_string(AUTHENTICATE_PATH, &payload).await
    }

    /// Step two: trade the account id for a session id.
    pub async fn login_by_account_id(
        &self,
        account_id: &str,
        password: &str,
    ) -> Result<String, ShareError> {
        let payload = serde_json::json!({
            "accountId": account_id,
            "password": password,
            "applicationId": APPLICATION_ID,
        });
        self.post_for_string(LOGIN_PATH, &payload).await
    }

    /// Fetches the most recent readings over a trailing window of `minutes`,
    /// capped at `max_count` results. An empty array means no data.
    pub async fn latest_glucose_values(
        &self,
        session_id: &str,
        minutes: u32,
        max_count: u32,
    ) -> Result<Vec<RawReading>, ShareError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, LATEST_GLUCOSE_PATH))
            .query(&[
                ("sessionId", session_id.to_string()),
                ("minutes", minutes.to_string()),
                ("maxCount", max_count.to_string()),
            ])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(classify_failure(status, body));
        }

        // A 2xx body that is not a JSON array counts as "no data", same as
        // an empty array; only entries inside an array can be malformed
        let entries = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Array(entries)) => entries,
            _ => return Err(ShareError::NoData),
        };
        entries
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<RawReading>, _>>()
            .map_err(|e| ShareError::Payload(format!("malformed reading entry ({e}): {body}")))
    }

    /// POSTs a JSON payload and returns the response body as an unquoted
    /// string. The Share service answers these endpoints with a bare JSON
    /// string literal (or occasionally plain text), never an object.
    async fn post_for_string(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ShareError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(classify_failure(status, body));
        }
        Ok(unquote(&body))
    }
}

/// Maps a non-2xx vendor response onto the error taxonomy. The Share
/// service reports expired sessions and credential problems inside the
/// error body rather than with dedicated status codes.
fn classify_failure(status: u16, body: String) -> ShareError {
    if body.contains("SessionIdNotFound") || body.contains("SessionNotValid") {
        ShareError::SessionExpired(body)
    } else if body.contains("AccountPasswordInvalid")
        || body.contains("SSO_AuthenticatePasswordInvalid")
        || body.contains("SSO_AuthenticateAccountNotFound")
        || body.contains("SSO_AuthenticateMaxAttemptsExceeed")
    {
        ShareError::Auth(body)
    } else {
        ShareError::Http { status, body }
    }
}

/// Unwraps a JSON string literal, falling back to stripping one pair of
/// surrounding quotes from plain text.
fn unquote(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<String>(body.trim()) {
        return parsed;
    }
    body.trim().trim_matches('"').to_string()
}
