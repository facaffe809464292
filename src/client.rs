use crate::config::{Config, Unit};
use crate::error::ShareError;
use crate::normalizer::{NormalizedReading, ReadingNormalizer};
use crate::share_api::ShareApi;

/// Session id the vendor returns for invalid credentials. Must never be
/// treated as a usable session.
const INVALID_SESSION_SENTINEL: &str = "00000000-0000-0000-0000-000000000000";

/// Default trailing window for the latest-reading query, in minutes.
const DEFAULT_WINDOW_MINUTES: u32 = 1440;

#[derive(Debug, Clone)]
struct Session {
    /// Stable per-account id from step one of the login protocol. Kept so
    /// a session refresh can skip the account lookup.
    account_id: String,
    session_id: String,
}

/// Dexcom Share glucose client: owns the authentication session and the
/// previous-reading state used for delta computation. One instance per
/// credential set; a credential, region or unit change means constructing a
/// fresh instance (which also resets delta state). Callers must not overlap
/// calls on the same instance.
pub struct GlucoseClient {
    api: ShareApi,
    username: String,
    password: String,
    unit: Unit,
    window_minutes: u32,
    session: Option<Session>,
    normalizer: ReadingNormalizer,
}

impl GlucoseClient {
    /// Builds a client from configuration. Fails with a `Config` error when
    /// username or password is missing.
    pub fn new(config: &Config) -> Result<Self, ShareError> {
        Self::with_base_url(config, config.region.base_url())
    }

    /// Like `new`, but against an explicit base URL instead of the regional
    /// vendor endpoint. Useful for Share-compatible proxies and tests.
    pub fn with_base_url(
        config: &Config,
        base_url: impl Into<String>,
    ) -> Result<Self, ShareError> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(ShareError::Config(
                "username and password are required".to_string(),
            ));
        }
        Ok(Self {
            api: ShareApi::new(base_url)?,
            username: config.username.clone(),
            password: config.password.clone(),
            unit: config.unit,
            window_minutes: DEFAULT_WINDOW_MINUTES,
            session: None,
            normalizer: ReadingNormalizer::new(),
        })
    }

    /// Runs the vendor's two-step login: account lookup, then login by
    /// account id. Returns the new session id. Any failure clears the
    /// session state before propagating.
    pub async fn authenticate(&mut self) -> Result<String, ShareError> {
        self.session = None;

        let account_id = self
            .api
            .authenticate_account(&self.username, &self.password)
            .await?;
        // A 200 whose body is a JSON object instead of a string means the
        // vendor answered with something other than an account id
        if account_id.is_empty() || account_id.starts_with('{') {
            return Err(ShareError::Auth(format!(
                "vendor returned an unusable account id: {account_id:?}"
            )));
        }

        let session_id = self
            .api
            .login_by_account_id(&account_id, &self.password)
            .await?;
        if session_id.is_empty() || session_id == INVALID_SESSION_SENTINEL {
            return Err(ShareError::Auth(
                "vendor rejected the credentials".to_string(),
            ));
        }

        println!("Authenticated against Dexcom Share, session established");
        self.session = Some(Session {
            account_id,
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    /// Fetches and normalizes the most recent glucose reading,
    /// authenticating first if no session exists. When the vendor reports
    /// the session as expired, the client re-authenticates and retries the
    /// fetch exactly once; the retry's outcome is surfaced as-is.
    pub async fn latest_glucose(&mut self) -> Result<NormalizedReading, ShareError> {
        if self.session.is_none() {
            self.authenticate().await?;
        }

        match self.fetch_once().await {
            Err(ShareError::SessionExpired(reason)) => {
                println!("Session expired ({reason}), re-authenticating once");
                match self.session.take() {
                    // The account id is stable, so a refresh only needs the
                    // login step
                    Some(session) => {
                        self.refresh_session(session.account_id).await?;
                    }
                    None => {
                        self.authenticate().await?;
                    }
                }
                self.fetch_once().await
            }
            other => other,
        }
    }

    /// Trades a known account id for a fresh session id without repeating
    /// the account lookup. Failures clear the session state and propagate.
    async fn refresh_session(&mut self, account_id: String) -> Result<String, ShareError> {
        self.session = None;

        let session_id = self
            .api
            .login_by_account_id(&account_id, &self.password)
            .await?;
        if session_id.is_empty() || session_id == INVALID_SESSION_SENTINEL {
            return Err(ShareError::Auth(
                "vendor rejected the credentials".to_string(),
            ));
        }

        self.session = Some(Session {
            account_id,
            session_id: session_id.clone(),
        });
        Ok(session_id)
    }

    async fn fetch_once(&mut self) -> Result<NormalizedReading, ShareError> {
        let session_id = self
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
            .ok_or_else(|| ShareError::Auth("no active session".to_string()))?;

        let readings = self
            .api
            .latest_glucose_values(&session_id, self.window_minutes, 1)
            .await?;
        let reading = readings.first().ok_or(ShareError::NoData)?;

        self.normalizer.normalize(reading, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Region, Thresholds};
    use crate::normalizer::Trend;
    use crate::share_api::APPLICATION_ID;
    use mockito::{Matcher, Server, ServerGuard};

    fn test_config(unit: Unit) -> Config {
        // Region is irrelevant once the base URL points at the mock server
        Config {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            region: Region::Ous,
            unit,
            poll_interval_secs: 180,
            thresholds: Thresholds::default(),
        }
    }

    fn client_for(server: &ServerGuard, unit: Unit) -> GlucoseClient {
        GlucoseClient::with_base_url(&test_config(unit), server.url()).unwrap()
    }

    fn mock_auth_account(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock(
                "POST",
                "/ShareWebServices/Services/General/AuthenticatePublisherAccount",
            )
            .match_body(Matcher::Json(serde_json::json!({
                "accountName": "alice",
                "password": "hunter2",
                "applicationId": APPLICATION_ID,
            })))
            .with_status(200)
            .with_body("\"account-123\"")
            .create()
    }

    fn mock_login(server: &mut ServerGuard, session_id: &str) -> mockito::Mock {
        server
            .mock(
                "POST",
                "/ShareWebServices/Services/General/LoginPublisherAccountById",
            )
            .match_body(Matcher::Json(serde_json::json!({
                "accountId": "account-123",
                "password": "hunter2",
                "applicationId": APPLICATION_ID,
            })))
            .with_status(200)
            .with_body(format!("\"{session_id}\""))
            .create()
    }

    fn mock_readings(server: &mut ServerGuard, session_id: &str, body: &str) -> mockito::Mock {
        server
            .mock(
                "GET",
                "/ShareWebServices/Services/Publisher/ReadPublisherLatestGlucoseValues",
            )
            .match_query(Matcher::UrlEncoded("sessionId".into(), session_id.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create()
    }

    #[tokio::test]
    async fn test_missing_credentials_is_a_config_error() {
        let mut config = test_config(Unit::MgDl);
        config.password = String::new();
        assert!(matches!(
            GlucoseClient::new(&config),
            Err(ShareError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_two_step_authentication() {
        let mut server = Server::new_async().await;
        let auth = mock_auth_account(&mut server);
        let login = mock_login(&mut server, "session-abc");

        let mut client = client_for(&server, Unit::MgDl);
        let session_id = client.authenticate().await.unwrap();

        assert_eq!(session_id, "session-abc");
        auth.assert();
        login.assert();
    }

    #[tokio::test]
    async fn test_all_zero_session_guid_is_an_auth_error() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);
        let _login = mock_login(&mut server, "00000000-0000-0000-0000-000000000000");

        let mut client = client_for(&server, Unit::MgDl);
        let result = client.authenticate().await;

        assert!(matches!(result, Err(ShareError::Auth(_))));
        assert!(client.session.is_none());
    }

    #[tokio::test]
    async fn test_empty_account_id_is_an_auth_error() {
        let mut server = Server::new_async().await;
        let _auth = server
            .mock(
                "POST",
                "/ShareWebServices/Services/General/AuthenticatePublisherAccount",
            )
            .with_status(200)
            .with_body("\"\"")
            .create();

        let mut client = client_for(&server, Unit::MgDl);
        let result = client.authenticate().await;

        assert!(matches!(result, Err(ShareError::Auth(_))));
    }

    #[tokio::test]
    async fn test_latest_glucose_authenticates_lazily() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);
        let _login = mock_login(&mut server, "session-abc");
        let readings = mock_readings(
            &mut server,
            "session-abc",
            r#"[{"Value":120,"Trend":"Flat","WT":"Date(1699999999000)"}]"#,
        );

        let mut client = client_for(&server, Unit::MgDl);
        let reading = client.latest_glucose().await.unwrap();

        assert_eq!(reading.value, "120");
        assert_eq!(reading.trend, Trend::Flat);
        readings.assert();
    }

    #[tokio::test]
    async fn test_empty_reading_array_is_no_data() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);
        let _login = mock_login(&mut server, "session-abc");
        let _readings = mock_readings(&mut server, "session-abc", "[]");

        let mut client = client_for(&server, Unit::MgDl);
        let result = client.latest_glucose().await;

        assert!(matches!(result, Err(ShareError::NoData)));
        // The session survives a no-data response
        assert!(client.session.is_some());
    }

    #[tokio::test]
    async fn test_non_array_reading_body_is_no_data() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);
        let _login = mock_login(&mut server, "session-abc");
        // The vendor sometimes answers 200 with an error object instead of
        // a reading array; that is "no data", not a malformed payload
        let _readings = mock_readings(&mut server, "session-abc", r#"{"Code":"InvalidArgument"}"#);

        let mut client = client_for(&server, Unit::MgDl);
        let result = client.latest_glucose().await;

        assert!(matches!(result, Err(ShareError::NoData)));
        assert!(client.session.is_some());
    }

    #[tokio::test]
    async fn test_session_expiry_triggers_one_retry() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);

        // First login hands out a session the reading endpoint rejects
        let first_login = mock_login(&mut server, "stale-session");
        let expired = server
            .mock(
                "GET",
                "/ShareWebServices/Services/Publisher/ReadPublisherLatestGlucoseValues",
            )
            .match_query(Matcher::UrlEncoded(
                "sessionId".into(),
                "stale-session".into(),
            ))
            .with_status(500)
            .with_body(r#"{"Code":"SessionIdNotFound","Message":"no such session"}"#)
            .create();

        let mut client = client_for(&server, Unit::MgDl);
        client.authenticate().await.unwrap();
        first_login.remove();

        // Re-authentication yields a fresh session that succeeds
        let _second_login = mock_login(&mut server, "fresh-session");
        let fresh = mock_readings(
            &mut server,
            "fresh-session",
            r#"[{"Value":95,"Trend":"Flat","WT":"Date(1699999999000)"}]"#,
        );

        let reading = client.latest_glucose().await.unwrap();

        assert_eq!(reading.value, "95");
        expired.assert();
        fresh.assert();
    }

    #[tokio::test]
    async fn test_session_refresh_skips_account_lookup() {
        let mut server = Server::new_async().await;
        // Exactly one account lookup: the refresh after expiry reuses the
        // stored account id and goes straight to the login step
        let auth = server
            .mock(
                "POST",
                "/ShareWebServices/Services/General/AuthenticatePublisherAccount",
            )
            .expect(1)
            .with_status(200)
            .with_body("\"account-123\"")
            .create();

        let stale_login = mock_login(&mut server, "stale-session");
        let expired = server
            .mock(
                "GET",
                "/ShareWebServices/Services/Publisher/ReadPublisherLatestGlucoseValues",
            )
            .match_query(Matcher::UrlEncoded(
                "sessionId".into(),
                "stale-session".into(),
            ))
            .with_status(500)
            .with_body(r#"{"Code":"SessionIdNotFound"}"#)
            .create();

        let mut client = client_for(&server, Unit::MgDl);
        client.authenticate().await.unwrap();
        stale_login.remove();

        let fresh_login = mock_login(&mut server, "fresh-session");
        let fresh = mock_readings(
            &mut server,
            "fresh-session",
            r#"[{"Value":110,"Trend":"Flat","WT":"Date(1699999999000)"}]"#,
        );

        let reading = client.latest_glucose().await.unwrap();

        assert_eq!(reading.value, "110");
        auth.assert();
        expired.assert();
        fresh_login.assert();
        fresh.assert();
    }

    #[tokio::test]
    async fn test_session_expiry_retry_failure_is_surfaced() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);
        let _login = mock_login(&mut server, "stale-session");
        // The reading endpoint keeps rejecting the session even after the
        // retry's re-authentication; the retry's own error must surface
        // instead of looping.
        let expired = server
            .mock(
                "GET",
                "/ShareWebServices/Services/Publisher/ReadPublisherLatestGlucoseValues",
            )
            .match_query(Matcher::Any)
            .expect(2)
            .with_status(500)
            .with_body(r#"{"Code":"SessionIdNotFound"}"#)
            .create();

        let mut client = client_for(&server, Unit::MgDl);
        let result = client.latest_glucose().await;

        assert!(matches!(result, Err(ShareError::SessionExpired(_))));
        expired.assert();
    }

    #[tokio::test]
    async fn test_delta_across_polls() {
        let mut server = Server::new_async().await;
        let _auth = mock_auth_account(&mut server);
        let _login = mock_login(&mut server, "session-abc");

        let first = mock_readings(
            &mut server,
            "session-abc",
            r#"[{"Value":100,"Trend":"Flat","WT":"Date(1000000000000)"}]"#,
        );
        let mut client = client_for(&server, Unit::MgDl);
        let reading = client.latest_glucose().await.unwrap();
        assert_eq!(reading.delta, "0.0");
        first.remove();

        // 5 minutes later the value dropped by 30
        let _second = mock_readings(
            &mut server,
            "session-abc",
            r#"[{"Value":70,"Trend":"Flat","WT":"Date(1000000300000)"}]"#,
        );
        let reading = client.latest_glucose().await.unwrap();
        assert_eq!(reading.delta, "-30.0");
        assert_eq!(reading.trend, Trend::SingleDown);
    }
}
