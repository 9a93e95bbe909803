use crate::domain::models::{BlockedDomain, FocusSession, TimerSettings};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use url::Url;

/// Fields the desktop backend is allowed to change on a session. Serialized
/// with only the populated keys, matching the server's partial-update route.
#[derive(Debug, Clone, Default, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pomodoros_completed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_focus_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_interrupted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption_reason: Option<String>,
}

/// Contract with the FocusFlow REST server. Storage, auth and the CRUD
/// routes live on the server side; the backend only consumes them.
#[async_trait]
pub trait FocusApiClient: Send + Sync {
    async fn list_blocked_sites(&self, auth_token: &str)
        -> Result<Vec<BlockedDomain>, InfraError>;

    async fn list_sessions(&self, auth_token: &str) -> Result<Vec<FocusSession>, InfraError>;

    async fn fetch_timer_settings(
        &self,
        auth_token: &str,
    ) -> Result<Option<TimerSettings>, InfraError>;

    async fn create_session(
        &self,
        auth_token: &str,
        name: &str,
        start_time: DateTime<Utc>,
    ) -> Result<FocusSession, InfraError>;

    async fn update_session(
        &self,
        auth_token: &str,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<FocusSession, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFocusApiClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    name: &'a str,
    start_time: String,
}

impl ReqwestFocusApiClient {
    pub fn new(base_url: Url) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Api(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn api_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return InfraError::Unauthorized;
        }
        let message = if body.trim().is_empty() {
            format!("focusflow api error: http {}", status.as_u16())
        } else {
            format!("focusflow api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Api(message)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| InfraError::Api("api base URL cannot be a base".to_string()))?;
            parts.pop_if_empty();
            parts.extend(segments);
        }
        Ok(url)
    }

    async fn read_body(
        response: reqwest::Response,
        context: &str,
    ) -> Result<(reqwest::StatusCode, String), InfraError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Api(format!("failed reading {context} response: {error}")))?;
        Ok((status, body))
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str, context: &str) -> Result<T, InfraError> {
        serde_json::from_str(body)
            .map_err(|error| InfraError::Api(format!("invalid {context} payload: {error}; body={body}")))
    }
}

#[async_trait]
impl FocusApiClient for ReqwestFocusApiClient {
    async fn list_blocked_sites(
        &self,
        auth_token: &str,
    ) -> Result<Vec<BlockedDomain>, InfraError> {
        Self::ensure_non_empty(auth_token, "auth token")?;

        let endpoint = self.endpoint(&["api", "blocked-sites"])?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(auth_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while listing blocked sites: {error}"))
            })?;

        let (status, body) = Self::read_body(response, "blocked sites").await?;
        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }
        Self::decode(&body, "blocked sites")
    }

    async fn list_sessions(&self, auth_token: &str) -> Result<Vec<FocusSession>, InfraError> {
        Self::ensure_non_empty(auth_token, "auth token")?;

        let endpoint = self.endpoint(&["api", "sessions"])?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(auth_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while listing sessions: {error}"))
            })?;

        let (status, body) = Self::read_body(response, "sessions").await?;
        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }
        Self::decode(&body, "sessions")
    }

    async fn fetch_timer_settings(
        &self,
        auth_token: &str,
    ) -> Result<Option<TimerSettings>, InfraError> {
        Self::ensure_non_empty(auth_token, "auth token")?;

        let endpoint = self.endpoint(&["api", "timer-settings"])?;
        let response = self
            .client
            .get(endpoint)
            .bearer_auth(auth_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while fetching timer settings: {error}"))
            })?;

        let (status, body) = Self::read_body(response, "timer settings").await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }
        Self::decode(&body, "timer settings").map(Some)
    }

    async fn create_session(
        &self,
        auth_token: &str,
        name: &str,
        start_time: DateTime<Utc>,
    ) -> Result<FocusSession, InfraError> {
        Self::ensure_non_empty(auth_token, "auth token")?;
        Self::ensure_non_empty(name, "session name")?;

        let endpoint = self.endpoint(&["api", "sessions"])?;
        let request = CreateSessionRequest {
            name: name.trim(),
            start_time: start_time.to_rfc3339(),
        };
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(auth_token)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while creating session: {error}"))
            })?;

        let (status, body) = Self::read_body(response, "session create").await?;
        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }
        Self::decode(&body, "session create")
    }

    async fn update_session(
        &self,
        auth_token: &str,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<FocusSession, InfraError> {
        Self::ensure_non_empty(auth_token, "auth token")?;

        let endpoint = self.endpoint(&["api", "sessions", &session_id.to_string()])?;
        let response = self
            .client
            .put(endpoint)
            .bearer_auth(auth_token)
            .json(update)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while updating session: {error}"))
            })?;

        let (status, body) = Self::read_body(response, "session update").await?;
        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }
        Self::decode(&body, "session update")
    }
}
