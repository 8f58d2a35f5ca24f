//! Remote sync client for the Supabase-style backend.
//!
//! Stateless calls taking the access token explicitly; nothing is cached
//! here. Failures keep the HTTP status and response body so the coordinator
//! can classify auth expiry against everything else without catching
//! transport exceptions.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EventId, Session, SyncState, VoidingEvent};

/// Per-call deadline so a hung request cannot stall a whole drain
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {message} ({status})")]
    Api { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Whether this failure means the bearer credential is no longer valid.
    ///
    /// PostgREST reports an expired JWT either as a plain 401 or with the
    /// `PGRST303` error code in the body.
    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::Api { status, message } => {
                *status == StatusCode::UNAUTHORIZED.as_u16() || {
                    let lowered = message.to_lowercase();
                    lowered.contains("jwt expired") || lowered.contains("pgrst303")
                }
            }
            _ => false,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Wire representation of one event row.
///
/// `id` is the client-generated identity and doubles as the remote conflict
/// key; `client_ref` repeats it for backend-side audit queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEventDto {
    pub id: String,
    pub user_id: String,
    pub voided_at: String,
    pub local_date: String,
    pub client_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl RemoteEventDto {
    /// Build the upload payload for a local event
    pub fn from_event(event: &VoidingEvent) -> RemoteResult<Self> {
        Ok(Self {
            id: event.id.as_str(),
            user_id: event.owner_id.clone(),
            voided_at: iso_from_millis(event.occurred_at)?,
            local_date: event.local_date.to_string(),
            client_ref: event.id.as_str(),
            deleted_at: None,
            memo: event.memo.clone(),
        })
    }

    /// Interpret a fetched row as a locally synced event
    pub fn into_event(self) -> RemoteResult<VoidingEvent> {
        let id = EventId::from_str(&self.id)
            .map_err(|e| RemoteError::InvalidPayload(format!("id {}: {e}", self.id)))?;
        let occurred_at = millis_from_iso(&self.voided_at)?;
        let local_date = chrono::NaiveDate::from_str(&self.local_date).map_err(|e| {
            RemoteError::InvalidPayload(format!("local_date {}: {e}", self.local_date))
        })?;
        let updated_at = match &self.deleted_at {
            Some(deleted_at) => millis_from_iso(deleted_at)?,
            None => occurred_at,
        };

        Ok(VoidingEvent {
            id,
            owner_id: self.user_id,
            occurred_at,
            local_date,
            deleted: self.deleted_at.is_some(),
            sync_state: SyncState::Synced,
            updated_at,
            memo: self.memo,
        })
    }
}

/// Remote operations the coordinator drives, mockable at the trait seam
pub trait RemoteApi: Send + Sync + 'static {
    /// Idempotent create: the backend merges on conflict by id, so resending
    /// the same event is safe
    fn upsert_event(
        &self,
        access_token: &str,
        event: &RemoteEventDto,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Soft delete: sends only `deleted_at` and never resurrects a row
    fn soft_delete_event(
        &self,
        access_token: &str,
        id: &EventId,
        owner_id: &str,
        deleted_at_iso: &str,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Full snapshot of the owner's rows, for new-device reconciliation
    fn fetch_all_for_owner(
        &self,
        access_token: &str,
        owner_id: &str,
    ) -> impl Future<Output = RemoteResult<Vec<RemoteEventDto>>> + Send;
}

/// Supabase REST client for the `voiding_events` table
#[derive(Clone)]
pub struct SupabaseSyncApi {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl SupabaseSyncApi {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "anon key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            anon_key,
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }

    /// Exchange a refresh token for a fresh session
    pub async fn refresh_session(&self, refresh_token: &str) -> RemoteResult<Session> {
        if refresh_token.trim().is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "refresh token must not be empty".to_string(),
            ));
        }

        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let response = check_status(response).await?;

        let payload = response.json::<RefreshResponse>().await?;
        payload.try_into()
    }
}

impl RemoteApi for SupabaseSyncApi {
    async fn upsert_event(&self, access_token: &str, event: &RemoteEventDto) -> RemoteResult<()> {
        let response = self
            .client
            .post(format!("{}/rest/v1/voiding_events", self.base_url))
            .query(&[("on_conflict", "id")])
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[event])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn soft_delete_event(
        &self,
        access_token: &str,
        id: &EventId,
        owner_id: &str,
        deleted_at_iso: &str,
    ) -> RemoteResult<()> {
        let response = self
            .client
            .patch(format!("{}/rest/v1/voiding_events", self.base_url))
            .query(&[
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{}", urlencoding::encode(owner_id))),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "deleted_at": deleted_at_iso }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_all_for_owner(
        &self,
        access_token: &str,
        owner_id: &str,
    ) -> RemoteResult<Vec<RemoteEventDto>> {
        let response = self
            .client
            .get(format!("{}/rest/v1/voiding_events", self.base_url))
            .query(&[
                ("user_id", format!("eq.{}", urlencoding::encode(owner_id))),
                ("select", "*".to_string()),
            ])
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(response.json::<Vec<RemoteEventDto>>().await?)
    }
}

async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<RefreshUser>,
}

#[derive(Debug, Deserialize)]
struct RefreshUser {
    id: String,
}

impl TryFrom<RefreshResponse> for Session {
    type Error = RemoteError;

    fn try_from(value: RefreshResponse) -> RemoteResult<Self> {
        match (value.access_token, value.refresh_token, value.user) {
            (Some(access_token), Some(refresh_token), Some(user)) => Ok(Self {
                user_id: user.id,
                access_token,
                refresh_token,
            }),
            _ => Err(RemoteError::InvalidPayload(
                "refresh response did not include a full session".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
    code: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        let code = payload.code;
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return match code {
                Some(code) => format!("{code}: {}", message.trim()),
                None => message.trim().to_string(),
            };
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.to_string()
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "base URL must not be empty".to_string(),
        ));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

pub(crate) fn iso_from_millis(millis: i64) -> RemoteResult<String> {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|instant| instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .ok_or_else(|| RemoteError::InvalidPayload(format!("timestamp out of range: {millis}")))
}

fn millis_from_iso(iso: &str) -> RemoteResult<i64> {
    chrono::DateTime::parse_from_rfc3339(iso)
        .map(|instant| instant.timestamp_millis())
        .map_err(|e| RemoteError::InvalidPayload(format!("timestamp {iso}: {e}")))
}
