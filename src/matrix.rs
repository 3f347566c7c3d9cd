//! Matrix client-server API surface
//!
//! Thin typed client over the handful of endpoints the router needs:
//! room/space creation, invites, space-child links, message sends, and the
//! whoami credential probe. All calls carry bearer auth and share one uniform
//! request timeout.
//!
//! Retry policy: idempotent calls (the `m.space.child` state PUT, whoami) get
//! one bounded retry with a short backoff. `createRoom` and invites are never
//! retried; message sends rely on the client transaction id instead.
//!
//! `MatrixApi` is the seam the rest of the stack programs against, so tests
//! run the full router against an in-memory fake.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Errors from the Matrix surface
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {}", .errcode.as_deref().unwrap_or("unknown error"))]
    Status {
        endpoint: String,
        status: u16,
        errcode: Option<String>,
    },

    #[error("unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
}

impl MatrixError {
    /// Transient failures are worth one more attempt; client errors are not.
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// A homeserver plus the bearer credential to use against it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeserverTarget {
    pub homeserver: String,
    pub access_token: String,
}

/// Body for `POST /createRoom`
#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub topic: String,
    pub preset: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub initial_state: Vec<StateEvent>,
}

impl CreateRoomRequest {
    /// True if this request creates a space rather than an ordinary room
    pub fn is_space(&self) -> bool {
        self.creation_content
            .as_ref()
            .and_then(|c| c.get("type"))
            .and_then(|t| t.as_str())
            == Some("m.space")
    }
}

/// One entry of `initial_state`
#[derive(Debug, Clone, Serialize)]
pub struct StateEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_key: String,
    pub content: serde_json::Value,
}

/// Body for `m.room.message` sends
#[derive(Debug, Clone, Serialize)]
pub struct MessageContent {
    pub msgtype: &'static str,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateRoomResponse {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct WhoamiResponse {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    errcode: Option<String>,
    error: Option<String>,
}

/// The Matrix operations the router stack depends on
#[async_trait]
pub trait MatrixApi: Send + Sync {
    /// `POST /createRoom`, returns the new room id
    async fn create_room(
        &self,
        target: &HomeserverTarget,
        request: &CreateRoomRequest,
    ) -> Result<String, MatrixError>;

    /// `POST /rooms/{room}/invite`
    async fn invite_user(
        &self,
        target: &HomeserverTarget,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), MatrixError>;

    /// `PUT /rooms/{parent}/state/m.space.child/{child}`. Idempotent:
    /// re-asserting an existing link is a no-op on the server.
    async fn set_space_child(
        &self,
        target: &HomeserverTarget,
        parent_id: &str,
        child_id: &str,
        order: &str,
    ) -> Result<(), MatrixError>;

    /// `PUT /rooms/{room}/send/m.room.message/{txn_id}`, returns the event id
    async fn send_message(
        &self,
        target: &HomeserverTarget,
        room_id: &str,
        txn_id: &str,
        content: &MessageContent,
    ) -> Result<String, MatrixError>;

    /// `GET /account/whoami`, returns the authenticated user id
    async fn whoami(&self, target: &HomeserverTarget) -> Result<String, MatrixError>;
}

/// reqwest-backed `MatrixApi` implementation
#[derive(Clone)]
pub struct MatrixClient {
    client: Client,
}

impl MatrixClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn url(target: &HomeserverTarget, path: &str) -> String {
        format!(
            "{}/_matrix/client/v3/{}",
            target.homeserver.trim_end_matches('/'),
            path
        )
    }

    async fn check<R: DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<R, MatrixError> {
        let status = response.status();
        if status.is_success() {
            response.json::<R>().await.map_err(|e| MatrixError::Decode {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })
        } else {
            let errcode = response
                .json::<MatrixErrorBody>()
                .await
                .ok()
                .map(|b| {
                    match (b.errcode, b.error) {
                        (Some(code), Some(msg)) => format!("{code}: {msg}"),
                        (Some(code), None) => code,
                        (None, Some(msg)) => msg,
                        (None, None) => "unknown error".to_string(),
                    }
                });
            Err(MatrixError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                errcode,
            })
        }
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        target: &HomeserverTarget,
        path: &str,
        body: &B,
    ) -> Result<R, MatrixError> {
        let url = Self::url(target, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&target.access_token)
            .json(body)
            .send()
            .await
            .map_err(|source| MatrixError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        Self::check(path, response).await
    }

    async fn put_json<B: Serialize, R: DeserializeOwned>(
        &self,
        target: &HomeserverTarget,
        path: &str,
        body: &B,
    ) -> Result<R, MatrixError> {
        let url = Self::url(target, path);
        let response = self
            .client
            .put(&url)
            .bearer_auth(&target.access_token)
            .json(body)
            .send()
            .await
            .map_err(|source| MatrixError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        Self::check(path, response).await
    }
}

#[async_trait]
impl MatrixApi for MatrixClient {
    async fn create_room(
        &self,
        target: &HomeserverTarget,
        request: &CreateRoomRequest,
    ) -> Result<String, MatrixError> {
        let response: CreateRoomResponse =
            self.post_json(target, "createRoom", request).await?;
        debug!("Created room {} ({})", response.room_id, request.name);
        Ok(response.room_id)
    }

    async fn invite_user(
        &self,
        target: &HomeserverTarget,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), MatrixError> {
        let path = format!("rooms/{room_id}/invite");
        let body = serde_json::json!({ "user_id": user_id });
        let _: serde_json::Value = self.post_json(target, &path, &body).await?;
        Ok(())
    }

    async fn set_space_child(
        &self,
        target: &HomeserverTarget,
        parent_id: &str,
        child_id: &str,
        order: &str,
    ) -> Result<(), MatrixError> {
        let path = format!("rooms/{parent_id}/state/m.space.child/{child_id}");
        let body = serde_json::json!({ "via": ["localhost"], "order": order });
        let mut attempt = 1;
        loop {
            match self.put_json::<_, serde_json::Value>(target, &path, &body).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < RETRY_ATTEMPTS && e.is_retryable() => {
                    debug!("Retrying {} after failure: {}", path, e);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_message(
        &self,
        target: &HomeserverTarget,
        room_id: &str,
        txn_id: &str,
        content: &MessageContent,
    ) -> Result<String, MatrixError> {
        let path = format!("rooms/{room_id}/send/m.room.message/{txn_id}");
        let response: SendResponse = self.put_json(target, &path, content).await?;
        Ok(response.event_id)
    }

    async fn whoami(&self, target: &HomeserverTarget) -> Result<String, MatrixError> {
        let endpoint = "account/whoami";
        let url = Self::url(target, endpoint);
        let mut attempt = 1;
        loop {
            let result: Result<String, MatrixError> = async {
                let response = self
                    .client
                    .get(&url)
                    .bearer_auth(&target.access_token)
                    .send()
                    .await
                    .map_err(|source| MatrixError::Transport {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                let body: WhoamiResponse = Self::check(endpoint, response).await?;
                Ok(body.user_id)
            }
            .await;
            match result {
                Ok(user_id) => return Ok(user_id),
                Err(e) if attempt < RETRY_ATTEMPTS && e.is_retryable() => {
                    debug!("Retrying {} after failure: {}", endpoint, e);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("whoami against {} failed: {}", target.homeserver, e);
                    return Err(e);
                }
            }
        }
    }
}
