//! HTTP implementation of [`SyncBackend`].
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | `GET`  | `/api/worktrees` | [`WorktreeList`] |
//! | `POST` | `/api/worktrees` | [`WorktreeInfo`] |
//! | `GET`  | `/api/worktrees/{id}/snapshot` | [`SessionSnapshot`] |
//! | `GET`  | `/api/worktrees/{id}/messages?since={cursor}` | [`ReplayBatch`] |
//!
//! A `404`/`410` replay answer whose body carries
//! [`REPLAY_CURSOR_NOT_FOUND`] becomes
//! [`SyncError::ReplayGap`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tether_core::{ItemId, SessionId, SyncError};
use tether_protocol::{
    ApiErrorBody, CreateWorktreeRequest, REPLAY_CURSOR_NOT_FOUND, ReplayBatch, SessionSnapshot,
    WorktreeInfo, WorktreeList,
};
use tether_sync::SyncBackend;
use tracing::{debug, instrument};

use crate::error::TransportError;

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`SyncBackend`] over the server's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpSyncBackend {
    client: Client,
    base_url: Url,
}

impl HttpSyncBackend {
    /// Backend for `base_url` with a default client.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_client(client, base_url)
    }

    /// Backend for `base_url` using an existing client.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_owned(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl {
                url: base_url.to_owned(),
                reason: "cannot be a base URL".into(),
            });
        }
        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// The configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        let _ = url
            .path_segments_mut()
            .map_err(|()| TransportError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "cannot be a base URL".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, TransportError> {
        let response = self.client.get(url).send().await?;
        decode(response).await
    }
}

/// Decode a success body, or turn an error status into [`TransportError::Status`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let status = response.status();
    if status.is_success() {
        let bytes = response.bytes().await?;
        return Ok(serde_json::from_slice(&bytes)?);
    }
    let body = response.text().await.unwrap_or_default();
    let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned());
    Err(TransportError::Status {
        status: status.as_u16(),
        code: parsed.code,
        message,
    })
}

fn is_replay_gap(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::Status { status, code: Some(code), .. }
            if (*status == StatusCode::NOT_FOUND.as_u16() || *status == StatusCode::GONE.as_u16())
                && code == REPLAY_CURSOR_NOT_FOUND
    )
}

#[async_trait]
impl SyncBackend for HttpSyncBackend {
    #[instrument(skip_all)]
    async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, SyncError> {
        let url = self.endpoint(&["api", "worktrees"])?;
        let list: WorktreeList = self.get_json(url).await?;
        debug!(count = list.worktrees.len(), "session list fetched");
        Ok(list.worktrees)
    }

    #[instrument(skip_all)]
    async fn create_worktree(
        &self,
        request: &CreateWorktreeRequest,
    ) -> Result<WorktreeInfo, SyncError> {
        let url = self.endpoint(&["api", "worktrees"])?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(TransportError::from)?;
        Ok(decode(response).await?)
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn fetch_snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot, SyncError> {
        let url = self.endpoint(&["api", "worktrees", session_id.as_str(), "snapshot"])?;
        let snapshot: SessionSnapshot = self.get_json(url).await?;
        debug!(messages = snapshot.messages.len(), "snapshot fetched");
        Ok(snapshot)
    }

    #[instrument(skip_all, fields(session_id = %session_id, cursor = %since))]
    async fn fetch_replay(
        &self,
        session_id: &SessionId,
        since: &ItemId,
    ) -> Result<ReplayBatch, SyncError> {
        let mut url = self.endpoint(&["api", "worktrees", session_id.as_str(), "messages"])?;
        let _ = url.query_pairs_mut().append_pair("since", since.as_str());
        match self.get_json::<ReplayBatch>(url).await {
            Ok(batch) => {
                debug!(messages = batch.messages.len(), "replay fetched");
                Ok(batch)
            }
            Err(error) if is_replay_gap(&error) => Err(SyncError::ReplayGap {
                session_id: session_id.clone(),
                cursor: since.clone(),
            }),
            Err(error) => Err(error.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
