//! REST Remote Client
//!
//! [`RemoteStore`] implementation against a plain REST backend. Push
//! notifications are approximated by polling the workspace change log,
//! which is the degraded-but-acceptable substitute for a realtime channel.
//!
//! # Endpoints
//!
//! - `GET  /api/session` — current session, `404` when unauthenticated
//! - `POST /api/workspaces` — resolve-or-create for an owner (idempotent)
//! - `GET  /api/workspaces/{ws}/records/{owner}` — fetch, `404` when absent
//! - `PUT  /api/workspaces/{ws}/records/{owner}` — upsert, echoes the
//!   server-assigned revision and timestamp
//! - `GET  /api/workspaces/{ws}/changes?after={cursor}` — change log page
//!
//! Every request carries the configured timeout; expiry and any transport
//! fault surface as [`SyncError::RemoteUnavailable`]. A response body that
//! fails to parse surfaces as [`SyncError::MalformedDocument`] so the engine
//! can skip the download without overwriting local data.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::document::Payload;
use crate::error::{Result, SyncError};
use crate::remote::{
    ChangeFeed, ChangeNotice, OwnerId, RemoteRecord, RemoteStore, Session, UpsertOutcome,
    WorkspaceId,
};

#[derive(Debug, Deserialize)]
struct SessionDto {
    owner_id: OwnerId,
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolveWorkspaceRequest {
    owner_id: OwnerId,
}

#[derive(Debug, Deserialize)]
struct ResolveWorkspaceResponse {
    workspace_id: WorkspaceId,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    payload: &'a Payload,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    stored_revision: i64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ChangePage {
    cursor: i64,
    notices: Vec<ChangeDto>,
}

#[derive(Debug, Deserialize)]
struct ChangeDto {
    writer: OwnerId,
}

/// REST-backed remote store
#[derive(Debug, Clone)]
pub struct RestRemote {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl RestRemote {
    /// Build a client for the given backend, with a bounded per-request
    /// timeout and the poll interval for the change feed
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::remote(format!("client init: {}", e)))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client,
            base_url,
            poll_interval,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::remote(format!("read body: {}", e)))?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::malformed(format!("response body: {}", e)))
    }

    fn transport_error(err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::remote("request timed out")
        } else {
            SyncError::remote(format!("network error: {}", err))
        }
    }

    fn status_error(status: StatusCode) -> SyncError {
        SyncError::remote(format!("backend returned {}", status))
    }

    /// One page of the change log; used by the polling driver
    async fn fetch_changes(&self, workspace: WorkspaceId, after: i64) -> Result<ChangePage> {
        let url = self.api_url(&format!("/api/workspaces/{}/changes", workspace));
        let response = self
            .client
            .get(&url)
            .query(&[("after", after)])
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }
        Self::parse_json(response).await
    }
}

#[async_trait::async_trait]
impl RemoteStore for RestRemote {
    async fn get_session(&self) -> Result<Option<Session>> {
        let url = self.api_url("/api/session");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let dto: SessionDto = Self::parse_json(response).await?;
                Ok(Some(Session {
                    owner_id: dto.owner_id,
                    email: dto.email,
                }))
            }
            status => Err(Self::status_error(status)),
        }
    }

    async fn resolve_or_create_workspace(&self, owner: OwnerId) -> Result<WorkspaceId> {
        let url = self.api_url("/api/workspaces");
        let response = self
            .client
            .post(&url)
            .json(&ResolveWorkspaceRequest { owner_id: owner })
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }
        let dto: ResolveWorkspaceResponse = Self::parse_json(response).await?;
        Ok(dto.workspace_id)
    }

    async fn fetch_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
    ) -> Result<Option<RemoteRecord>> {
        let url = self.api_url(&format!("/api/workspaces/{}/records/{}", workspace, owner));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record: RemoteRecord = Self::parse_json(response).await?;
                Ok(Some(record))
            }
            status => Err(Self::status_error(status)),
        }
    }

    async fn upsert_record(
        &self,
        workspace: WorkspaceId,
        owner: OwnerId,
        payload: &Payload,
    ) -> Result<UpsertOutcome> {
        let url = self.api_url(&format!("/api/workspaces/{}/records/{}", workspace, owner));
        let response = self
            .client
            .put(&url)
            .json(&UpsertRequest { payload })
            .send()
            .await
            .map_err(Self::transport_error)?;
        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }
        let dto: UpsertResponse = Self::parse_json(response).await?;
        Ok(UpsertOutcome {
            stored_revision: dto.stored_revision,
            updated_at: dto.updated_at,
        })
    }

    async fn subscribe(&self, workspace: WorkspaceId) -> Result<ChangeFeed> {
        // Prime the cursor so only changes after subscription are delivered
        let initial = self.fetch_changes(workspace, 0).await?;
        let mut cursor = initial.cursor;

        let client = self.clone();
        let (tx, notices) = mpsc::channel(16);
        let poll_interval = self.poll_interval;

        let driver = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match client.fetch_changes(workspace, cursor).await {
                    Ok(page) => {
                        cursor = cursor.max(page.cursor);
                        for change in page.notices {
                            let notice = ChangeNotice {
                                workspace_id: workspace,
                                writer: change.writer,
                            };
                            if tx.send(notice).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // Best-effort feed: keep polling through outages
                        tracing::debug!("change poll failed: {}", e);
                    }
                }
            }
        });

        Ok(ChangeFeed::new(notices, driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        let remote = RestRemote::new(
            "http://127.0.0.1:3000///",
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(remote.api_url("/api/session"), "http://127.0.0.1:3000/api/session");
    }
}
