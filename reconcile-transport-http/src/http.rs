//! `reqwest`-backed [`RemoteCollaborator`]. Wire format per spec §6: JSON
//! records with field names matching §4.11's column names; timestamps
//! ISO-8601 UTC (chrono's serde impl default); booleans native JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reconcile_core::{RemoteCollaborator, RemoteUpsertOutcome, Snapshot, SyncError, SyncId, SyncResult};
use serde::Deserialize;

pub struct HttpRemoteCollaborator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteCollaborator {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpRemoteCollaborator {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn map_status(status: reqwest::StatusCode) -> SyncError {
    match status.as_u16() {
        401 => SyncError::Unauthorized,
        403 => SyncError::Forbidden,
        404 => SyncError::NotFound,
        429 => SyncError::RateLimited { retry_after_ms: None },
        other => SyncError::ServerError {
            status: other,
            message: None,
        },
    }
}

fn map_transport_err(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_connect() {
        SyncError::NetworkUnavailable
    } else {
        SyncError::Unknown { message: err.to_string() }
    }
}

#[derive(Deserialize)]
struct TableExistsResponse {
    exists: bool,
}

#[async_trait]
impl RemoteCollaborator for HttpRemoteCollaborator {
    async fn upsert_batch(&self, family: &str, snapshots: &[Snapshot]) -> SyncResult<Vec<RemoteUpsertOutcome>> {
        let response = self
            .client
            .post(self.url(&format!("/sync/{family}/upsert")))
            .json(snapshots)
            .send()
            .await
            .map_err(map_transport_err)?;
        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }
        response.json().await.map_err(map_transport_err)
    }

    async fn delete(&self, family: &str, id: &SyncId) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/sync/{family}/{id}")))
            .send()
            .await
            .map_err(map_transport_err)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(map_status(response.status()))
        }
    }

    async fn fetch(&self, family: &str, id: &SyncId) -> SyncResult<Option<Snapshot>> {
        let response = self
            .client
            .get(self.url(&format!("/sync/{family}/{id}")))
            .send()
            .await
            .map_err(map_transport_err)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }
        Ok(Some(response.json().await.map_err(map_transport_err)?))
    }

    async fn fetch_modified_after(
        &self,
        family: &str,
        since: DateTime<Utc>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>> {
        let mut request = self
            .client
            .get(self.url(&format!("/sync/{family}")))
            .query(&[("modified_after", since.to_rfc3339())]);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await.map_err(map_transport_err)?;
        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }
        response.json().await.map_err(map_transport_err)
    }

    async fn fetch_deleted(
        &self,
        family: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> SyncResult<Vec<Snapshot>> {
        let mut query = Vec::new();
        if let Some(since) = since {
            query.push(("since".to_string(), since.to_rfc3339()));
        }
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        let response = self
            .client
            .get(self.url(&format!("/sync/{family}/deleted")))
            .query(&query)
            .send()
            .await
            .map_err(map_transport_err)?;
        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }
        response.json().await.map_err(map_transport_err)
    }

    async fn table_exists(&self, family: &str) -> SyncResult<bool> {
        let response = self
            .client
            .get(self.url(&format!("/sync/{family}/exists")))
            .send()
            .await
            .map_err(map_transport_err)?;
        if !response.status().is_success() {
            return Err(map_status(response.status()));
        }
        Ok(response.json::<TableExistsResponse>().await.map_err(map_transport_err)?.exists)
    }
}
