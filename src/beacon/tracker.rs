//! Usage tracker: the receiving end of the beacon.
//!
//! The tracker only accepts reports from binaries whose code hash is on its
//! allowlist. Reports carry cumulative counts, so a redelivered report
//! never inflates the totals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::principal::Principal;

/// Cumulative usage of one gateway instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Identity of the reporting service
    pub server_id: String,
    /// SHA-256 of the reporting binary, hex
    pub code_hash: String,
    /// Tool invocations since start
    pub total_invocations: u64,
    /// Tool invocations per caller since start
    pub invocations_by_user: Vec<(Principal, u64)>,
}

/// Report delivery failure
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The tracker does not recognise this binary
    #[error("code hash {0} is not approved by the tracker")]
    Unapproved(String),

    /// Network failure
    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected response status
    #[error("tracker returned HTTP {0}")]
    Status(u16),

    /// No answer within the timeout
    #[error("tracker did not answer within {0:?}")]
    Timeout(Duration),
}

/// Metric-recording endpoint of a tracker
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Record a cumulative usage report
    async fn record(&self, report: &UsageReport) -> Result<(), TrackerError>;
}

/// Tracker reached over HTTP at `POST <base>/metrics`
pub struct HttpTracker {
    client: Client,
    url: String,
}

impl HttpTracker {
    /// Create a client for the tracker at `base_url`
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TrackerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/metrics", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Tracker for HttpTracker {
    async fn record(&self, report: &UsageReport) -> Result<(), TrackerError> {
        let response = self.client.post(&self.url).json(report).send().await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::FORBIDDEN => Err(TrackerError::Unapproved(report.code_hash.clone())),
            s => Err(TrackerError::Status(s.as_u16())),
        }
    }
}

/// Tracker kept in memory, with an approved code-hash allowlist
#[derive(Default)]
pub struct InMemoryTracker {
    approved: RwLock<HashSet<String>>,
    reports: Mutex<HashMap<String, UsageReport>>,
}

impl InMemoryTracker {
    /// Tracker with an empty allowlist
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow reports from binaries with `code_hash`
    pub fn approve(&self, code_hash: impl Into<String>) {
        self.approved.write().insert(code_hash.into().to_ascii_lowercase());
    }

    /// Latest accepted report of `server_id`
    #[must_use]
    pub fn metrics(&self, server_id: &str) -> Option<UsageReport> {
        self.reports.lock().get(server_id).cloned()
    }

    /// Serve `POST /metrics` and `GET /metrics/{server_id}`
    pub fn routes(tracker: Arc<Self>) -> Router {
        Router::new()
            .route("/metrics", post(record_handler))
            .route("/metrics/{server_id}", get(metrics_handler))
            .with_state(tracker)
    }

    fn accept(&self, report: &UsageReport) -> Result<(), TrackerError> {
        if !self
            .approved
            .read()
            .contains(&report.code_hash.to_ascii_lowercase())
        {
            return Err(TrackerError::Unapproved(report.code_hash.clone()));
        }

        let mut reports = self.reports.lock();
        match reports.get(&report.server_id) {
            Some(current) if current.total_invocations > report.total_invocations => {}
            _ => {
                reports.insert(report.server_id.clone(), report.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tracker for InMemoryTracker {
    async fn record(&self, report: &UsageReport) -> Result<(), TrackerError> {
        self.accept(report)
    }
}

async fn record_handler(
    State(tracker): State<Arc<InMemoryTracker>>,
    Json(report): Json<UsageReport>,
) -> Response {
    match tracker.accept(&report) {
        Ok(()) => Json(json!({})).into_response(),
        Err(e) => (StatusCode::FORBIDDEN, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn metrics_handler(
    State(tracker): State<Arc<InMemoryTracker>>,
    Path(server_id): Path<String>,
) -> Response {
    match tracker.metrics(&server_id) {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
