//! v2 API handlers and their shared state

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::analysis::{DeltaSeverity, Thresholds};
use crate::pipeline::{EngineStatsSnapshot, ScoringEngine};
use crate::types::{InterferenceScore, Recording, RmsMode};

/// Upper bound on rows returned by one query.
const MAX_LIMIT: usize = 10_000;

/// State shared by every handler.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ScoringEngine>,
    pub station: String,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(engine: Arc<ScoringEngine>, station: &str) -> Self {
        Self {
            engine,
            station: station.to_string(),
            started_at: Instant::now(),
        }
    }
}

// ============================================================================
// Query / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RmsQuery {
    /// `standard` (default) or `truncated`
    #[serde(default, rename = "type")]
    pub rms_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RmsQuery {
    fn mode(&self) -> Result<RmsMode, String> {
        self.rms_type
            .as_deref()
            .map_or(Ok(RmsMode::Standard), |s| s.parse())
    }

    fn limit(&self) -> Option<usize> {
        self.limit.map(|l| l.min(MAX_LIMIT))
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub station: String,
    pub capture_sets: usize,
    pub last_counter: Option<u64>,
    pub uptime_secs: u64,
    pub stats: EngineStatsSnapshot,
}

/// One row with cells aligned to the header list (`null` = not scored).
#[derive(Debug, Serialize)]
pub struct RowView {
    pub counter: u64,
    pub date: String,
    pub time: String,
    pub note: String,
    pub values: Vec<Option<f64>>,
}

impl RowView {
    fn new(row: &InterferenceScore, headers: &[String]) -> Self {
        Self {
            counter: row.counter,
            date: row.date.clone(),
            time: row.time.clone(),
            note: row.note.clone(),
            values: headers.iter().map(|h| row.scores.get(h)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RmsTableResponse {
    pub capture_set_id: String,
    #[serde(rename = "type")]
    pub rms_type: RmsMode,
    pub headers: Vec<String>,
    pub rows: Vec<RowView>,
}

#[derive(Debug, Serialize)]
pub struct DeltaRowView {
    #[serde(flatten)]
    pub row: RowView,
    pub severities: Vec<DeltaSeverity>,
}

#[derive(Debug, Serialize)]
pub struct DeltaTableResponse {
    pub capture_set_id: String,
    #[serde(rename = "type")]
    pub rms_type: RmsMode,
    pub headers: Vec<String>,
    pub rows: Vec<DeltaRowView>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v2/system/health
pub async fn system_health(State(state): State<ApiState>) -> Response {
    let engine = &state.engine;
    ApiResponse::ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        station: state.station.clone(),
        capture_sets: engine.capture_sets().len(),
        last_counter: engine.ledger().last_counter().ok(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        stats: engine.stats(),
    })
}

/// GET /api/v2/capture-sets
pub async fn list_capture_sets(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.capture_sets())
}

/// GET /api/v2/rms/:capture_set_id?type=standard|truncated&limit=N
pub async fn get_rms(
    State(state): State<ApiState>,
    Path(capture_set_id): Path<String>,
    Query(q): Query<RmsQuery>,
) -> Response {
    let mode = match q.mode() {
        Ok(m) => m,
        Err(e) => return ApiErrorResponse::bad_request(e),
    };
    match state.engine.table(&capture_set_id, mode, q.limit()) {
        Ok(table) => {
            let rows = table
                .rows
                .iter()
                .map(|r| RowView::new(r, &table.headers))
                .collect();
            ApiResponse::ok(RmsTableResponse {
                capture_set_id,
                rms_type: mode,
                headers: table.headers,
                rows,
            })
        }
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/rms/:capture_set_id/delta?type=standard|truncated&limit=N
pub async fn get_rms_delta(
    State(state): State<ApiState>,
    Path(capture_set_id): Path<String>,
    Query(q): Query<RmsQuery>,
) -> Response {
    let mode = match q.mode() {
        Ok(m) => m,
        Err(e) => return ApiErrorResponse::bad_request(e),
    };
    match state.engine.delta_table(&capture_set_id, mode, q.limit()) {
        Ok(table) => {
            let rows = table
                .rows
                .iter()
                .zip(table.severities)
                .map(|(r, severities)| DeltaRowView {
                    row: RowView::new(r, &table.headers),
                    severities,
                })
                .collect();
            ApiResponse::ok(DeltaTableResponse {
                capture_set_id,
                rms_type: mode,
                headers: table.headers,
                rows,
            })
        }
        Err(e) => ApiErrorResponse::from_engine(&e),
    }
}

/// GET /api/v2/thresholds
pub async fn get_thresholds(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(*state.engine.thresholds().snapshot())
}

/// POST /api/v2/thresholds - values are sorted ascending before storing
pub async fn update_thresholds(
    State(state): State<ApiState>,
    body: Result<axum::Json<Thresholds>, JsonRejection>,
) -> Response {
    let axum::Json(raw) = match body {
        Ok(b) => b,
        Err(e) => return ApiErrorResponse::bad_request(e.body_text()),
    };
    if ![raw.medium, raw.high, raw.critical].iter().all(|v| v.is_finite()) {
        return ApiErrorResponse::bad_request("thresholds must be finite numbers");
    }
    let stored = state.engine.thresholds().update(raw);
    info!(
        medium = stored.medium,
        high = stored.high,
        critical = stored.critical,
        "Thresholds updated"
    );
    ApiResponse::ok(stored)
}

/// POST /api/v2/recordings
pub async fn submit_recording(
    State(state): State<ApiState>,
    body: Result<axum::Json<Recording>, JsonRejection>,
) -> Response {
    let axum::Json(recording) = match body {
        Ok(b) => b,
        Err(e) => return ApiErrorResponse::bad_request(e.body_text()),
    };

    let engine = Arc::clone(&state.engine);
    match tokio::task::spawn_blocking(move || engine.score_recording(recording)).await {
        Ok(Ok(outcome)) => ApiResponse::created(outcome),
        Ok(Err(e)) => {
            warn!(error = %e, "Recording rejected");
            ApiErrorResponse::from_engine(&e)
        }
        Err(e) => ApiErrorResponse::internal(format!("scoring task failed: {e}")),
    }
}
