//! HTTP API for the tutor.
//!
//! The transport is thin: every interaction is handed to the
//! [`Orchestrator`] and its finalized response is returned as is. The
//! remaining endpoints read or write learner records directly.
//!
//! # Endpoints
//!
//! - `POST /api/interactions` - Walk one learner interaction
//! - `GET /api/learners/:id` - Fetch a learner profile
//! - `PUT /api/learners/:id` - Create or replace a learner profile
//! - `GET /api/learners/:id/schedule?date=YYYY-MM-DD` - Fetch a stored schedule
//! - `GET /api/status` - Service status
//! - `GET /ws` - Walk events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tutor_orchestrator::capabilities::Context;
//! use tutor_orchestrator::store::MemoryStore;
//! use tutor_orchestrator::{create_router, AppState, Config, Orchestrator};
//!
//! # async fn example() {
//! let ctx = Context::new(Arc::new(Config::default()), Arc::new(MemoryStore::new()));
//! let router = create_router(AppState::new(Orchestrator::new(ctx)));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::error::TutorError;
use crate::events::ws_handler;
use crate::graph::Orchestrator;
use crate::model::{LearnerProfile, Schedule};
use crate::state::InteractionRequest;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query string of the schedule endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleQuery {
    /// Schedule date; today when omitted.
    pub date: Option<String>,
}

/// Response body of the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Always `running` while the service answers.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// When the service started.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_seconds: i64,
    /// Live speaking sessions.
    pub active_speaking_sessions: usize,
    /// Connected event subscribers.
    pub event_subscribers: usize,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Walks interactions and owns the collaborators.
    pub orchestrator: Orchestrator,
    /// When the service started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Creates the state for a freshly started service.
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }

    /// Current service status. Expired speaking sessions are evicted first.
    pub async fn status(&self) -> ServiceStatus {
        let sessions = &self.orchestrator.context().sessions;
        let evicted = sessions.evict_expired().await;
        if evicted > 0 {
            info!(evicted, "Evicted expired speaking sessions");
        }
        ServiceStatus {
            status: "running".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            active_speaking_sessions: sessions.active_count().await,
            event_subscribers: self.orchestrator.events().receiver_count(),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The request is malformed.
    BadRequest(String),
    /// The JSON body could not be extracted.
    InvalidBody(JsonRejection),
    /// The requested record does not exist.
    NotFound(String),
    /// Storage failed.
    Storage(TutorError),
}

impl From<TutorError> for ApiError {
    fn from(e: TutorError) -> Self {
        Self::Storage(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::InvalidBody(rejection) => (rejection.status(), rejection.body_text()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Storage(e) => {
                warn!(error = %e, "Storage failure while serving request");
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with every endpoint, CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/interactions", post(handle_interaction))
        .route(
            "/learners/:id",
            get(handle_get_learner).put(handle_put_learner),
        )
        .route("/learners/:id/schedule", get(handle_get_schedule))
        .route("/status", get(handle_status));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/interactions`.
///
/// Always answers with the finalized response; capability failures are
/// reported inside it with `status: "error"`.
async fn handle_interaction(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InteractionRequest>, JsonRejection>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let Json(request) = body?;
    if request.learner_id.trim().is_empty() {
        return Err(ApiError::BadRequest("learner_id must not be empty".to_string()));
    }
    info!(
        learner_id = %request.learner_id,
        request_type = %request.request_type,
        "Received interaction"
    );
    Ok(Json(state.orchestrator.handle(&request).await))
}

/// Handler for `GET /api/learners/:id`.
async fn handle_get_learner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<LearnerProfile>, ApiError> {
    state
        .orchestrator
        .context()
        .store
        .get_learner(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Learner not found: {id}")))
}

/// Handler for `PUT /api/learners/:id`.
async fn handle_put_learner(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<LearnerProfile>, JsonRejection>,
) -> Result<Json<LearnerProfile>, ApiError> {
    let Json(profile) = body?;
    if profile.id != id {
        return Err(ApiError::BadRequest(format!(
            "Profile id '{}' does not match path id '{id}'",
            profile.id
        )));
    }
    if profile.daily_goal_minutes == 0 {
        return Err(ApiError::BadRequest(
            "daily_goal_minutes must be greater than 0".to_string(),
        ));
    }
    let store = &state.orchestrator.context().store;
    store.put_learner(&profile).await?;
    info!(learner_id = %id, "Learner profile stored");
    Ok(Json(profile))
}

/// Handler for `GET /api/learners/:id/schedule`.
async fn handle_get_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ScheduleQuery>,
) -> Result<Json<Schedule>, ApiError> {
    let date = match query.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            ApiError::BadRequest(format!("Invalid date '{raw}', expected YYYY-MM-DD"))
        })?,
        None => Utc::now().date_naive(),
    };
    state
        .orchestrator
        .context()
        .store
        .get_schedule(&id, date)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No schedule for {id} on {date}")))
}

/// Handler for `GET /api/status`.
async fn handle_status(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(state.status().await)
}

// ============================================================================
// Tests
// ============================================================================
