//! # loupe-rs
//!
//! A backend for exploring recorded human-agent coding session logs and
//! curated task annotations over them.
//!
//! This server provides:
//! - Session browsing from JSONL log files in a flat sessions directory
//! - Normalization of raw log records into per-prompt interactions
//! - Task annotations referencing interactions across sessions
//! - REST API consumed by the browser frontend in static/
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  Frontend   │────▶│  Axum HTTP   │────▶│  sessions dir   │
//! │  (static/)  │     │  Server      │     │  (JSONL files)  │
//! └─────────────┘     └──────────────┘     └─────────────────┘
//!                           │                      ▲
//!                           ▼                      │ reload on change
//!                     ┌──────────────┐     ┌──────────────┐
//!                     │ tasks.jsonl  │     │   watcher    │
//!                     └──────────────┘     └──────────────┘
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Server health check
//! - `GET /api/sessions` - List sessions
//! - `GET /api/sessions/{id}/interactions` - One session as interactions
//! - `GET /api/stats` - Totals across sessions
//! - `GET /api/tasks` - List tasks
//! - `POST /api/tasks` - Create a task
//! - `GET /api/tasks/{id}` - One task with hydrated interactions
//! - `DELETE /api/tasks/{id}` - Delete a task

mod history;
mod interactions;
mod sessions;
mod tasks;
mod watcher;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::interactions::Interaction;
use crate::sessions::{SessionOverview, SessionStore};
use crate::tasks::{resolve_task, NewTask, Task, TaskError, TaskStore, TaskWithDetails};

// ============================================================================
// App State - Shared state across all request handlers
// ============================================================================

struct AppState {
    start_time: Instant,      // Server start time for uptime tracking
    sessions: Arc<SessionStore>, // Session cache, kept fresh by the watcher
    tasks: TaskStore,         // JSONL-backed task annotations
}

/// Failures surface as a short human-readable message
type ApiError = (StatusCode, String);

// ============================================================================
// Health Endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: &'static str,
    session_count: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (session_count, _) = state.sessions.stats();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        session_count,
    })
}

// ============================================================================
// Session Endpoints
// ============================================================================

async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionOverview>> {
    Json(state.sessions.overviews())
}

/// Interaction plus on-demand display statistics
#[derive(Serialize)]
struct InteractionView {
    #[serde(flatten)]
    interaction: Interaction,
    duration_ms: Option<i64>,
    edit_count: usize,
}

impl From<Interaction> for InteractionView {
    fn from(interaction: Interaction) -> Self {
        let duration_ms = interactions::duration(&interaction).map(|d| d.num_milliseconds());
        let edit_count = interactions::edit_count(&interaction);
        Self {
            interaction,
            duration_ms,
            edit_count,
        }
    }
}

#[derive(Serialize)]
struct SessionInteractions {
    session_id: String,
    file_name: String,
    numeric_id: Option<u64>,
    summary: Option<String>,
    interactions: Vec<InteractionView>,
}

async fn get_session_interactions(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInteractions>, ApiError> {
    let session = state.sessions.get(&session_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", session_id),
        )
    })?;

    Ok(Json(SessionInteractions {
        session_id: session.id,
        file_name: session.file_name,
        numeric_id: session.numeric_id,
        summary: session.summary,
        interactions: session
            .interactions
            .into_iter()
            .map(InteractionView::from)
            .collect(),
    }))
}

#[derive(Serialize)]
struct StatsResponse {
    total_sessions: usize,
    total_interactions: usize,
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let (total_sessions, total_interactions) = state.sessions.stats();
    Json(StatsResponse {
        total_sessions,
        total_interactions,
    })
}

// ============================================================================
// Task Endpoints
// ============================================================================

async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    let mut tasks = state.tasks.list();
    // Newest first
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(tasks)
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewTask>,
) -> Result<Json<Task>, ApiError> {
    match state.tasks.create(new) {
        Ok(task) => Ok(Json(task)),
        Err(TaskError::Invalid(msg)) => Err((StatusCode::UNPROCESSABLE_ENTITY, msg)),
        Err(e) => {
            tracing::error!("Task creation failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not persist task".to_string(),
            ))
        }
    }
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskWithDetails>, ApiError> {
    let task = state.tasks.get(&task_id).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("Task not found: {}", task_id),
        )
    })?;
    Ok(Json(resolve_task(&task, &state.sessions)))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    match state.tasks.delete(&task_id) {
        Ok(true) => Ok(Json(DeleteResponse { deleted: true })),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            format!("Task not found: {}", task_id),
        )),
        Err(e) => {
            tracing::error!("Task deletion failed: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not delete task".to_string(),
            ))
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loupe_rs=info".parse().unwrap())
                .add_directive("tower_http=info".parse().unwrap()),
        )
        .init();

    // Sessions directory: positional arg, then env, then the repo default
    let sessions_dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LOUPE_SESSIONS_DIR").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data").join("sessions"));

    if !sessions_dir.is_dir() {
        tracing::error!(
            "Sessions directory not found: {}. Place session JSONL files there or pass a directory as the first argument.",
            sessions_dir.display()
        );
        std::process::exit(1);
    }

    // Tasks file lives next to the sessions directory unless overridden
    let tasks_file = std::env::var("LOUPE_TASKS_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            sessions_dir
                .parent()
                .map(|p| p.join("tasks.jsonl"))
                .unwrap_or_else(|| PathBuf::from("tasks.jsonl"))
        });

    let sessions = SessionStore::new(sessions_dir.clone());
    let loaded = sessions.load_all();
    tracing::info!(
        "Loaded {} sessions from {}",
        loaded,
        sessions_dir.display()
    );
    tracing::info!("Tasks file: {}", tasks_file.display());

    // Keep the cache current while the server runs
    let watcher_store = sessions.clone();
    tokio::spawn(async move {
        watcher::start(watcher_store).await;
    });

    let state = Arc::new(AppState {
        start_time: Instant::now(),
        sessions,
        tasks: TaskStore::new(tasks_file),
    });

    // The frontend is served from another origin during development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // Health
        .route("/health", get(health))
        // Sessions (read-only views over the log files)
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/{session_id}/interactions",
            get(get_session_interactions),
        )
        .route("/api/stats", get(get_stats))
        // Tasks
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{task_id}", get(get_task).delete(delete_task))
        .layer(cors)
        // Static files
        .fallback_service(ServeDir::new("static").append_index_html_on_directories(true))
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(
        "loupe-rs v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
