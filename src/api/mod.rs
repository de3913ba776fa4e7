// src/api/mod.rs
//
// Read-mostly HTTP surface for operators: queue depths, queue contents, and
// a way to send failed reports through the lifecycle again.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::error::QueueError;
use crate::queue::{JobQueues, QueueName};

#[derive(Clone)]
pub struct AppState {
    pub queues: JobQueues,
}

// Utility for handling Axum errors
type ApiResult<T> = Result<T, (StatusCode, String)>;

fn queue_error(e: QueueError) -> (StatusCode, String) {
    tracing::error!("Queue Error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Queue store error".to_string(),
    )
}

pub fn router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/", get(health_check))
        .route("/queues", get(queue_depths))
        .route("/queues/:name", get(list_queue))
        .route("/queues/failure/requeue", post(requeue_failures))
        .layer(cors)
        .with_state(app_state)
}

// --- Handlers ---

// GET /
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

// GET /queues
pub async fn queue_depths(State(app_state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let mut depths = serde_json::Map::new();
    for queue in QueueName::ALL {
        let len = app_state.queues.len(queue).await.map_err(queue_error)?;
        depths.insert(queue.as_str().to_string(), json!(len));
    }
    Ok(Json(Value::Object(depths)))
}

// GET /queues/:name
pub async fn list_queue(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<Value>>> {
    let queue = QueueName::parse(&name)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Queue {} not found", name)))?;
    let raw = app_state.queues.peek_all(queue).await.map_err(queue_error)?;

    // Entries that are not JSON are shown verbatim.
    let items = raw
        .into_iter()
        .map(|item| serde_json::from_str(&item).unwrap_or(Value::String(item)))
        .collect();
    Ok(Json(items))
}

// POST /queues/failure/requeue
// Moves what is in failure right now to the tail of requested.
pub async fn requeue_failures(State(app_state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let queues = &app_state.queues;
    let pending = queues.len(QueueName::Failure).await.map_err(queue_error)?;

    let mut moved = 0;
    for _ in 0..pending {
        if !queues
            .move_one(QueueName::Failure, QueueName::Requested)
            .await
            .map_err(queue_error)?
        {
            break;
        }
        moved += 1;
    }
    tracing::info!("Requeued {} failed report(s) to {}", moved, QueueName::Requested);

    Ok(Json(json!({ "moved": moved })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDescriptor, ReportStatus};
    use crate::queue::QueueStore;
    use crate::testing::MemoryQueue;
    use chrono::NaiveDate;

    async fn state() -> (Arc<MemoryQueue>, Arc<AppState>) {
        let store = Arc::new(MemoryQueue::default());
        let queues = JobQueues::new(store.clone(), "targets");
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        for id in ["R1", "R2"] {
            let job = JobDescriptor::requested(id, day, "targets").with_status(ReportStatus::Failure);
            queues.push(QueueName::Failure, &job).await.unwrap();
        }
        (store, Arc::new(AppState { queues }))
    }

    #[tokio::test]
    async fn reports_queue_depths() {
        let (_, app_state) = state().await;

        let Json(depths) = queue_depths(State(app_state)).await.unwrap();

        assert_eq!(depths, json!({"requested": 0, "ready": 0, "failure": 2}));
    }

    #[tokio::test]
    async fn lists_queue_contents() {
        let (store, app_state) = state().await;
        store.push_right("targets:failure", "garbage").await.unwrap();

        let Json(items) = list_queue(State(app_state.clone()), Path("failure".to_string()))
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["reportId"], "R1");
        assert_eq!(items[2], Value::String("garbage".into()));

        let err = list_queue(State(app_state), Path("done".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn requeue_moves_failures_in_order() {
        let (store, app_state) = state().await;

        let Json(body) = requeue_failures(State(app_state)).await.unwrap();

        assert_eq!(body, json!({"moved": 2}));
        assert!(store.items("targets:failure").is_empty());
        let ids: Vec<String> = store
            .items("targets:requested")
            .iter()
            .map(|raw| JobDescriptor::from_json(raw).unwrap().report_id)
            .collect();
        assert_eq!(ids, vec!["R1", "R2"]);
    }
}
