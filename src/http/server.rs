use crate::context::AppContext;
use crate::error::{LagwatchError, Result};
use crate::gateway::{QueryOutcome, StorageClient};
use crate::leadership::LeadershipStatus;
use crate::lifecycle::{ServiceHandle, shutdown_requested};
use crate::metrics::GaugeRegistry;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    clusters: Arc<Vec<String>>,
    storage: StorageClient,
    leadership: LeadershipStatus,
    registry: Arc<GaugeRegistry>,
}

pub struct HttpServer {
    addr: SocketAddr,
    state: AppState,
}

impl HttpServer {
    pub fn new(context: &AppContext) -> Result<Self> {
        let general = &context.config.general;
        let addr: SocketAddr = format!("{}:{}", general.http_host, general.http_port)
            .parse()
            .map_err(|e| LagwatchError::Config(format!("Invalid HTTP bind address: {e}")))?;

        Ok(Self {
            addr,
            state: AppState {
                clusters: Arc::new(context.clusters.clone()),
                storage: context.storage.clone(),
                leadership: context.leadership.clone(),
                registry: Arc::clone(&context.registry),
            },
        })
    }

    /// Bind the listener and serve in the background. Binding errors are
    /// returned here so startup can abort.
    pub async fn start(self) -> Result<ServiceHandle> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| LagwatchError::Http(format!("bind {}: {e}", self.addr)))?;
        info!(addr = %self.addr, "Starting HTTP server");

        let app = router(self.state);
        Ok(ServiceHandle::spawn("http", move |mut shutdown| async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_requested(&mut shutdown).await;
                    info!("HTTP server shutting down");
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP server error");
            }
        }))
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/leader", get(leader_handler))
        .route("/v1/kafka", get(clusters_handler))
        .route("/v1/kafka/{cluster}/consumer", get(groups_handler))
        .route(
            "/v1/kafka/{cluster}/consumer/{group}/status",
            get(group_status_handler),
        )
        .route("/v1/kafka/{cluster}/topic", get(topics_handler))
        .route("/v1/kafka/{cluster}/topic/{topic}", get(topic_offsets_handler))
        .with_state(state)
}

/// Turn a storage answer into a JSON response, keyed by `field`.
fn query_response<T: Serialize>(
    outcome: QueryOutcome<T>,
    field: &str,
    not_found: impl FnOnce() -> String,
) -> Response {
    match outcome {
        QueryOutcome::Found(value) => {
            let mut body = json!({ "error": false, "message": "ok" });
            body[field] = json!(value);
            (StatusCode::OK, Json(body)).into_response()
        }
        QueryOutcome::NotFound => error_response(StatusCode::NOT_FOUND, not_found()),
        QueryOutcome::TimedOut => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            "storage did not answer in time".to_string(),
        ),
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": true, "message": message }))).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.registry.render_prometheus(),
    )
        .into_response()
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let Some(cluster) = state.clusters.first() else {
        return (StatusCode::OK, "OK").into_response();
    };
    // any answer, including "not found", means the engine is alive
    if state.storage.list_consumer_groups(cluster).await.is_timed_out() {
        (StatusCode::SERVICE_UNAVAILABLE, "Unhealthy").into_response()
    } else {
        (StatusCode::OK, "OK").into_response()
    }
}

/// Response body for the /leader endpoint.
#[derive(Serialize)]
struct LeaderResponse {
    is_leader: bool,
    state: &'static str,
}

async fn leader_handler(State(state): State<AppState>) -> Json<LeaderResponse> {
    let current = state.leadership.state();
    Json(LeaderResponse {
        is_leader: current.is_leader(),
        state: current.as_str(),
    })
}

async fn clusters_handler(State(state): State<AppState>) -> Response {
    let body = json!({
        "error": false,
        "message": "ok",
        "clusters": state.clusters.as_slice(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn groups_handler(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> Response {
    let outcome = state.storage.list_consumer_groups(&cluster).await;
    query_response(outcome, "consumers", || format!("cluster {cluster} not found"))
}

#[derive(Debug, Default, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    showall: bool,
}

async fn group_status_handler(
    State(state): State<AppState>,
    Path((cluster, group)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let outcome = state
        .storage
        .consumer_group_status(&cluster, &group, query.showall)
        .await;
    query_response(outcome, "status", || {
        format!("consumer group {group} not found in cluster {cluster}")
    })
}

async fn topics_handler(
    State(state): State<AppState>,
    Path(cluster): Path<String>,
) -> Response {
    let outcome = state.storage.list_topics(&cluster).await;
    query_response(outcome, "topics", || format!("cluster {cluster} not found"))
}

async fn topic_offsets_handler(
    State(state): State<AppState>,
    Path((cluster, topic)): Path<(String, String)>,
) -> Response {
    let outcome = state.storage.topic_offsets(&cluster, &topic).await;
    query_response(outcome, "offsets", || {
        format!("topic {topic} not found in cluster {cluster}")
    })
}
