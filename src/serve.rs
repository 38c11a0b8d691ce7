//! HTTP view of the liveness probe, for supervisors that poll over the network.
use crate::config::HealthConfig;
use crate::data_dir::DataDir;
use crate::probe::{run_guarded, LivenessProbe, ProbeReport, UnhealthyReason};
use crate::signals::Shutdown;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
    probe: Arc<LivenessProbe>,
}

pub fn router(probe: LivenessProbe) -> axum::Router {
    use axum::{routing::get, Router};
    use tower_http::trace::TraceLayer;

    let state = AppState {
        probe: Arc::new(probe),
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(
    config: &HealthConfig,
    mut shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let dd = DataDir::from_config(&config.paths);
    let probe = LivenessProbe::new(dd.marker(), config.probe.staleness_threshold());
    let app = router(probe);

    let addr = format!("{}:{}", config.serve.bind, config.serve.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("serve listening on {local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { crate::signals::wait_for(&mut shutdown).await })
        .await?;
    Ok(())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"ok": true}))
}

async fn healthz(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<serde_json::Value>) {
    use axum::http::StatusCode;

    let probe = Arc::clone(&state.probe);
    let task = tokio::task::spawn_blocking(move || run_guarded(probe.as_ref()));
    let report = match task.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "probe task failed");
            ProbeReport::unhealthy(UnhealthyReason::Panicked)
        }
    };

    let healthy = report.outcome().is_healthy();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "healthy": healthy,
        "age_secs": report.age_secs(),
        "detail": report.to_string(),
    });
    (code, axum::Json(body))
}
