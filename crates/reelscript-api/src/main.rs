//! Axum API server binary.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelscript_api::{create_router, metrics, ApiConfig, AppState};
use reelscript_breaker::FailureTracker;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+).
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    init_tracing();

    info!("Starting reelscript-api");

    let config = match ApiConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("API config: host={}, port={}", config.host, config.port);

    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {}", e);
            std::process::exit(1);
        }
    };

    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);
    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    spawn_gauge_refresher(state.clone());
    spawn_breaker_event_pump(state.clone());

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid bind address");
    info!("Listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!("Server error: {}", e);
    }

    info!("Server shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reelscript=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .init();
    }
}

/// Refresh the queue/jobs/sessions gauges on an interval. A dependency that
/// stays down would otherwise warn every tick, so each lookup gets a
/// failure tracker that suppresses the repeats.
fn spawn_gauge_refresher(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        let mut queue_failures = FailureTracker::new(3);
        let mut jobs_failures = FailureTracker::new(3);
        let mut session_failures = FailureTracker::new(3);

        loop {
            interval.tick().await;

            match state.queue.len().await {
                Ok(depth) => {
                    queue_failures.record_success();
                    metrics::set_queue_depth(depth);
                }
                Err(e) => {
                    if queue_failures.record_failure() {
                        warn!("Queue depth refresh failed: {}", e);
                    }
                }
            }
            match state.jobs.count_processing().await {
                Ok(count) => {
                    jobs_failures.record_success();
                    metrics::set_active_jobs(count);
                }
                Err(e) => {
                    if jobs_failures.record_failure() {
                        warn!("Active-jobs refresh failed: {}", e);
                    }
                }
            }
            match state.sessions.count_active().await {
                Ok(count) => {
                    session_failures.record_success();
                    metrics::set_active_sessions(count);
                }
                Err(e) => {
                    if session_failures.record_failure() {
                        warn!("Active-sessions refresh failed: {}", e);
                    }
                }
            }
            for (service, breaker_state) in state.breakers.states() {
                metrics::set_breaker_state(&service, breaker_state.as_gauge());
            }
        }
    });
}

/// Mirror breaker transitions into the state gauge as they happen.
fn spawn_breaker_event_pump(state: AppState) {
    tokio::spawn(async move {
        let mut events = state.breakers.subscribe();
        while let Ok(event) = events.recv().await {
            metrics::set_breaker_state(&event.service, event.to.as_gauge());
        }
    });
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}
