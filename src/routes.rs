// SPDX-License-Identifier: MIT
//! HTTP routes that emit test logs and spans.
//!
//! Every JSON response carries an RFC 3339 UTC `timestamp`. Handlers share nothing but
//! [`AppState`], which is read-only.
use crate::state::AppState;
use crate::telemetry::OTLP_PROTOCOL;
use axum::extract::State;
use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use opentelemetry::trace::{Span as _, Tracer as _};
use opentelemetry::KeyValue;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Shown in place of settings that are absent.
pub const NOT_SET: &str = "NOT SET";

/// Upper bound on the telemetry flush performed by `/test-connection`.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// `/test-connection` never answers sooner than this after the request arrives.
pub const SETTLE_WINDOW: Duration = Duration::from_secs(1);

/// Levels of the lines `/test-connection` writes, one line each.
pub const TEST_LOG_LEVELS: [&str; 3] = ["Information", "Warning", "Error"];

/// All routes, still waiting for their [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/Index", get(index))
        .route("/log", get(log))
        .route("/test-telemetry", get(test_telemetry))
        .route("/test-connection", get(test_connection))
        .route("/health", get(health))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    pub grafana_configured: bool,
    pub instructions: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryResponse {
    pub message: &'static str,
    pub trace_id: String,
    pub span_id: String,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub instructions: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub timestamp: DateTime<Utc>,
    pub configuration: ConnectionConfiguration,
    pub test_logs: TestLogSummary,
    pub instructions: ConnectionInstructions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfiguration {
    pub otlp_endpoint: String,
    pub api_token: &'static str,
    pub instance_id: String,
    pub auth_scheme: &'static str,
    pub protocol: &'static str,
    pub grafana_configured: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestLogSummary {
    pub sent: usize,
    pub levels: [&'static str; 3],
    pub flushed: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectionInstructions {
    pub steps: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub grafana_configured: bool,
}

async fn root() -> Redirect {
    Redirect::to("/Index")
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Grafana OTLP demo</title></head>
<body>
<h1>Grafana OTLP demo</h1>
<ul>
<li><a href="/log">/log</a> writes info, warning and error lines</li>
<li><a href="/test-telemetry">/test-telemetry</a> records a test span</li>
<li><a href="/test-connection">/test-connection</a> checks configuration and flushes test logs</li>
<li><a href="/health">/health</a> health check</li>
</ul>
</body>
</html>
"#;

async fn log(State(state): State<AppState>) -> Json<LogResponse> {
    let timestamp = Utc::now();
    info!(endpoint = "/log", %timestamp, "Test information message from the log endpoint");
    warn!(endpoint = "/log", "Test warning message from the log endpoint");
    error!(endpoint = "/log", "Test error message from the log endpoint");

    Json(LogResponse {
        message: "Test log lines written",
        timestamp,
        grafana_configured: state.settings().is_configured(),
        instructions: "Look for the three lines in Grafana Explore with the Loki data source",
    })
}

async fn test_telemetry(State(state): State<AppState>) -> Json<TelemetryResponse> {
    let timestamp = Utc::now();
    let mut span = state.tracer().start("TestTelemetry");
    span.set_attribute(KeyValue::new("test.type", "telemetry"));
    span.set_attribute(KeyValue::new("test.timestamp", timestamp.to_rfc3339()));
    span.add_event(
        "Processing test telemetry request",
        vec![KeyValue::new("service.name", state.service_name().to_string())],
    );
    let span_context = span.span_context().clone();

    info!(
        trace_id = %span_context.trace_id(),
        span_id = %span_context.span_id(),
        "Test telemetry span recorded"
    );
    span.end();

    Json(TelemetryResponse {
        message: "Test span recorded",
        trace_id: span_context.trace_id().to_string(),
        span_id: span_context.span_id().to_string(),
        service_name: state.service_name().to_string(),
        timestamp,
        instructions: format!(
            "Search Grafana Explore with the Tempo data source for service.name = {}",
            state.service_name()
        ),
    })
}

async fn test_connection(State(state): State<AppState>) -> Json<ConnectionReport> {
    let started = Instant::now();
    let settings = state.settings();

    let configuration = ConnectionConfiguration {
        otlp_endpoint: settings.endpoint().unwrap_or(NOT_SET).to_string(),
        api_token: if settings.has_api_token() { "SET" } else { NOT_SET },
        instance_id: settings.instance_id().to_string(),
        auth_scheme: settings.auth_scheme().as_str(),
        protocol: OTLP_PROTOCOL,
        grafana_configured: settings.is_configured(),
    };

    info!(
        grafana_configured = configuration.grafana_configured,
        "Connection test: information level"
    );
    warn!("Connection test: warning level");
    error!("Connection test: error level");

    let flushed = match state.flusher().flush(FLUSH_TIMEOUT).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %format_args!("{err:#}"), "Telemetry flush did not complete");
            false
        }
    };
    tokio::time::sleep_until(started + SETTLE_WINDOW).await;

    let service = state.service_name();
    Json(ConnectionReport {
        timestamp: Utc::now(),
        configuration,
        test_logs: TestLogSummary {
            sent: TEST_LOG_LEVELS.len(),
            levels: TEST_LOG_LEVELS,
            flushed,
        },
        instructions: ConnectionInstructions {
            steps: vec![
                "Open Grafana and go to Explore".to_string(),
                "Select the Loki data source".to_string(),
                format!("Query {{service_name=\"{service}\"}} over the last 5 minutes"),
                "Look for the 'Connection test' lines".to_string(),
                format!("Switch to the Tempo data source and search for service {service}"),
            ],
        },
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        grafana_configured: state.settings().is_configured(),
    })
}
