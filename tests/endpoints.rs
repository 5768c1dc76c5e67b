// SPDX-License-Identifier: MIT
//! End-to-end checks of the HTTP surface through the full router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use grafana_otel_demo::settings::{FileSettings, GrafanaSettings, GrafanaSection};
use grafana_otel_demo::telemetry::TelemetryFlusher;
use grafana_otel_demo::{create_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::time::{Duration, Instant};

fn app(settings: GrafanaSettings) -> Router {
    create_router(AppState::new(
        settings,
        "grafana-otel-demo",
        TelemetryFlusher::default(),
    ))
}

/// Helper to make a GET request.
async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = tower::ServiceExt::oneshot(
        app,
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

    (status, json)
}

fn assert_utc_timestamp(body: &Value) {
    let raw = body["timestamp"].as_str().expect("timestamp is a string");
    let parsed = DateTime::parse_from_rfc3339(raw).expect("timestamp is RFC 3339");
    assert_eq!(parsed.offset().local_minus_utc(), 0);
    let _utc: DateTime<Utc> = parsed.with_timezone(&Utc);
}

#[tokio::test]
async fn diagnostic_endpoints_return_timestamped_json() {
    for uri in ["/log", "/test-telemetry", "/test-connection", "/health"] {
        let (status, body) = get(app(GrafanaSettings::unconfigured()), uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_utc_timestamp(&body);
    }
}

#[tokio::test]
async fn health_is_healthy_in_every_configuration() {
    let configured = GrafanaSettings::new(
        Some("https://otlp.example/otlp".into()),
        Some("glc_token".into()),
        "99",
    );
    for settings in [GrafanaSettings::unconfigured(), configured] {
        let (status, body) = get(app(settings), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}

#[tokio::test]
async fn empty_configuration_is_reported_everywhere() {
    let settings = GrafanaSettings::resolve(|_| Some(String::new()), &FileSettings::default());

    let (_, body) = get(app(settings.clone()), "/test-connection").await;
    assert_eq!(body["configuration"]["otlpEndpoint"], "NOT SET");
    assert_eq!(body["configuration"]["apiToken"], "NOT SET");
    assert_eq!(body["configuration"]["grafanaConfigured"], false);

    for uri in ["/log", "/health"] {
        let (_, body) = get(app(settings.clone()), uri).await;
        assert_eq!(body["grafanaConfigured"], false, "{uri}");
    }
}

#[tokio::test]
async fn file_settings_enable_remote_export() {
    let file = FileSettings {
        grafana: GrafanaSection {
            otlp_endpoint: Some("https://file.example/otlp".into()),
            api_token: Some("glc_from_file".into()),
        },
    };
    let settings = GrafanaSettings::resolve(|_| None, &file);

    let (_, body) = get(app(settings), "/test-connection").await;
    assert_eq!(body["configuration"]["otlpEndpoint"], "https://file.example/otlp");
    assert_eq!(body["configuration"]["apiToken"], "SET");
    assert_eq!(body["configuration"]["grafanaConfigured"], true);
}

#[tokio::test]
async fn test_connection_waits_at_least_one_second() {
    let started = Instant::now();
    let (status, _) = get(app(GrafanaSettings::unconfigured()), "/test-connection").await;
    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_secs(1));
}
