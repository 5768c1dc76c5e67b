// SPDX-License-Identifier: MIT
//! Inbound HTTP request metrics (`metrics` feature).
//!
//! Instruments are created lazily from the global meter provider, so telemetry must be
//! initialized before the first request is served.
use crate::telemetry::INSTRUMENTATION_SCOPE;
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;
use std::time::Instant;

struct HttpInstruments {
    requests: Counter<u64>,
    duration: Histogram<f64>,
}

fn instruments() -> &'static HttpInstruments {
    static INSTRUMENTS: OnceLock<HttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter(INSTRUMENTATION_SCOPE);
        HttpInstruments {
            requests: meter
                .u64_counter("http.server.request.count")
                .with_description("Inbound HTTP requests")
                .build(),
            duration: meter
                .f64_histogram("http.server.request.duration")
                .with_unit("s")
                .with_description("Inbound HTTP request duration")
                .build(),
        }
    })
}

/// Count every routed request and record its duration, keyed by method, route and status.
pub async fn record_request_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let attributes = [
        KeyValue::new("http.request.method", method),
        KeyValue::new("http.route", route),
        KeyValue::new(
            "http.response.status_code",
            i64::from(response.status().as_u16()),
        ),
    ];
    let instruments = instruments();
    instruments.requests.add(1, &attributes);
    instruments
        .duration
        .record(started.elapsed().as_secs_f64(), &attributes);

    response
}
