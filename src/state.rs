// SPDX-License-Identifier: MIT
//! Shared, read-only state handed to every route handler.
use crate::settings::GrafanaSettings;
use crate::telemetry::{TelemetryFlusher, INSTRUMENTATION_SCOPE};
use opentelemetry::global::{self, BoxedTracer};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    settings: Arc<GrafanaSettings>,
    service_name: Arc<str>,
    flusher: TelemetryFlusher,
    tracer: Arc<BoxedTracer>,
}

impl AppState {
    pub fn new(
        settings: GrafanaSettings,
        service_name: impl Into<Arc<str>>,
        flusher: TelemetryFlusher,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            service_name: service_name.into(),
            flusher,
            tracer: Arc::new(global::tracer(INSTRUMENTATION_SCOPE)),
        }
    }

    /// Record spans with `tracer` instead of the global one.
    pub fn with_tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    pub fn settings(&self) -> &GrafanaSettings {
        &self.settings
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn flusher(&self) -> &TelemetryFlusher {
        &self.flusher
    }

    /// Tracer captured when the state was built; install telemetry first.
    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }
}
