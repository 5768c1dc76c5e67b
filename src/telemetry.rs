// SPDX-License-Identifier: MIT
//! Telemetry initialization: console output plus OTLP export to Grafana.
//!
//! The public API is small:
//!
//! * [`TelemetryConfig`] – resource metadata and the optional remote export settings.
//! * [`ExportSettings`] – endpoint, `Authorization` header and wire protocol for OTLP.
//! * [`init_telemetry`] – builds providers and installs the global subscriber.
//! * [`TelemetryHandle`] – explicit flush/shutdown at process exit.
//! * [`TelemetryFlusher`] – cloneable, bounded flush used while serving requests.
//!
//! Feature flags (Cargo features) influence behavior:
//!
//! * `console-log` – compact console formatting layer (on by default).
//! * `otlp-log` – OTLP log exporter + tracing bridge (on by default).
//! * `metrics` – OTLP metrics exporter, used by the HTTP request metrics middleware.
//!
//! Spans are always recorded through an SDK tracer provider so trace and span ids are
//! real even when nothing is exported. Without [`ExportSettings`] the service runs in
//! console-only mode; that is a normal state, not an error.
//!
//! # Example
//! ```no_run
//! use grafana_otel_demo::settings::GrafanaSettings;
//! use grafana_otel_demo::telemetry::{init_telemetry, TelemetryConfig};
//! fn main() -> anyhow::Result<()> {
//!     let settings = GrafanaSettings::unconfigured();
//!     let handle = init_telemetry(TelemetryConfig::from_settings(&settings))?;
//!     // ... application logic ...
//!     handle.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! # Threading Model
//! Batch exporters run on their own worker threads using the blocking HTTP client.
//! [`TelemetryFlusher::flush`] therefore hops onto the blocking pool before waiting.
use crate::settings::GrafanaSettings;
use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
#[cfg(feature = "otlp-log")]
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
#[cfg(feature = "otlp-log")]
use opentelemetry_otlp::LogExporter;
#[cfg(feature = "metrics")]
use opentelemetry_otlp::MetricExporter;
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig, WithHttpConfig};
#[cfg(feature = "otlp-log")]
use opentelemetry_sdk::logs::SdkLoggerProvider;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing_opentelemetry::OpenTelemetryLayer;
#[cfg(feature = "otlp-log")]
use tracing_subscriber::filter::filter_fn;
#[cfg(feature = "console-log")]
use tracing_subscriber::fmt as fmt_layer;
#[cfg(any(not(feature = "console-log"), not(feature = "otlp-log")))]
use tracing_subscriber::layer::Identity;
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "otlp-log")]
use tracing_subscriber::Layer as _;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Instrumentation scope used for tracers and meters created by this crate.
pub const INSTRUMENTATION_SCOPE: &str = "grafana-otel-demo";

/// Wire protocol name matching [`ExportSettings::protocol`].
pub const OTLP_PROTOCOL: &str = "http/protobuf";

/// Configuration used when initializing telemetry.
///
/// Resource values are sourced from environment variables if available:
/// * `OTEL_SERVICE_NAME` – service name resource attribute.
/// * `RUST_ENV` – deployment environment (added as `deployment.environment`).
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Service name reported in resource attributes (`service.name`).
    pub service_name: String,
    /// Service version reported in resource attributes (`service.version`).
    pub service_version: String,
    /// Deployment environment reported as `deployment.environment`.
    pub environment: String,
    /// Remote OTLP export; `None` means console only.
    pub export: Option<ExportSettings>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "grafana-otel-demo".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".into()),
            export: None,
        }
    }
}

impl TelemetryConfig {
    /// Default resource metadata plus export settings derived from `settings`.
    pub fn from_settings(settings: &GrafanaSettings) -> Self {
        Self {
            export: ExportSettings::from_settings(settings),
            ..Self::default()
        }
    }
}

/// Settings handed to every OTLP exporter: base endpoint, headers and protocol.
///
/// These are the values the SDK would otherwise pick up from
/// `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_EXPORTER_OTLP_HEADERS` and
/// `OTEL_EXPORTER_OTLP_PROTOCOL`; they are passed to the builders directly.
#[derive(Clone)]
pub struct ExportSettings {
    /// Base OTLP endpoint without trailing slash or per-signal suffix.
    pub endpoint: String,
    /// Headers attached to every export request.
    pub headers: HashMap<String, String>,
    pub protocol: Protocol,
}

impl ExportSettings {
    /// Returns `None` when the settings leave remote export disabled.
    pub fn from_settings(settings: &GrafanaSettings) -> Option<Self> {
        let endpoint = settings.endpoint()?.trim_end_matches('/').to_string();
        let credential = settings.credential()?;
        let headers = HashMap::from([(
            "Authorization".to_string(),
            format!("Basic {credential}"),
        )]);
        Some(Self {
            endpoint,
            headers,
            protocol: Protocol::HttpBinary,
        })
    }

    /// Full URL for one signal, e.g. `signal_endpoint("traces")` → `<base>/v1/traces`.
    pub fn signal_endpoint(&self, signal: &str) -> String {
        format!("{}/v1/{signal}", self.endpoint)
    }
}

impl fmt::Debug for ExportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&String> = self.headers.keys().collect();
        f.debug_struct("ExportSettings")
            .field("endpoint", &self.endpoint)
            .field("headers", &header_names)
            .field("protocol", &self.protocol)
            .finish()
    }
}

struct Exporters {
    span: SpanExporter,
    #[cfg(feature = "otlp-log")]
    log: LogExporter,
    #[cfg(feature = "metrics")]
    metric: MetricExporter,
}

fn build_exporters(export: &ExportSettings) -> Result<Exporters> {
    let span = SpanExporter::builder()
        .with_http()
        .with_protocol(export.protocol)
        .with_endpoint(export.signal_endpoint("traces"))
        .with_headers(export.headers.clone())
        .build()
        .context("failed to build OTLP span exporter")?;

    #[cfg(feature = "otlp-log")]
    let log = LogExporter::builder()
        .with_http()
        .with_protocol(export.protocol)
        .with_endpoint(export.signal_endpoint("logs"))
        .with_headers(export.headers.clone())
        .build()
        .context("failed to build OTLP log exporter")?;

    #[cfg(feature = "metrics")]
    let metric = MetricExporter::builder()
        .with_http()
        .with_protocol(export.protocol)
        .with_endpoint(export.signal_endpoint("metrics"))
        .with_headers(export.headers.clone())
        .build()
        .context("failed to build OTLP metric exporter")?;

    Ok(Exporters {
        span,
        #[cfg(feature = "otlp-log")]
        log,
        #[cfg(feature = "metrics")]
        metric,
    })
}

/// Targets of the exporter's own HTTP stack. Their events must not be fed back into
/// the OTLP log pipeline.
#[cfg_attr(not(feature = "otlp-log"), allow(dead_code))]
fn is_exporter_internal(target: &str) -> bool {
    ["hyper", "h2", "reqwest", "tonic", "opentelemetry"]
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

#[derive(Clone)]
struct Providers {
    tracer: SdkTracerProvider,
    #[cfg(feature = "otlp-log")]
    logger: Option<SdkLoggerProvider>,
    #[cfg(feature = "metrics")]
    meter: Option<SdkMeterProvider>,
}

impl Providers {
    fn force_flush(&self) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(e) = self.tracer.force_flush() {
            errs.push(format!("tracer: {e}"));
        }
        #[cfg(feature = "otlp-log")]
        if let Some(Err(e)) = self.logger.as_ref().map(SdkLoggerProvider::force_flush) {
            errs.push(format!("logger: {e}"));
        }
        #[cfg(feature = "metrics")]
        if let Some(Err(e)) = self.meter.as_ref().map(SdkMeterProvider::force_flush) {
            errs.push(format!("meter: {e}"));
        }
        combine(errs)
    }

    fn shutdown(&self) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(e) = self.tracer.shutdown() {
            errs.push(format!("tracer: {e}"));
        }
        #[cfg(feature = "otlp-log")]
        if let Some(Err(e)) = self.logger.as_ref().map(SdkLoggerProvider::shutdown) {
            errs.push(format!("logger: {e}"));
        }
        #[cfg(feature = "metrics")]
        if let Some(Err(e)) = self.meter.as_ref().map(SdkMeterProvider::shutdown) {
            errs.push(format!("meter: {e}"));
        }
        combine(errs)
    }
}

fn combine(errs: Vec<String>) -> Result<()> {
    if errs.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(errs.join(", "))
    }
}

/// Handle allowing explicit synchronous shutdown of telemetry providers.
///
/// Dropping the handle without calling [`TelemetryHandle::shutdown`] may lose the
/// final batches. Call `shutdown()` once, just before process exit.
pub struct TelemetryHandle {
    providers: Providers,
    exporting: bool,
}

impl TelemetryHandle {
    /// Whether records leave the process through OTLP.
    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    /// A cloneable flush handle for request handlers.
    pub fn flusher(&self) -> TelemetryFlusher {
        TelemetryFlusher {
            providers: self.exporting.then(|| self.providers.clone()),
        }
    }

    /// Flush and shutdown all configured telemetry providers.
    ///
    /// Returns `Ok(())` if every provider shut down cleanly. Otherwise the messages of
    /// each failing provider are combined into one error.
    pub fn shutdown(self) -> Result<()> {
        self.providers.shutdown()
    }
}

/// Forces pending telemetry out to the remote endpoint, bounded by a timeout.
///
/// The default value flushes nothing, which is what console-only mode needs.
#[derive(Clone, Default)]
pub struct TelemetryFlusher {
    providers: Option<Providers>,
}

impl TelemetryFlusher {
    /// Flush every exporting provider, giving up after `timeout`.
    ///
    /// # Errors
    /// Returns an error if the timeout elapses or a provider reports a failure.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let Some(providers) = self.providers.clone() else {
            return Ok(());
        };
        let task = tokio::task::spawn_blocking(move || providers.force_flush());
        tokio::time::timeout(timeout, task)
            .await
            .context("telemetry flush timed out")?
            .context("telemetry flush task failed")?
    }
}

/// Initialize logging and tracing for the application.
///
/// Installs a global tracer provider (and meter provider with the `metrics` feature)
/// and a subscriber registry made of an `EnvFilter` (`RUST_LOG`, default `info`),
/// the console layer, the OTLP log bridge and the OpenTelemetry span layer.
///
/// If the OTLP exporters cannot be built the service falls back to console-only
/// output and logs a warning.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init_telemetry(cfg: TelemetryConfig) -> Result<TelemetryHandle> {
    let resource = Resource::builder()
        .with_service_name(cfg.service_name.clone())
        .with_attributes([
            KeyValue::new("service.version", cfg.service_version.clone()),
            KeyValue::new("deployment.environment", cfg.environment.clone()),
        ])
        .build();

    let (exporters, export_error) = match cfg.export.as_ref().map(build_exporters).transpose() {
        Ok(exporters) => (exporters, None),
        Err(e) => (None, Some(e)),
    };
    let exporting = exporters.is_some();

    let mut tracer_builder = SdkTracerProvider::builder().with_resource(resource.clone());
    #[cfg(feature = "otlp-log")]
    let mut logger: Option<SdkLoggerProvider> = None;
    #[cfg(feature = "metrics")]
    let mut meter: Option<SdkMeterProvider> = None;

    if let Some(exporters) = exporters {
        tracer_builder = tracer_builder.with_batch_exporter(exporters.span);

        #[cfg(feature = "otlp-log")]
        {
            logger = Some(
                SdkLoggerProvider::builder()
                    .with_batch_exporter(exporters.log)
                    .with_resource(resource.clone())
                    .build(),
            );
        }

        #[cfg(feature = "metrics")]
        {
            let provider = SdkMeterProvider::builder()
                .with_periodic_exporter(exporters.metric)
                .with_resource(resource.clone())
                .build();
            global::set_meter_provider(provider.clone());
            meter = Some(provider);
        }
    }

    let tracer_provider = tracer_builder.build();
    global::set_tracer_provider(tracer_provider.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Console formatting: plain compact single-line output.
    #[cfg(feature = "console-log")]
    let console_layer = Some(
        fmt_layer::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .compact(),
    );
    #[cfg(not(feature = "console-log"))]
    let console_layer: Option<Identity> = None;

    #[cfg(feature = "otlp-log")]
    let bridge_layer = logger.as_ref().map(|provider| {
        OpenTelemetryTracingBridge::new(provider)
            .with_filter(filter_fn(|meta| !is_exporter_internal(meta.target())))
    });
    #[cfg(not(feature = "otlp-log"))]
    let bridge_layer: Option<Identity> = None;

    let otel_trace_layer = OpenTelemetryLayer::new(tracer_provider.tracer(INSTRUMENTATION_SCOPE));

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(bridge_layer)
        .with(otel_trace_layer)
        .try_init()
        .context("failed to install global tracing subscriber")?;

    match (&cfg.export, export_error) {
        (_, Some(e)) => tracing::warn!(
            error = %format_args!("{e:#}"),
            "remote export disabled, continuing with console output only"
        ),
        (Some(export), None) => tracing::info!(
            endpoint = %export.endpoint,
            protocol = OTLP_PROTOCOL,
            "exporting logs and traces over OTLP"
        ),
        (None, None) => tracing::info!("remote export not configured, console output only"),
    }

    Ok(TelemetryHandle {
        providers: Providers {
            tracer: tracer_provider,
            #[cfg(feature = "otlp-log")]
            logger,
            #[cfg(feature = "metrics")]
            meter,
        },
        exporting,
    })
}
