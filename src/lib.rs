// SPDX-License-Identifier: MIT
//! Demo web service that checks log and trace delivery to a Grafana OTLP endpoint.
//!
//! The crate is a thin layer of glue around `tracing` + OpenTelemetry:
//! * [`settings`] reads the endpoint, API token and instance id and derives the Basic
//!   credential once at startup.
//! * [`telemetry`] installs a console writer and the OTLP exporters.
//! * [`routes`] emits test log lines and spans on request.
//! * [`server`] hosts the routes and supervises the run.
//!
//! Without an endpoint and token the service still runs, logging to the console only.
//!
//! # Feature Flags
//! * `console-log` – compact console formatter (file/line/thread id). Default.
//! * `otlp-log` – OTLP log exporter and tracing bridge. Default.
//! * `metrics` – OTLP metrics exporter and per-request HTTP metrics.
//!
//! # Quick Start
//! ```no_run
//! use grafana_otel_demo::settings::{GrafanaSettings, ServerConfig};
//! use grafana_otel_demo::telemetry::{init_telemetry, TelemetryConfig};
//! use grafana_otel_demo::{run_server_with_config, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (settings, _) = GrafanaSettings::load();
//!     let config = TelemetryConfig::from_settings(&settings);
//!     let handle = init_telemetry(config.clone())?;
//!     let state = AppState::new(settings, config.service_name, handle.flusher());
//!     run_server_with_config(ServerConfig::from_env()?, state).await?;
//!     handle.shutdown()?;
//!     Ok(())
//! }
//! ```
#[cfg(feature = "metrics")]
pub mod http_metrics;
pub mod routes;
pub mod server;
pub mod settings;
pub mod state;
pub mod telemetry;

pub use server::{create_router, run_server_with_config, supervise};
pub use state::AppState;

#[cfg(test)]
mod tests {
    use super::settings::GrafanaSettings;
    use super::telemetry::{init_telemetry, TelemetryConfig};

    #[tokio::test]
    async fn telemetry_init_works() {
        let cfg = TelemetryConfig::from_settings(&GrafanaSettings::unconfigured());
        let handle = init_telemetry(cfg).expect("telemetry init");
        assert!(!handle.is_exporting());
        handle.shutdown().expect("shutdown");
    }
}
