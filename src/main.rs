// SPDX-License-Identifier: MIT
use grafana_otel_demo::routes::NOT_SET;
use grafana_otel_demo::settings::{GrafanaSettings, ServerConfig};
use grafana_otel_demo::telemetry::{init_telemetry, TelemetryConfig};
use grafana_otel_demo::{run_server_with_config, supervise, AppState};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    // A missing .env file is normal.
    dotenvy::dotenv().ok();

    let (settings, file_error) = GrafanaSettings::load();
    let telemetry_config = TelemetryConfig::from_settings(&settings);

    let telemetry = match init_telemetry(telemetry_config.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to initialise telemetry: {e:#}");
            return;
        }
    };

    if let Some(e) = file_error {
        warn!(error = %e, "ignoring settings file");
    }
    info!(
        endpoint = settings.endpoint().unwrap_or(NOT_SET),
        instance_id = settings.instance_id(),
        auth = settings.auth_scheme().as_str(),
        grafana_configured = settings.is_configured(),
        "application started"
    );

    let state = AppState::new(settings, telemetry_config.service_name, telemetry.flusher());

    supervise(
        async move {
            let server = ServerConfig::from_env()?;
            run_server_with_config(server, state).await
        },
        move || {
            info!("flushing telemetry");
            if let Err(e) = telemetry.shutdown() {
                eprintln!("telemetry shutdown reported errors: {e:#}");
            }
        },
    )
    .await;
}
