// SPDX-License-Identifier: MIT
//! Connection settings for the remote Grafana OTLP endpoint and the HTTP listener.
//!
//! Values come from the process environment first and fall back to a JSON settings
//! file (`appsettings.json` by default) with a `Grafana` section:
//!
//! ```json
//! { "Grafana": { "OtlpEndpoint": "https://otlp-gateway.example/otlp", "ApiToken": "glc_..." } }
//! ```
//!
//! A missing endpoint or token is not an error: the service keeps running with
//! console output only.
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable holding the OTLP endpoint URL.
pub const ENDPOINT_VAR: &str = "GRAFANA_OTLP_ENDPOINT";
/// Environment variable holding the API token.
pub const API_TOKEN_VAR: &str = "GRAFANA_API_TOKEN";
/// Environment variable holding the Grafana Cloud instance id.
pub const INSTANCE_ID_VAR: &str = "GRAFANA_INSTANCE_ID";
/// Environment variable overriding the settings file location.
pub const SETTINGS_FILE_VAR: &str = "GRAFANA_SETTINGS_FILE";

pub const DEFAULT_SETTINGS_FILE: &str = "appsettings.json";
pub const DEFAULT_INSTANCE_ID: &str = "000000";

/// Tokens minted by Grafana Cloud start with this prefix and must be paired with
/// the instance id before use as Basic credentials.
pub const CLOUD_TOKEN_PREFIX: &str = "glc_";

/// Derive the Basic auth credential sent with every exported record.
///
/// Returns `None` when either the endpoint or the token is absent (or blank).
/// Cloud tokens yield `base64("<instance_id>:<token>")`; any other token is
/// assumed to be encoded already and is returned unchanged.
pub fn derive_credential(
    endpoint: Option<&str>,
    token: Option<&str>,
    instance_id: &str,
) -> Option<String> {
    endpoint.filter(|e| !e.trim().is_empty())?;
    let token = token.filter(|t| !t.trim().is_empty())?;

    if token.starts_with(CLOUD_TOKEN_PREFIX) {
        Some(STANDARD.encode(format!("{instance_id}:{token}")))
    } else {
        Some(token.to_string())
    }
}

/// How the credential was obtained; reported by the connection test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// Cloud token combined with the instance id.
    CloudToken,
    /// Token used verbatim.
    PreEncoded,
    /// Remote export disabled.
    None,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthScheme::CloudToken => "basic (instance id + cloud token)",
            AuthScheme::PreEncoded => "basic (pre-encoded token)",
            AuthScheme::None => "none",
        }
    }
}

/// Problems reading the optional settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsFileError {
    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Contents of the JSON settings file. Only the `Grafana` section is read.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileSettings {
    #[serde(rename = "Grafana", default)]
    pub grafana: GrafanaSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GrafanaSection {
    #[serde(rename = "OtlpEndpoint")]
    pub otlp_endpoint: Option<String>,
    #[serde(rename = "ApiToken")]
    pub api_token: Option<String>,
}

impl FileSettings {
    /// Read the settings file at `path`. A file that does not exist yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, SettingsFileError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SettingsFileError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SettingsFileError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Snapshot of the remote export configuration, taken once at startup.
///
/// The credential is derived in the constructor and never changes afterwards.
#[derive(Clone)]
pub struct GrafanaSettings {
    endpoint: Option<String>,
    api_token: Option<String>,
    instance_id: String,
    credential: Option<String>,
}

impl GrafanaSettings {
    pub fn new(
        endpoint: Option<String>,
        api_token: Option<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        let endpoint = non_blank(endpoint);
        let api_token = non_blank(api_token);
        let instance_id = instance_id.into();
        let credential =
            derive_credential(endpoint.as_deref(), api_token.as_deref(), &instance_id);
        Self {
            endpoint,
            api_token,
            instance_id,
            credential,
        }
    }

    /// Settings with remote export disabled.
    pub fn unconfigured() -> Self {
        Self::new(None, None, DEFAULT_INSTANCE_ID)
    }

    /// Load settings from the process environment and the settings file.
    ///
    /// Any problem with the settings file is handed back alongside the settings so
    /// it can be logged once the subscriber is installed; the file is then ignored.
    pub fn load() -> (Self, Option<SettingsFileError>) {
        let path = std::env::var(SETTINGS_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE));

        let (file, file_error) = match FileSettings::load(&path) {
            Ok(file) => (file.unwrap_or_default(), None),
            Err(e) => (FileSettings::default(), Some(e)),
        };

        (Self::resolve(|key| std::env::var(key).ok(), &file), file_error)
    }

    /// Combine an environment lookup with file settings. Non-blank environment
    /// values win over the file.
    pub fn resolve<F>(lookup: F, file: &FileSettings) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = non_blank(lookup(ENDPOINT_VAR))
            .or_else(|| non_blank(file.grafana.otlp_endpoint.clone()));
        let api_token = non_blank(lookup(API_TOKEN_VAR))
            .or_else(|| non_blank(file.grafana.api_token.clone()));
        let instance_id =
            non_blank(lookup(INSTANCE_ID_VAR)).unwrap_or_else(|| DEFAULT_INSTANCE_ID.to_string());

        Self::new(endpoint, api_token, instance_id)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn has_api_token(&self) -> bool {
        self.api_token.is_some()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The derived Basic credential, if remote export is configured.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Whether logs and traces are exported to the remote endpoint.
    pub fn is_configured(&self) -> bool {
        self.credential.is_some()
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        match (&self.credential, &self.api_token) {
            (None, _) => AuthScheme::None,
            (Some(_), Some(token)) if token.starts_with(CLOUD_TOKEN_PREFIX) => {
                AuthScheme::CloudToken
            }
            (Some(_), _) => AuthScheme::PreEncoded,
        }
    }
}

impl fmt::Debug for GrafanaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrafanaSettings")
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("instance_id", &self.instance_id)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// HTTP listener configuration.
///
/// * `HOST` – IP address or host name to bind (default `0.0.0.0`).
/// * `PORT` – port to listen on (default `8080`).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Read the listener configuration from the process environment.
    ///
    /// # Errors
    /// Returns an error if `PORT` is set but is not a valid port number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT")
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("PORT must be a valid port number")?
            .unwrap_or(8080);
        Ok(Self { host, port })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn file(endpoint: Option<&str>, token: Option<&str>) -> FileSettings {
        FileSettings {
            grafana: GrafanaSection {
                otlp_endpoint: endpoint.map(str::to_string),
                api_token: token.map(str::to_string),
            },
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("grafana-otel-demo-{}-{name}", std::process::id()))
    }

    #[test]
    fn cloud_token_is_paired_with_instance_id() {
        let credential =
            derive_credential(Some("https://otlp.example"), Some("glc_secret"), "123456");
        assert_eq!(credential.as_deref(), Some(STANDARD.encode("123456:glc_secret").as_str()));
        assert_eq!(credential.as_deref(), Some("MTIzNDU2OmdsY19zZWNyZXQ="));
    }

    #[test]
    fn other_tokens_pass_through_unchanged() {
        let credential =
            derive_credential(Some("https://otlp.example"), Some("already-encoded=="), "123456");
        assert_eq!(credential.as_deref(), Some("already-encoded=="));
    }

    #[test]
    fn missing_endpoint_or_token_disables_export() {
        assert!(derive_credential(None, Some("glc_x"), "1").is_none());
        assert!(derive_credential(Some("https://otlp.example"), None, "1").is_none());
        assert!(derive_credential(Some("  "), Some("glc_x"), "1").is_none());
    }

    #[test]
    fn environment_wins_over_file() {
        let settings = GrafanaSettings::resolve(
            env(&[(ENDPOINT_VAR, "https://env.example"), (API_TOKEN_VAR, "env-token")]),
            &file(Some("https://file.example"), Some("file-token")),
        );
        assert_eq!(settings.endpoint(), Some("https://env.example"));
        assert_eq!(settings.credential(), Some("env-token"));
    }

    #[test]
    fn file_fills_unset_and_blank_variables() {
        let settings = GrafanaSettings::resolve(
            env(&[(ENDPOINT_VAR, "   ")]),
            &file(Some("https://file.example"), Some("file-token")),
        );
        assert_eq!(settings.endpoint(), Some("https://file.example"));
        assert!(settings.has_api_token());
        assert_eq!(settings.auth_scheme(), AuthScheme::PreEncoded);
    }

    #[test]
    fn instance_id_defaults_when_unset() {
        let settings = GrafanaSettings::resolve(env(&[]), &FileSettings::default());
        assert_eq!(settings.instance_id(), DEFAULT_INSTANCE_ID);
        assert!(!settings.is_configured());
        assert_eq!(settings.auth_scheme(), AuthScheme::None);
    }

    #[test]
    fn cloud_scheme_reported_for_prefixed_token() {
        let settings = GrafanaSettings::new(
            Some("https://otlp.example".into()),
            Some("glc_abc".into()),
            "42",
        );
        assert_eq!(settings.auth_scheme(), AuthScheme::CloudToken);
        assert_eq!(settings.credential(), Some(STANDARD.encode("42:glc_abc").as_str()));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let settings = GrafanaSettings::new(
            Some("https://otlp.example".into()),
            Some("glc_topsecret".into()),
            "42",
        );
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn missing_settings_file_is_not_an_error() {
        let loaded = FileSettings::load(&temp_path("does-not-exist.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn settings_file_grafana_section_is_read() {
        let path = temp_path("appsettings.json");
        std::fs::write(
            &path,
            r#"{"Logging":{"LogLevel":"Information"},"Grafana":{"OtlpEndpoint":"https://file.example/otlp","ApiToken":"glc_file"}}"#,
        )
        .unwrap();

        let loaded = FileSettings::load(&path).unwrap().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.grafana.otlp_endpoint.as_deref(), Some("https://file.example/otlp"));
        assert_eq!(loaded.grafana.api_token.as_deref(), Some("glc_file"));
    }

    #[test]
    fn malformed_settings_file_is_reported() {
        let path = temp_path("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileSettings::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, SettingsFileError::Parse { .. }));
    }

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn server_config_keeps_host_names() {
        let config = ServerConfig::from_lookup(env(&[("HOST", "localhost"), ("PORT", "3000")]))
            .unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn server_config_rejects_invalid_port() {
        assert!(ServerConfig::from_lookup(env(&[("PORT", "http")])).is_err());
    }
}
