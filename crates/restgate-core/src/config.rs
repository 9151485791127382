//! Configuration loading and validation.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::streams::StreamsConfiguration;

/// Top-level restgate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restconf: Option<RestconfConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<StreamsConfiguration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Where and how the HTTP front end listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestconfConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Mount path of the protocol handler (e.g. "/restconf").
    #[serde(default = "default_context_path")]
    pub context_path: String,

    /// Upper bound on graceful listener shutdown before in-flight requests are dropped.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for RestconfConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            context_path: default_context_path(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8888
}

fn default_context_path() -> String {
    "/restconf".into()
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "restgate_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Host, port and context path of the gateway, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    host: IpAddr,
    port: u16,
    context_path: String,
}

impl ListenAddress {
    /// Build a listen address, normalizing the context path.
    ///
    /// The path must start with `/`; a trailing `/` is dropped. The bare
    /// root `/` is rejected since it would shadow the discovery mount.
    pub fn new(host: IpAddr, port: u16, context_path: &str) -> Result<Self> {
        let context_path = normalize_context_path(context_path)?;
        Ok(Self {
            host,
            port,
            context_path,
        })
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn normalize_context_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if !trimmed.starts_with('/') {
        return Err(GatewayError::Configuration(format!(
            "Context path '{path}' must start with '/'"
        )));
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.is_empty() {
        return Err(GatewayError::Configuration(
            "Context path cannot be the root '/'".into(),
        ));
    }
    if normalized.contains("//") || normalized.contains(['{', '}', '*', '?', '#']) {
        return Err(GatewayError::Configuration(format!(
            "Context path '{path}' contains invalid characters"
        )));
    }
    Ok(normalized.to_string())
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| GatewayError::Configuration(e.to_string()))
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn restconf(&self) -> RestconfConfig {
        self.restconf.clone().unwrap_or_default()
    }

    pub fn streams(&self) -> StreamsConfiguration {
        self.streams.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Resolve the configured bind address, port and context path.
    pub fn listen_address(&self) -> Result<ListenAddress> {
        let restconf = self.restconf();
        let host: IpAddr = restconf.bind.parse().map_err(|e| {
            GatewayError::Configuration(format!("Invalid bind address '{}': {e}", restconf.bind))
        })?;
        ListenAddress::new(host, restconf.port, &restconf.context_path)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.restconf().shutdown_timeout_ms)
    }

    /// Get a config value by dotted path (e.g. "restconf.port").
    ///
    /// Resolves against the effective sections, so unset values report
    /// their defaults.
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::json!({
            "restconf": self.restconf(),
            "streams": self.streams(),
            "logging": self.logging(),
        });
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Err(e) = self.listen_address() {
            errors.push(e.to_string());
        }

        if let Some(streams) = &self.streams {
            if let Err(e) = streams.validate() {
                errors.push(e.to_string());
            }
        }

        if let Some(rc) = &self.restconf {
            if rc.port == 0 {
                warnings.push("Port 0 binds an ephemeral port chosen by the OS".to_string());
            }
            if rc.shutdown_timeout_ms == 0 {
                warnings.push(
                    "shutdown_timeout_ms is 0: in-flight requests are dropped on stop".to_string(),
                );
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown log format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for restgate data: `~/.restgate/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".restgate")
}
