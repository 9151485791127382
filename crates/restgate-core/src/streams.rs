//! Notification streams configuration handed to the protocol handler.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Per-deployment settings for notification streams.
///
/// Integers are signed: a negative value in the config file deserializes
/// and is then rejected by [`validate`](Self::validate) with a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamsConfiguration {
    /// Maximum length of a single notification fragment (0 = unlimited).
    #[serde(default)]
    pub maximum_fragment_length: i64,

    /// Idle timeout for stream sessions, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: i64,

    /// Heartbeat interval for stream sessions, in milliseconds (0 = disabled).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: i64,

    /// Serve streams as server-sent events instead of WebSockets.
    #[serde(default)]
    pub use_sse: bool,

    /// Absolute base URI advertised in stream locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_uri: Option<String>,
}

fn default_idle_timeout_ms() -> i64 {
    30_000
}

fn default_heartbeat_interval_ms() -> i64 {
    10_000
}

impl Default for StreamsConfiguration {
    fn default() -> Self {
        Self {
            maximum_fragment_length: 0,
            idle_timeout_ms: default_idle_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            use_sse: false,
            base_uri: None,
        }
    }
}

impl StreamsConfiguration {
    /// Check the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.maximum_fragment_length < 0 {
            return Err(GatewayError::Configuration(format!(
                "maximum_fragment_length must not be negative (got {})",
                self.maximum_fragment_length
            )));
        }
        if self.idle_timeout_ms < 0 {
            return Err(GatewayError::Configuration(format!(
                "idle_timeout_ms must not be negative (got {})",
                self.idle_timeout_ms
            )));
        }
        if self.heartbeat_interval_ms < 0 {
            return Err(GatewayError::Configuration(format!(
                "heartbeat_interval_ms must not be negative (got {})",
                self.heartbeat_interval_ms
            )));
        }
        if self.idle_timeout_ms > 0
            && self.heartbeat_interval_ms > 0
            && self.heartbeat_interval_ms >= self.idle_timeout_ms
        {
            return Err(GatewayError::Configuration(format!(
                "heartbeat_interval_ms ({}) must be shorter than idle_timeout_ms ({})",
                self.heartbeat_interval_ms, self.idle_timeout_ms
            )));
        }
        if let Some(uri) = &self.base_uri {
            let parsed = url::Url::parse(uri).map_err(|e| {
                GatewayError::Configuration(format!("Invalid streams base_uri '{uri}': {e}"))
            })?;
            if parsed.cannot_be_a_base() {
                return Err(GatewayError::Configuration(format!(
                    "Streams base_uri '{uri}' cannot be used as a base"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let streams = StreamsConfiguration::default();
        assert_eq!(streams.idle_timeout_ms, 30_000);
        assert_eq!(streams.heartbeat_interval_ms, 10_000);
        assert!(streams.validate().is_ok());
    }

    #[test]
    fn test_negative_fragment_length_rejected() {
        let streams = StreamsConfiguration {
            maximum_fragment_length: -1,
            ..Default::default()
        };
        let err = streams.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert!(err.to_string().contains("maximum_fragment_length"));
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_idle_timeout() {
        let streams = StreamsConfiguration {
            idle_timeout_ms: 1_000,
            heartbeat_interval_ms: 1_000,
            ..Default::default()
        };
        assert!(streams.validate().is_err());

        let disabled = StreamsConfiguration {
            idle_timeout_ms: 1_000,
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_base_uri_validation() {
        let relative = StreamsConfiguration {
            base_uri: Some("/streams".into()),
            ..Default::default()
        };
        assert!(matches!(
            relative.validate(),
            Err(GatewayError::Configuration(_))
        ));

        let opaque = StreamsConfiguration {
            base_uri: Some("mailto:ops@example.com".into()),
            ..Default::default()
        };
        assert!(opaque.validate().is_err());

        let absolute = StreamsConfiguration {
            base_uri: Some("http://192.0.2.10:8888/streams".into()),
            ..Default::default()
        };
        assert!(absolute.validate().is_ok());
    }

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let streams: StreamsConfiguration =
            serde_json::from_str(r#"{ "use_sse": true }"#).unwrap();
        assert!(streams.use_sse);
        assert_eq!(streams.idle_timeout_ms, 30_000);
        assert_eq!(streams.maximum_fragment_length, 0);
    }
}
