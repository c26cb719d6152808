//! Error types for logging and metrics setup.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or exporting Warden metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed, or installation failed.
    #[error("failed to install the warden log subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A Warden metric could not be built, usually from a bad name or label set.
    #[error("failed to build warden metric")]
    MetricsCollector {
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// A Warden metric clashed with one already in the registry.
    #[error("failed to register warden metric")]
    MetricsRegister {
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// Rendering the registry in text exposition format failed.
    #[error("failed to render warden metrics")]
    MetricsEncode {
        /// Underlying Prometheus error.
        #[source]
        source: PrometheusError,
    },
    /// The rendered exposition was not UTF-8.
    #[error("rendered warden metrics were not valid utf-8")]
    MetricsUtf8 {
        /// Underlying conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    /// Metric the failure relates to, when there is one.
    #[must_use]
    pub const fn metric(&self) -> Option<&'static str> {
        match self {
            Self::MetricsCollector { name, .. } | Self::MetricsRegister { name, .. } => Some(*name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn registration_errors_name_the_metric() {
        let err = TelemetryError::MetricsRegister {
            name: "basic_verifications_total",
            source: PrometheusError::AlreadyReg,
        };
        assert_eq!(err.metric(), Some("basic_verifications_total"));
        assert_eq!(err.to_string(), "failed to register warden metric");
        assert!(err.source().is_some());
    }

    #[test]
    fn render_errors_carry_no_metric() -> anyhow::Result<()> {
        let Err(source) = String::from_utf8(vec![0, 159]) else {
            anyhow::bail!("expected a utf-8 error");
        };
        let err = TelemetryError::MetricsUtf8 { source };
        assert_eq!(err.metric(), None);
        assert_eq!(
            err.to_string(),
            "rendered warden metrics were not valid utf-8"
        );
        Ok(())
    }
}
