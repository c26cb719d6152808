//! Validation helpers for configuration documents.

use crate::error::{ConfigError, ConfigResult};
use crate::model::{BasicAuthConfig, LoggingSettings, WardenConfig};

const SECTION_BASIC: &str = "basic";
const SECTION_LOGGING: &str = "logging";

/// Validate a full configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails validation.
pub fn validate_config(config: &WardenConfig) -> ConfigResult<()> {
    validate_basic(&config.basic)?;
    validate_logging(&config.logging)
}

/// Validate the Basic scheme section.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails validation.
pub fn validate_basic(config: &BasicAuthConfig) -> ConfigResult<()> {
    if config.realm.contains(['"', '\r', '\n']) {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "realm",
            Some(config.realm.clone()),
            "contains_quote_or_line_break",
        ));
    }

    if let Some(first) = config.program.first()
        && first.trim().is_empty()
    {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "program",
            None,
            "empty_executable",
        ));
    }

    let children = &config.children;
    if !config.program.is_empty() && children.max == 0 {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "children.max",
            Some("0".to_string()),
            "zero_with_program",
        ));
    }
    if children.startup > children.max {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "children.startup",
            Some(children.startup.to_string()),
            "exceeds_max",
        ));
    }
    if children.idle > children.max {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "children.idle",
            Some(children.idle.to_string()),
            "exceeds_max",
        ));
    }
    if children.concurrency == 0 {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "children.concurrency",
            Some("0".to_string()),
            "zero",
        ));
    }
    if config.queue_limit == Some(0) {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "queue_limit",
            Some("0".to_string()),
            "zero",
        ));
    }
    if config.request_timeout_secs == Some(0) {
        return Err(ConfigError::invalid(
            SECTION_BASIC,
            "request_timeout_secs",
            Some("0".to_string()),
            "zero",
        ));
    }
    Ok(())
}

fn validate_logging(config: &LoggingSettings) -> ConfigResult<()> {
    if config.level.trim().is_empty() {
        return Err(ConfigError::invalid(
            SECTION_LOGGING,
            "level",
            None,
            "empty",
        ));
    }
    match config.format.as_deref() {
        None | Some("json" | "pretty") => Ok(()),
        Some(other) => Err(ConfigError::invalid(
            SECTION_LOGGING,
            "format",
            Some(other.to_string()),
            "unknown_format",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason_of(result: ConfigResult<()>) -> Option<(&'static str, &'static str)> {
        match result {
            Err(ConfigError::InvalidField { field, reason, .. }) => Some((field, reason)),
            _ => None,
        }
    }

    #[test]
    fn default_document_is_valid() {
        assert!(validate_config(&WardenConfig::default()).is_ok());
    }

    #[test]
    fn realm_rejects_quotes() {
        let mut config = BasicAuthConfig::default();
        config.realm = "bad\"realm".to_string();
        assert_eq!(
            reason_of(validate_basic(&config)),
            Some(("realm", "contains_quote_or_line_break"))
        );
    }

    #[test]
    fn children_bounds_are_enforced() {
        let mut config = BasicAuthConfig::default();
        config.children.startup = config.children.max + 1;
        assert_eq!(
            reason_of(validate_basic(&config)),
            Some(("children.startup", "exceeds_max"))
        );

        let mut config = BasicAuthConfig::default();
        config.children.concurrency = 0;
        assert_eq!(
            reason_of(validate_basic(&config)),
            Some(("children.concurrency", "zero"))
        );

        let mut config = BasicAuthConfig::default();
        config.program = vec!["/bin/helper".to_string()];
        config.children.max = 0;
        config.children.idle = 0;
        assert_eq!(
            reason_of(validate_basic(&config)),
            Some(("children.max", "zero_with_program"))
        );
    }

    #[test]
    fn empty_program_executable_is_rejected() {
        let mut config = BasicAuthConfig::default();
        config.program = vec!["  ".to_string()];
        assert_eq!(
            reason_of(validate_basic(&config)),
            Some(("program", "empty_executable"))
        );
    }

    #[test]
    fn logging_format_must_be_known() {
        let mut config = WardenConfig::default();
        config.logging.format = Some("xml".to_string());
        assert_eq!(
            reason_of(validate_config(&config)),
            Some(("format", "unknown_format"))
        );
    }
}
