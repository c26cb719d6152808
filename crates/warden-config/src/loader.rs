//! JSON document loading.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::WardenConfig;
use crate::validate::validate_config;

/// Read, parse and validate the configuration document at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the file cannot be read,
/// [`ConfigError::Parse`] when it is not a valid document, and
/// [`ConfigError::InvalidField`] when validation fails.
pub async fn load_from_path(path: impl AsRef<Path>) -> ConfigResult<WardenConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let config: WardenConfig =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
    validate_config(&config)?;
    info!(
        path = %path.display(),
        configured = config.basic.configured(),
        "loaded configuration document"
    );
    Ok(config)
}

/// Parse and validate an in-memory configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] or [`ConfigError::InvalidField`].
pub fn parse_document(raw: &str) -> ConfigResult<WardenConfig> {
    let config: WardenConfig =
        serde_json::from_str(raw).map_err(|source| ConfigError::Parse { path: None, source })?;
    validate_config(&config)?;
    debug!("parsed inline configuration document");
    Ok(config)
}
