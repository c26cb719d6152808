#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! File-backed configuration for the Basic authentication scheme.
//!
//! Layout: `model.rs` (typed settings and the directive dump), `defaults.rs`
//! (stock values), `validate.rs` (field checks), `loader.rs` (JSON loading).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_from_path, parse_document};
pub use model::{BasicAuthConfig, ChildrenConfig, LoggingSettings, WardenConfig};
pub use validate::validate_config;
