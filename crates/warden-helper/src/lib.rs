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

//! Pool of external helper processes speaking a one-line request/reply protocol.
//!
//! Each worker slot owns at most one child process. Requests are written to the
//! child's stdin and replies read from its stdout, one line each. With
//! `concurrency > 1` every line is prefixed by a numeric channel id so replies
//! can arrive out of order.

pub mod config;
pub mod error;
pub mod pool;
mod worker;

pub use config::HelperPoolConfig;
pub use error::{PoolError, PoolResult};
pub use pool::{HelperPool, PendingReply, PoolStats};
