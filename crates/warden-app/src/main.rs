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

//! Binary entrypoint: reads `Proxy-Authorization` values from stdin and
//! prints one verdict per line.

use warden_app::{AppResult, run_app};

/// Bootstraps the authenticator and runs until stdin closes or Ctrl-C.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
