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

//! Basic proxy authentication.
//!
//! Layout: `credentials.rs` (header decoding), `cache.rs` (user records and
//! their pending queues), `coordinator.rs` (the verification state machine),
//! `verifier.rs` (verifier seam and the helper pool adapter), `protocol.rs`
//! (helper line format), `identity.rs` (outcomes and challenges).

pub mod cache;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod verifier;

pub use cache::{UserCache, UserRecord, VerificationState};
pub use coordinator::{BasicAuthenticator, BasicSettings, BasicStats, PendingOutcome, Verification};
pub use credentials::{Credentials, decode};
pub use error::{AuthDenial, BasicError, BasicResult, DecodeError, VerifierError};
pub use identity::{AuthOutcome, Challenge, ChallengeSlot, Identity};
pub use protocol::{Verdict, encode_request, parse_reply};
pub use verifier::{CredentialVerifier, HelperVerifier, helper_pool_config};
