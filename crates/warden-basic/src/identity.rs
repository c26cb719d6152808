//! Authentication outcomes and challenge headers.

use tokio::time::Instant;

use crate::error::AuthDenial;

/// Who a request claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Credentials were decoded for this user.
    Basic {
        /// Username as rendered for logs.
        username: String,
        /// When the verdict for this user was last established.
        checked_at: Instant,
    },
    /// Credentials could not be decoded.
    Broken {
        /// Whatever username could be recovered.
        username: Option<String>,
    },
}

impl Identity {
    /// Username for access logging.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Basic { username, .. } => Some(username),
            Self::Broken { username } => username.as_deref(),
        }
    }
}

/// Final answer for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The request is authenticated as this identity.
    Authenticated(Identity),
    /// The request is not authenticated.
    Denied {
        /// Identity as far as it could be established.
        identity: Identity,
        /// Reason for the denial.
        denial: AuthDenial,
    },
}

impl AuthOutcome {
    pub(crate) const fn denied(identity: Identity, denial: AuthDenial) -> Self {
        Self::Denied { identity, denial }
    }

    pub(crate) const fn shutting_down(username: Option<String>) -> Self {
        Self::denied(Identity::Broken { username }, AuthDenial::ShuttingDown)
    }

    /// True only for a verified Basic identity.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(Identity::Basic { .. }))
    }

    /// Identity attached to the outcome.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        match self {
            Self::Authenticated(identity) | Self::Denied { identity, .. } => identity,
        }
    }

    /// Denial reason, if the request was not authenticated.
    #[must_use]
    pub const fn denial(&self) -> Option<&AuthDenial> {
        match self {
            Self::Authenticated(_) => None,
            Self::Denied { denial, .. } => Some(denial),
        }
    }
}

/// Header a challenge is emitted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeSlot {
    /// Origin-server authentication.
    WwwAuthenticate,
    /// Proxy authentication.
    ProxyAuthenticate,
}

impl ChallengeSlot {
    /// HTTP header name for this slot.
    #[must_use]
    pub const fn header_name(self) -> &'static str {
        match self {
            Self::WwwAuthenticate => "WWW-Authenticate",
            Self::ProxyAuthenticate => "Proxy-Authenticate",
        }
    }
}

/// A challenge header ready to be added to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Header name.
    pub header: &'static str,
    /// Header value, `Basic realm="<realm>"`.
    pub value: String,
}

impl Challenge {
    pub(crate) fn basic(slot: ChallengeSlot, realm: &str) -> Self {
        Self {
            header: slot.header_name(),
            value: format!("Basic realm=\"{realm}\""),
        }
    }
}
