//! Error and denial types for Basic authentication.

use thiserror::Error;
use warden_helper::PoolError;

/// Result alias for authenticator construction.
pub type BasicResult<T> = Result<T, BasicError>;

/// Reasons a header value could not be turned into credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload is missing, not base64, or carries line breaks.
    #[error("malformed Basic credentials")]
    Malformed,
    /// The decoded payload has no `user:password` separator.
    #[error(
        "no password was present in the authorization header; this is most likely a client bug"
    )]
    NoPassword {
        /// Username as presented.
        username: String,
    },
    /// The decoded password is empty.
    #[error("empty passwords are not permitted")]
    EmptyPassword {
        /// Username as presented.
        username: String,
    },
}

impl DecodeError {
    /// Username recovered before decoding failed, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Malformed => None,
            Self::NoPassword { username } | Self::EmptyPassword { username } => Some(username),
        }
    }

    /// Stable label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NoPassword { .. } => "no_password",
            Self::EmptyPassword { .. } => "empty_password",
        }
    }
}

/// Why a request was not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthDenial {
    /// Header payload could not be decoded.
    #[error("malformed Basic credentials")]
    Malformed,
    /// Header carried a username but no password separator.
    #[error(
        "no password was present in the authorization header; this is most likely a client bug"
    )]
    NoPassword,
    /// Header carried an empty password.
    #[error("empty passwords are not permitted")]
    EmptyPassword,
    /// The verifier rejected the credentials, optionally explaining why.
    #[error("credentials were rejected by the verifier")]
    VerificationFailed(Option<String>),
    /// The verifier pool refused the request.
    #[error("credential verifier is unavailable")]
    PoolUnavailable,
    /// The authenticator is shutting down.
    #[error("authentication is shutting down")]
    ShuttingDown,
}

impl AuthDenial {
    /// Text suitable for an error page: the verifier's reason when it gave
    /// one, otherwise the fixed message.
    #[must_use]
    pub fn deny_message(&self) -> String {
        match self {
            Self::VerificationFailed(Some(reason)) => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Stable label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NoPassword => "no_password",
            Self::EmptyPassword => "empty_password",
            Self::VerificationFailed(_) => "failed",
            Self::PoolUnavailable => "unavailable",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl From<DecodeError> for AuthDenial {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed => Self::Malformed,
            DecodeError::NoPassword { .. } => Self::NoPassword,
            DecodeError::EmptyPassword { .. } => Self::EmptyPassword,
        }
    }
}

/// Failures raised by a [`crate::CredentialVerifier`] instead of a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifierError {
    /// The request was never accepted by the verifier pool.
    #[error("verifier pool rejected the request")]
    Unavailable {
        /// Pool admission failure.
        #[source]
        source: PoolError,
    },
    /// The request was accepted but no verdict came back.
    #[error("verifier did not produce a verdict")]
    NoVerdict {
        /// Helper failure.
        #[source]
        source: PoolError,
    },
    /// The verification task ended without producing a result.
    #[error("verification was abandoned before completing")]
    Abandoned,
}

impl From<PoolError> for VerifierError {
    fn from(source: PoolError) -> Self {
        if source.is_admission_failure() {
            Self::Unavailable { source }
        } else {
            Self::NoVerdict { source }
        }
    }
}

impl From<VerifierError> for AuthDenial {
    fn from(err: VerifierError) -> Self {
        match err {
            VerifierError::Unavailable { .. } => Self::PoolUnavailable,
            VerifierError::NoVerdict { source } => Self::VerificationFailed(Some(source.to_string())),
            VerifierError::Abandoned => {
                Self::VerificationFailed(Some(VerifierError::Abandoned.to_string()))
            }
        }
    }
}

/// Failures constructing the authenticator.
#[derive(Debug, Error)]
pub enum BasicError {
    /// Construction happened outside a Tokio runtime.
    #[error("Basic authenticator requires a Tokio runtime")]
    Runtime {
        /// Runtime lookup failure.
        #[source]
        source: tokio::runtime::TryCurrentError,
    },
    /// The helper pool could not be started.
    #[error("failed to start the credential helper pool")]
    HelperPool {
        /// Pool start failure.
        #[source]
        source: PoolError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn decode_errors_map_to_matching_denials() {
        assert_eq!(AuthDenial::from(DecodeError::Malformed), AuthDenial::Malformed);
        assert_eq!(
            AuthDenial::from(DecodeError::NoPassword {
                username: "alice".into()
            }),
            AuthDenial::NoPassword
        );
        assert_eq!(
            AuthDenial::from(DecodeError::EmptyPassword {
                username: "alice".into()
            }),
            AuthDenial::EmptyPassword
        );
    }

    #[test]
    fn deny_message_prefers_verifier_reason() {
        let denial = AuthDenial::VerificationFailed(Some("account locked".into()));
        assert_eq!(denial.deny_message(), "account locked");
        assert_eq!(
            AuthDenial::VerificationFailed(None).deny_message(),
            "credentials were rejected by the verifier"
        );
        assert_eq!(
            AuthDenial::EmptyPassword.deny_message(),
            "empty passwords are not permitted"
        );
    }

    #[test]
    fn pool_errors_split_into_unavailable_and_failed() {
        let overloaded = VerifierError::from(PoolError::Overloaded { queue_limit: 2 });
        assert!(matches!(overloaded, VerifierError::Unavailable { .. }));
        assert_eq!(AuthDenial::from(overloaded), AuthDenial::PoolUnavailable);

        let timeout = VerifierError::from(PoolError::Timeout {
            timeout: Duration::from_secs(5),
        });
        assert_eq!(
            AuthDenial::from(timeout),
            AuthDenial::VerificationFailed(Some("helper did not reply in time".into()))
        );
    }
}
