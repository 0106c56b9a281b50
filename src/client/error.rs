//! Error types for the challenge policy.
//!
//! [`AuthError`] is generic over `E`, the inner service's error type, so
//! callers can tell transport failures apart from authentication failures
//! without boxing.

use std::fmt;

use crate::credential::CredentialError;

/// Why a `WWW-Authenticate` challenge couldn't be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    /// The header is missing, empty, or not a list of `key="value"` parameters.
    #[error("malformed authentication challenge: {0}")]
    Malformed(String),

    /// The challenge asks for a token for a resource outside the vault's domain.
    #[error(
        "challenge resource '{resource}' doesn't match the requested domain '{host}'. \
         Disable challenge resource verification in the client options to allow it"
    )]
    ResourceMismatch { resource: String, host: String },
}

/// Errors that can occur while authenticating a request.
///
/// Every variant is surfaced to the caller as-is; the policy never logs and
/// swallows a failure.
#[derive(Debug)]
pub enum AuthError<E> {
    /// An error originating from the inner HTTP service.
    Inner(E),

    /// The `WWW-Authenticate` header was missing or couldn't be parsed.
    MalformedChallenge(String),

    /// The challenge named a resource that doesn't belong to the request's host.
    ChallengeMismatch { resource: String, host: String },

    /// The credential failed to produce a token.
    Credential(CredentialError),
}

// Manual impl so `E` only needs Display where Display is used.
impl<E: fmt::Display> fmt::Display for AuthError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Inner(e) => write!(f, "inner service error: {e}"),
            AuthError::MalformedChallenge(msg) => {
                write!(f, "malformed authentication challenge: {msg}")
            }
            AuthError::ChallengeMismatch { resource, host } => write!(
                f,
                "challenge resource '{resource}' doesn't match the requested domain '{host}'"
            ),
            AuthError::Credential(e) => write!(f, "credential error: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AuthError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthError::Credential(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<CredentialError> for AuthError<E> {
    fn from(e: CredentialError) -> Self {
        AuthError::Credential(e)
    }
}

impl<E> From<ChallengeError> for AuthError<E> {
    fn from(e: ChallengeError) -> Self {
        match e {
            ChallengeError::Malformed(msg) => AuthError::MalformedChallenge(msg),
            ChallengeError::ResourceMismatch { resource, host } => {
                AuthError::ChallengeMismatch { resource, host }
            }
        }
    }
}

/// Setup-time errors raised while building a credential or policy from a
/// [`KeyVaultConfig`](crate::config::KeyVaultConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FromConfigError {
    #[error("{0} is not set in the config")]
    MissingField(&'static str),

    #[error("keyvault_url is not a valid URL: {0}")]
    InvalidVaultUrl(String),
}
