//! Token credentials consumed by the challenge policy.
//!
//! The policy never talks to Entra ID itself. It hands the scope and tenant
//! discovered from a Key Vault challenge to a [`TokenCredential`] and caches
//! whatever [`AccessToken`] comes back.
//!
//! [`ClientSecretCredential`] is the bundled implementation: the OAuth2
//! client credentials grant sent through any Tower HTTP service.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;

pub mod client_secret;

pub use client_secret::ClientSecretCredential;

/// Upper bound on the lifetime of a token, whatever the issuer claims.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Parameters of a single token request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequestOptions {
    /// Scopes the token must be valid for, e.g. `https://vault.azure.net/.default`.
    pub scopes: Vec<String>,

    /// Tenant to authenticate in. `None` lets the credential use its own default.
    pub tenant_id: Option<String>,
}

impl TokenRequestOptions {
    pub fn new(scope: impl Into<String>, tenant_id: Option<String>) -> Self {
        TokenRequestOptions {
            scopes: vec![scope.into()],
            tenant_id,
        }
    }
}

/// An access token together with the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Instant,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: Instant) -> Self {
        AccessToken {
            token: token.into(),
            expires_on,
        }
    }

    /// A token that expires `lifetime` from now.
    ///
    /// Lifetimes above [`MAX_TOKEN_LIFETIME`] are clamped to it.
    pub fn expiring_in(token: impl Into<String>, lifetime: Duration) -> Self {
        let now = Instant::now();
        let expires_on = now
            .checked_add(lifetime.min(MAX_TOKEN_LIFETIME))
            .unwrap_or(now);
        Self::new(token, expires_on)
    }
}

// Keep the token itself out of logs and panic messages.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Errors a credential can report while acquiring a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("HTTP request to token endpoint failed: {0}")]
    Http(String),

    #[error("Token endpoint returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("Token endpoint returned error (HTTP {status}): {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// Something that can produce access tokens for a set of scopes.
///
/// Implementations do their own retrying, if any. Errors are surfaced to the
/// caller of the policy unchanged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(
        &self,
        options: TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError>;
}
