//! Key Vault challenge authentication for Tower HTTP clients.
//!
//! - [`ChallengePolicyLayer`] / [`ChallengePolicy`]: Tower middleware that
//!   discovers the tenant and scope from a `WWW-Authenticate` challenge,
//!   attaches `Authorization: Bearer` headers and retries once on `401`.
//! - [`challenge`]: the challenge parser.
//! - [`TokenCache`]: the single-token cache behind the middleware.
//! - [`AuthError`]: errors surfaced by the middleware.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//! use azure_keyvault_auth::client::ChallengePolicyLayer;
//!
//! let client = ServiceBuilder::new()
//!     .layer(ChallengePolicyLayer::new(Arc::new(credential)))
//!     .service(http_client);
//! ```

pub mod challenge;
pub mod error;
pub mod policy;
pub mod token;

#[cfg(test)]
pub(crate) mod mock;

pub use challenge::{Challenge, extract_challenge, parse_challenge};
pub use error::{AuthError, ChallengeError, FromConfigError};
pub use policy::{ChallengePolicy, ChallengePolicyLayer, ChallengePolicyOptions};
pub use token::{CachedToken, TokenCache};
