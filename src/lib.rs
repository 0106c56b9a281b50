//! Azure Key Vault challenge-based authentication for Tower HTTP stacks.
//!
//! Key Vault and Managed HSM only reveal which Entra ID tenant and which
//! resource a caller must authenticate against through a `401` response's
//! `WWW-Authenticate` header. The [`client::ChallengePolicyLayer`] discovers
//! that challenge once, caches a bearer token obtained from a
//! [`credential::TokenCredential`], and retries a request exactly once when
//! the service rejects the token.
//!
//! - [`client`]: the challenge parser, token cache and Tower middleware.
//! - [`credential`]: the token credential capability and a client-secret
//!   implementation.
//! - [`secrets`]: a thin Key Vault secrets client that runs over the
//!   middleware.
//! - [`config`]: layered TOML/environment configuration.

pub mod client;
pub mod config;
pub mod credential;
pub mod path;
pub mod secrets;
