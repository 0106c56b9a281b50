//! Example: Read a secret from Azure Key Vault.
//!
//! This example demonstrates the full setup of an authenticated HTTP client:
//! 1. Load the config (file profile + `AZURE_*` environment variables)
//! 2. Build a `ClientSecretCredential` and a `ChallengePolicyLayer` from it
//! 3. Compose a Tower service stack with auth + user-agent + decompression
//! 4. Get a secret, then list the names of all secrets
//!
//! # Prerequisites
//!
//! A service principal with permission to read secrets, configured either in
//! the config file (e.g. `~/.config/azkeyvault/config.toml` on Linux) or
//! through the environment:
//!
//! ```sh
//! export AZURE_KEYVAULT_URL=https://myvault.vault.azure.net
//! export AZURE_TENANT_ID=<tenant>
//! export AZURE_CLIENT_ID=<app id>
//! export AZURE_CLIENT_SECRET=<secret>
//! ```
//!
//! # Usage
//!
//! ```sh
//! cargo run --example use_client -- <secret-name> [profile]
//! ```

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, header::USER_AGENT};
use http_body_util::Full;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use tower::ServiceBuilder;
use tower_http::{decompression::DecompressionLayer, set_header::SetRequestHeaderLayer};

use azure_keyvault_auth::{
    client::ChallengePolicyLayer, config, credential::ClientSecretCredential,
    secrets::SecretClient,
};

#[tokio::main]
async fn main() {
    // Initialize tracing. Control verbosity via the RUST_LOG env var:
    //   RUST_LOG=azure_keyvault_auth=debug cargo run --example use_client -- my-secret
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "azure_keyvault_auth=info".parse().unwrap()),
        )
        .init();

    // Both ring and aws-lc-rs may be compiled in, so pick one explicitly.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install ring crypto provider");

    let mut args = std::env::args().skip(1);
    let Some(secret_name) = args.next() else {
        eprintln!("Usage: use_client <secret-name> [profile]");
        std::process::exit(2);
    };
    let profile = args.next();

    // Step 1: Load the config.
    let cfg = config::load_config(profile.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        std::process::exit(1);
    });
    println!("Vault:      {:?}", cfg.keyvault_url);
    println!("Client ID:  {:?}", cfg.client_id);

    // Step 2: One HTTPS client serves both the token endpoint and the vault.
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_only()
        .enable_http1()
        .build();
    let http_client: Client<_, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(https_connector);

    let credential: ClientSecretCredential<_> =
        ClientSecretCredential::from_config(http_client.clone(), &cfg).unwrap_or_else(|e| {
            eprintln!("Failed to create credential: {e}");
            std::process::exit(1);
        });
    let auth_layer = ChallengePolicyLayer::from_config(&cfg, Arc::new(credential));

    // Step 3: Layers are applied top-to-bottom on the way out:
    // SetRequestHeader → ChallengePolicy → Decompression → Client.
    let service = ServiceBuilder::new()
        .layer(SetRequestHeaderLayer::overriding(
            USER_AGENT,
            HeaderValue::from_static("azure-keyvault-auth/0.1.0"),
        ))
        .layer(auth_layer)
        .layer(DecompressionLayer::new())
        .service(http_client);

    let secrets = SecretClient::from_config(service, &cfg).unwrap_or_else(|e| {
        eprintln!("Failed to create secret client: {e}");
        std::process::exit(1);
    });

    // Step 4: The first request discovers the tenant through a challenge.
    match secrets.get_secret(&secret_name, None).await {
        Ok(secret) => {
            println!("\n{secret_name}:");
            println!("  id:           {:?}", secret.id.as_ref().map(|id| id.to_string()));
            println!("  content type: {:?}", secret.content_type);
            println!("  value:        {} bytes", secret.value.map_or(0, |v| v.len()));
        }
        Err(e) => eprintln!("Failed to get secret: {e}"),
    }

    // Later requests reuse the cached challenge and token.
    let mut pager = secrets.list_secret_properties();
    println!("\nSecrets in vault:");
    while let Some(page) = pager.next_page().await {
        match page {
            Ok(properties) => {
                for property in properties {
                    if let Some(name) = property.id.as_ref().and_then(|id| id.name()) {
                        println!("  {name}");
                    }
                }
            }
            Err(e) => {
                eprintln!("Failed to list secrets: {e}");
                break;
            }
        }
    }
}
