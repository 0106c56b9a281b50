//! A thin Key Vault secrets client.
//!
//! [`SecretClient`] builds the REST requests of the secrets API and decodes
//! their JSON answers. It doesn't authenticate on its own: give it a service
//! wrapped in a [`ChallengePolicyLayer`](crate::client::ChallengePolicyLayer).

use std::fmt;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use serde::de::DeserializeOwned;
use tower::{Service, ServiceExt};
use tracing::{debug, warn};
use url::Url;

use crate::client::error::FromConfigError;
use crate::config::KeyVaultConfig;

pub mod models;

pub use models::{
    DeletedSecret, Secret, SecretAttributes, SecretId, SecretProperties, SecretPropertiesPage,
    SetSecretParameters,
};

/// The Key Vault REST API version requests are made against.
pub const API_VERSION: &str = "7.5";

#[derive(Debug, thiserror::Error)]
pub enum SecretClientError<E> {
    #[error("secret name must not be empty")]
    EmptyName,
    #[error("failed to build request: {0}")]
    InvalidRequest(String),
    #[error("request failed: {0}")]
    Http(E),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("Key Vault returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error("failed to decode response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(serde::Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Client for the secrets of one vault.
#[derive(Clone)]
pub struct SecretClient<S> {
    http: S,
    vault_url: Url,
}

impl<S> fmt::Debug for SecretClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretClient")
            .field("vault_url", &self.vault_url.as_str())
            .finish_non_exhaustive()
    }
}

impl<S> SecretClient<S> {
    /// Create a client for the vault at `vault_url`, e.g.
    /// `https://myvault.vault.azure.net`.
    pub fn new(http: S, vault_url: &str) -> Result<Self, FromConfigError> {
        let vault_url =
            Url::parse(vault_url).map_err(|e| FromConfigError::InvalidVaultUrl(e.to_string()))?;
        if vault_url.host_str().is_none() || vault_url.cannot_be_a_base() {
            return Err(FromConfigError::InvalidVaultUrl(format!(
                "'{vault_url}' has no host"
            )));
        }

        Ok(SecretClient { http, vault_url })
    }

    /// Create a client for the `keyvault_url` of a [`KeyVaultConfig`].
    pub fn from_config(http: S, config: &KeyVaultConfig) -> Result<Self, FromConfigError> {
        let vault_url = config
            .keyvault_url
            .as_deref()
            .ok_or(FromConfigError::MissingField("keyvault_url"))?;
        Self::new(http, vault_url)
    }

    pub fn vault_url(&self) -> &str {
        self.vault_url.as_str()
    }

    fn endpoint<E>(&self, segments: &[&str]) -> Result<Url, SecretClientError<E>> {
        let mut url = self.vault_url.clone();
        url.path_segments_mut()
            .map_err(|_| SecretClientError::InvalidRequest("vault URL can't be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

impl<S, ResBody> SecretClient<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone,
    ResBody: Body,
    ResBody::Error: fmt::Display,
{
    /// Get a secret. Without a `version` the latest version is returned.
    pub async fn get_secret(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Secret, SecretClientError<S::Error>> {
        check_name(name)?;

        let url = match version {
            Some(version) if !version.is_empty() => self.endpoint(&["secrets", name, version])?,
            _ => self.endpoint(&["secrets", name])?,
        };

        self.send_json(Method::GET, url.as_str(), None).await
    }

    /// Create a secret, or add a new version to an existing one.
    pub async fn set_secret(
        &self,
        name: &str,
        parameters: &SetSecretParameters,
    ) -> Result<Secret, SecretClientError<S::Error>> {
        check_name(name)?;

        let url = self.endpoint(&["secrets", name])?;
        let body = serde_json::to_vec(parameters)?;

        self.send_json(Method::PUT, url.as_str(), Some(body)).await
    }

    /// Delete all versions of a secret.
    ///
    /// On vaults with soft-delete the secret stays recoverable until its
    /// scheduled purge date.
    pub async fn delete_secret(
        &self,
        name: &str,
    ) -> Result<DeletedSecret, SecretClientError<S::Error>> {
        check_name(name)?;

        let url = self.endpoint(&["secrets", name])?;
        self.send_json(Method::DELETE, url.as_str(), None).await
    }

    /// List the properties of every secret in the vault, page by page.
    ///
    /// Values aren't included; fetch them with [`get_secret`](Self::get_secret).
    pub fn list_secret_properties(&self) -> SecretPropertiesPager<'_, S> {
        SecretPropertiesPager {
            client: self,
            state: PagerState::Start,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, SecretClientError<S::Error>> {
        let bytes = self.send(method, url, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, SecretClientError<S::Error>> {
        debug!(method = %method, url = %url, "sending Key Vault request");

        let mut builder = Request::builder()
            .method(method)
            .uri(url)
            .header(ACCEPT, "application/json");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| SecretClientError::InvalidRequest(e.to_string()))?;

        let mut http = self.http.clone();
        let response = ServiceExt::<Request<Full<Bytes>>>::ready(&mut http)
            .await
            .map_err(SecretClientError::Http)?
            .call(request)
            .await
            .map_err(SecretClientError::Http)?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| SecretClientError::Body(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            warn!(status = status.as_u16(), "Key Vault request failed");
            return Err(service_error(status.as_u16(), &bytes));
        }

        Ok(bytes)
    }
}

fn check_name<E>(name: &str) -> Result<(), SecretClientError<E>> {
    if name.is_empty() {
        return Err(SecretClientError::EmptyName);
    }
    Ok(())
}

fn service_error<E>(status: u16, body: &[u8]) -> SecretClientError<E> {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|b| b.error);

    let code = detail
        .as_ref()
        .and_then(|d| d.code.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    SecretClientError::Service {
        status,
        code,
        message,
    }
}

enum PagerState {
    Start,
    Next(String),
    Done,
}

/// Pages of [`SecretProperties`], following Key Vault's `nextLink`.
pub struct SecretPropertiesPager<'a, S> {
    client: &'a SecretClient<S>,
    state: PagerState,
}

impl<S, ResBody> SecretPropertiesPager<'_, S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResBody>> + Clone,
    ResBody: Body,
    ResBody::Error: fmt::Display,
{
    /// Fetch the next page. `None` once the last page has been returned or
    /// after an error.
    pub async fn next_page(
        &mut self,
    ) -> Option<Result<Vec<SecretProperties>, SecretClientError<S::Error>>> {
        let url = match std::mem::replace(&mut self.state, PagerState::Done) {
            PagerState::Done => return None,
            PagerState::Next(next_link) => next_link,
            PagerState::Start => match self.client.endpoint(&["secrets"]) {
                Ok(url) => url.to_string(),
                Err(e) => return Some(Err(e)),
            },
        };

        let page = self
            .client
            .send_json::<SecretPropertiesPage>(Method::GET, &url, None)
            .await;
        let page = match page {
            Ok(page) => page,
            Err(e) => return Some(Err(e)),
        };

        if let Some(next_link) = page.next_link.filter(|link| !link.is_empty()) {
            self.state = PagerState::Next(next_link);
        }

        Some(Ok(page.value))
    }

    /// Fetch every remaining page.
    pub async fn collect_all(
        mut self,
    ) -> Result<Vec<SecretProperties>, SecretClientError<S::Error>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await {
            all.extend(page?);
        }
        Ok(all)
    }
}
