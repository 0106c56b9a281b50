//! OAuth2 client credentials grant against Microsoft Entra ID.
//!
//! Tokens are requested by POSTing a form-encoded body through a Tower HTTP
//! service owned by the credential, so token acquisition shares the transport
//! configuration (TLS, proxies, connection pool) of regular API requests but
//! never passes through the challenge policy itself.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use http::header::CONTENT_TYPE;
use http::{Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Service, ServiceExt};
use tracing::{debug, warn};

use crate::client::error::FromConfigError;
use crate::config::KeyVaultConfig;

use super::{AccessToken, CredentialError, TokenCredential, TokenRequestOptions};

/// Authority used when none is configured.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// A [`TokenCredential`] for a service principal with a client secret.
///
/// `S` is the HTTP service used to reach the token endpoint. `ReqBody` is the
/// request body type it accepts and must be constructible from [`Bytes`].
pub struct ClientSecretCredential<S, ReqBody = Full<Bytes>> {
    http: S,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    _body: PhantomData<fn() -> ReqBody>,
}

impl<S, ReqBody> ClientSecretCredential<S, ReqBody> {
    pub fn new(
        http: S,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        ClientSecretCredential {
            http,
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            _body: PhantomData,
        }
    }

    /// Use a different Entra ID authority (sovereign clouds, test servers).
    pub fn with_authority_host(mut self, authority_host: impl Into<String>) -> Self {
        self.authority_host = authority_host.into();
        self
    }

    /// Build the credential from the `tenant_id`, `client_id`, `client_secret`
    /// and optional `authority_host` of a [`KeyVaultConfig`].
    pub fn from_config(http: S, config: &KeyVaultConfig) -> Result<Self, FromConfigError> {
        let tenant_id = config
            .tenant_id
            .clone()
            .ok_or(FromConfigError::MissingField("tenant_id"))?;
        let client_id = config
            .client_id
            .clone()
            .ok_or(FromConfigError::MissingField("client_id"))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or(FromConfigError::MissingField("client_secret"))?;

        let mut credential = Self::new(http, tenant_id, client_id, client_secret);
        if let Some(authority_host) = &config.authority_host {
            credential = credential.with_authority_host(authority_host.clone());
        }
        Ok(credential)
    }

    /// The token endpoint for `tenant_id`.
    pub fn token_endpoint(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            tenant_id
        )
    }

    fn form_body(&self, scopes: &[String]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("scope", &scopes.join(" "))
            .finish()
    }
}

impl<S, ReqBody> fmt::Debug for ClientSecretCredential<S, ReqBody> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("authority_host", &self.authority_host)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S, ReqBody, ResBody> TokenCredential for ClientSecretCredential<S, ReqBody>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: fmt::Debug + Send,
    ReqBody: From<Bytes> + Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: fmt::Debug + Send,
{
    async fn get_token(
        &self,
        options: TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        if options.scopes.is_empty() {
            return Err(CredentialError::Other(
                "at least one scope is required".to_string(),
            ));
        }

        // The tenant discovered from a challenge wins over the configured one.
        let tenant_id = options.tenant_id.as_deref().unwrap_or(&self.tenant_id);
        let endpoint = self.token_endpoint(tenant_id);
        let form_body = self.form_body(&options.scopes);

        let mut http = self.http.clone();
        let http = ServiceExt::<Request<ReqBody>>::ready(&mut http)
            .await
            .map_err(|e| CredentialError::Http(format!("{e:?}")))?;

        let response = acquire_token(http, &endpoint, form_body).await?;
        let lifetime = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(AccessToken::expiring_in(response.access_token, lifetime))
    }
}

/// The relevant fields of an Entra ID token response.
#[derive(Debug, Clone)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

/// POST a form-encoded token request and parse the JSON answer.
///
/// The caller is responsible for readying `inner` first.
pub(crate) async fn acquire_token<S, ReqBody, ResBody>(
    inner: &mut S,
    endpoint: &str,
    form_body: String,
) -> Result<TokenResponse, CredentialError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Debug,
    ReqBody: From<Bytes>,
    ResBody: Body,
    ResBody::Data: Buf,
    ResBody::Error: fmt::Debug,
{
    debug!(endpoint = %endpoint, "POSTing to token endpoint");

    let body = ReqBody::from(Bytes::from(form_body));
    let request = Request::post(endpoint)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .map_err(|e| CredentialError::Http(format!("failed to build token request: {e}")))?;

    let response = inner
        .call(request)
        .await
        .map_err(|e| CredentialError::Http(format!("{e:?}")))?;

    let status = response.status();
    debug!(status = %status, "token endpoint responded");

    let bytes = BodyExt::collect(response.into_body())
        .await
        .map_err(|e| {
            CredentialError::Http(format!("failed to read token response body: {e:?}"))
        })?
        .to_bytes();

    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).to_string();
        warn!(status = status.as_u16(), "token endpoint returned error");
        return Err(CredentialError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }

    parse_token_response(&bytes)
}

fn parse_token_response(body: &[u8]) -> Result<TokenResponse, CredentialError> {
    let json: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| CredentialError::InvalidResponse(format!("invalid JSON: {e}")))?;

    let access_token = json["access_token"]
        .as_str()
        .ok_or_else(|| CredentialError::InvalidResponse("missing access_token field".into()))?
        .to_string();

    // v1 endpoints send expires_in as a string
    let expires_in = json["expires_in"]
        .as_u64()
        .or_else(|| json["expires_in"].as_str().and_then(|s| s.parse().ok()));

    Ok(TokenResponse {
        access_token,
        expires_in,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use http::StatusCode;

    use super::*;
    use crate::client::mock::MockHttpService;
    use crate::credential::MAX_TOKEN_LIFETIME;

    fn token_endpoint_response(json: serde_json::Value) -> Response<Full<Bytes>> {
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(&json).unwrap())))
            .unwrap()
    }

    #[tokio::test]
    async fn posts_client_credentials_to_challenge_tenant() {
        let mock_svc = MockHttpService::new(vec![token_endpoint_response(serde_json::json!({
            "token_type": "Bearer",
            "access_token": "kv-token",
            "expires_in": 3599
        }))]);
        let credential: ClientSecretCredential<_> =
            ClientSecretCredential::new(mock_svc.clone(), "configured-tenant", "app", "s3cr3t&=");

        let token = credential
            .get_token(TokenRequestOptions::new(
                "https://vault.azure.net/.default",
                Some("challenge-tenant".to_string()),
            ))
            .await
            .unwrap();

        assert_eq!(token.token, "kv-token");
        assert!(token.expires_on > Instant::now() + Duration::from_secs(3500));

        let captured = mock_svc.take_captured_requests();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].method, http::Method::POST);
        assert_eq!(
            captured[0].uri,
            "https://login.microsoftonline.com/challenge-tenant/oauth2/v2.0/token"
        );

        let form: Vec<(String, String)> = url::form_urlencoded::parse(&captured[0].body)
            .into_owned()
            .collect();
        assert!(form.contains(&("grant_type".into(), "client_credentials".into())));
        assert!(form.contains(&("client_id".into(), "app".into())));
        assert!(form.contains(&("client_secret".into(), "s3cr3t&=".into())));
        assert!(form.contains(&(
            "scope".into(),
            "https://vault.azure.net/.default".into()
        )));
    }

    #[tokio::test]
    async fn falls_back_to_configured_tenant_and_authority() {
        let mock_svc = MockHttpService::new(vec![token_endpoint_response(
            serde_json::json!({ "access_token": "t" }),
        )]);
        let credential: ClientSecretCredential<_> =
            ClientSecretCredential::new(mock_svc.clone(), "home", "app", "secret")
                .with_authority_host("https://login.microsoftonline.us/");

        credential
            .get_token(TokenRequestOptions::new("https://vault.usgovcloudapi.net/.default", None))
            .await
            .unwrap();

        let captured = mock_svc.take_captured_requests();
        assert_eq!(
            captured[0].uri,
            "https://login.microsoftonline.us/home/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn token_endpoint_error_is_reported_with_status() {
        let error_response = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Full::new(Bytes::from(r#"{"error":"invalid_client"}"#)))
            .unwrap();
        let credential: ClientSecretCredential<_> = ClientSecretCredential::new(
            MockHttpService::new(vec![error_response]),
            "tenant",
            "app",
            "wrong",
        );

        let err = credential
            .get_token(TokenRequestOptions::new("https://vault.azure.net/.default", None))
            .await
            .unwrap_err();

        assert!(
            matches!(&err, CredentialError::TokenEndpoint { status: 401, body } if body.contains("invalid_client")),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn empty_scopes_are_rejected_without_a_request() {
        let mock_svc = MockHttpService::new(vec![]);
        let credential: ClientSecretCredential<_> =
            ClientSecretCredential::new(mock_svc.clone(), "tenant", "app", "secret");

        let err = credential
            .get_token(TokenRequestOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Other(_)));
        assert!(mock_svc.take_captured_requests().is_empty());
    }

    #[test]
    fn from_config_requires_client_secret() {
        let config = KeyVaultConfig {
            tenant_id: Some("tenant".into()),
            client_id: Some("app".into()),
            ..Default::default()
        };

        let err = ClientSecretCredential::<_, Full<Bytes>>::from_config(
            MockHttpService::new(vec![]),
            &config,
        )
        .unwrap_err();

        assert!(matches!(err, FromConfigError::MissingField("client_secret")));
    }

    #[test]
    fn parse_token_response_accepts_string_expiry() {
        let response =
            parse_token_response(br#"{"access_token":"abc","expires_in":"3600"}"#).unwrap();
        assert_eq!(response.access_token, "abc");
        assert_eq!(response.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_clamped() {
        let mock_svc = MockHttpService::new(vec![token_endpoint_response(serde_json::json!({
            "access_token": "t",
            "expires_in": u64::MAX
        }))]);
        let credential: ClientSecretCredential<_> =
            ClientSecretCredential::new(mock_svc, "tenant", "app", "secret");

        let before = Instant::now();
        let token = credential
            .get_token(TokenRequestOptions::new(
                "https://vault.azure.net/.default",
                None,
            ))
            .await
            .unwrap();

        assert_eq!(token.token, "t");
        assert!(token.expires_on >= before + MAX_TOKEN_LIFETIME);
        assert!(token.expires_on <= Instant::now() + MAX_TOKEN_LIFETIME);
    }

    #[test]
    fn parse_token_response_rejects_missing_access_token() {
        let result = parse_token_response(br#"{"token_type":"Bearer"}"#);
        assert!(matches!(result, Err(CredentialError::InvalidResponse(_))));
    }
}
