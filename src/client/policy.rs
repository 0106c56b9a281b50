//! Tower middleware implementing Key Vault challenge-based authentication.
//!
//! Key Vault doesn't tell clients up front which tenant and resource to
//! authenticate against. The only way to find out is to ask: send the
//! request without credentials and read the `WWW-Authenticate` challenge of
//! the `401` that comes back.
//!
//! ```text
//! Client                                    Key Vault
//!   |                                           |
//!   |--- GET /secrets/x (no body, no auth) ---->|   probe, once per policy
//!   |<-- 401 + WWW-Authenticate: Bearer --------|
//!   |    authorization="…/<tenant>",            |
//!   |    resource="https://vault.azure.net"     |
//!   |                                           |
//!   |   (token for <resource>/.default in <tenant> from the credential)
//!   |                                           |
//!   |--- GET /secrets/x + Bearer <token> ------>|
//!   |<-- 200 OK --------------------------------|
//! ```
//!
//! The discovered challenge and the token are cached in state shared by all
//! services created from one [`ChallengePolicyLayer`]. When the service
//! answers a decorated request with `401`, the cached token and challenge are
//! dropped, the challenge carried by that `401` is adopted, and the request
//! is sent again exactly once with a fresh token. Whatever the retry returns
//! is the result.
//!
//! The probe body is always empty: until the challenge is verified we don't
//! know that the server is the vault we meant to talk to, and request bodies
//! may carry secrets.
//!
//! # Layering
//!
//! ```text
//! ┌────────────────────────────┐
//! │    ChallengePolicyLayer    │  ← Layer<S>: creates ChallengePolicy<S>
//! │ ┌────────────────────────┐ │
//! │ │   ChallengePolicy<S>   │ │  ← Service: probe, decorate, retry on 401
//! │ │ ┌────────────────────┐ │ │
//! │ │ │  Inner Service S   │ │ │  ← the HTTP client; also used for probes
//! │ │ └────────────────────┘ │ │    and the single retry
//! │ └────────────────────────┘ │
//! └────────────────────────────┘
//! ```
//!
//! Dropping the returned future cancels whichever probe, token acquisition
//! or request is in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use tokio::sync::RwLock;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_TOKEN_REFRESH_MARGIN, KeyVaultConfig};
use crate::credential::{CredentialError, TokenCredential};

use super::challenge::{self, Challenge};
use super::error::{AuthError, ChallengeError};
use super::token::TokenCache;

/// Options of a [`ChallengePolicyLayer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePolicyOptions {
    /// Refuse challenges whose resource isn't the request's host or one of
    /// its parent domains. Defaults to `true`.
    pub verify_challenge_resource: bool,

    /// How long before expiry a cached token is replaced. Defaults to 60s.
    pub token_refresh_margin: Duration,
}

impl Default for ChallengePolicyOptions {
    fn default() -> Self {
        ChallengePolicyOptions {
            verify_challenge_resource: true,
            token_refresh_margin: DEFAULT_TOKEN_REFRESH_MARGIN,
        }
    }
}

impl From<&KeyVaultConfig> for ChallengePolicyOptions {
    fn from(config: &KeyVaultConfig) -> Self {
        ChallengePolicyOptions {
            verify_challenge_resource: config.verify_challenge_resource(),
            token_refresh_margin: config.token_refresh_margin(),
        }
    }
}

/// State shared by every clone of a [`ChallengePolicy`].
struct PolicyState {
    /// `None` until a challenge has been discovered, and again after a 401.
    challenge: RwLock<Option<Challenge>>,
    tokens: TokenCache,
    verify_challenge_resource: bool,
}

impl PolicyState {
    async fn cached_challenge(&self) -> Option<Challenge> {
        self.challenge.read().await.clone()
    }

    async fn reset(&self, rejected_token: &str) {
        self.tokens.invalidate_rejected(rejected_token).await;
        *self.challenge.write().await = None;
    }

    /// Verify a freshly received challenge and remember it.
    async fn adopt(
        &self,
        challenge: Challenge,
        request_host: Option<&str>,
    ) -> Result<Challenge, ChallengeError> {
        if self.verify_challenge_resource {
            match request_host {
                Some(host) => challenge.verify_resource(host)?,
                None => {
                    return Err(ChallengeError::ResourceMismatch {
                        resource: challenge.scope,
                        host: "<none>".to_string(),
                    });
                }
            }
        }

        info!(
            tenant_id = %challenge.tenant_id,
            scope = %challenge.scope,
            "adopted authentication challenge"
        );
        *self.challenge.write().await = Some(challenge.clone());

        Ok(challenge)
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// A Tower [`Layer`] adding Key Vault challenge authentication to requests.
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
///
/// let client = ServiceBuilder::new()
///     .layer(ChallengePolicyLayer::new(credential))
///     .service(http_client);
/// ```
///
/// All services created by one layer share the discovered challenge and the
/// token cache, so create one layer per vault.
#[derive(Clone)]
pub struct ChallengePolicyLayer {
    state: Arc<PolicyState>,
}

impl ChallengePolicyLayer {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self::with_options(credential, ChallengePolicyOptions::default())
    }

    pub fn with_options(
        credential: Arc<dyn TokenCredential>,
        options: ChallengePolicyOptions,
    ) -> Self {
        ChallengePolicyLayer {
            state: Arc::new(PolicyState {
                challenge: RwLock::new(None),
                tokens: TokenCache::new(credential, options.token_refresh_margin),
                verify_challenge_resource: options.verify_challenge_resource,
            }),
        }
    }

    /// Take the verification and refresh-margin settings from the config.
    pub fn from_config(config: &KeyVaultConfig, credential: Arc<dyn TokenCredential>) -> Self {
        Self::with_options(credential, ChallengePolicyOptions::from(config))
    }

    /// The challenge currently in use, if one has been discovered.
    pub async fn cached_challenge(&self) -> Option<Challenge> {
        self.state.cached_challenge().await
    }
}

impl<S> Layer<S> for ChallengePolicyLayer {
    type Service = ChallengePolicy<S>;

    fn layer(&self, service: S) -> Self::Service {
        ChallengePolicy {
            inner: service,
            state: self.state.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Tower [`Service`] created by [`ChallengePolicyLayer`].
///
/// Clones share the challenge and token cache of the layer they came from.
#[derive(Clone)]
pub struct ChallengePolicy<S> {
    inner: S,
    state: Arc<PolicyState>,
}

impl<S> ChallengePolicy<S> {
    /// The challenge currently in use, if one has been discovered.
    pub async fn cached_challenge(&self) -> Option<Challenge> {
        self.state.cached_challenge().await
    }
}

/// `ReqBody: Clone` lets the request be sent a second time after a 401, and
/// `ReqBody: From<Bytes>` builds the empty probe body.
impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ChallengePolicy<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
    ReqBody: From<Bytes> + Clone + Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = AuthError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AuthError::Inner)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let state = self.state.clone();

        // The readied service goes into the future, a fresh clone stays behind
        // for the next poll_ready.
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(authorize_and_send(state, inner, req))
    }
}

// ---------------------------------------------------------------------------
// Challenge flow
// ---------------------------------------------------------------------------

/// The parts of a request needed to send it more than once.
struct RequestTemplate<B> {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: B,
}

impl<B: Clone> RequestTemplate<B> {
    fn from_request(req: Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        RequestTemplate {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    fn host(&self) -> Option<&str> {
        self.uri.host()
    }

    fn build(&self, body: B) -> Request<B> {
        let mut req = Request::new(body);
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers.clone();
        req
    }

    fn authorized(&self, token: &str) -> Result<Request<B>, CredentialError> {
        let mut req = self.build(self.body.clone());
        req.headers_mut()
            .insert(AUTHORIZATION, make_bearer_header(token)?);
        Ok(req)
    }

    /// Same method, URI and headers, but no body and no credentials.
    fn probe(&self) -> Request<B>
    where
        B: From<Bytes>,
    {
        let mut req = self.build(B::from(Bytes::new()));
        req.headers_mut().remove(AUTHORIZATION);
        req.headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        req
    }
}

/// Outcome of a probe request.
enum Discovery<ResBody> {
    Challenge(Challenge),
    /// The service failed the probe with something other than a challenge.
    Passthrough(Response<ResBody>),
}

/// 1. Make sure a challenge is known, probing if necessary.
/// 2. Get a token for it and send the request with `Authorization: Bearer`.
/// 3. On 401, reset, adopt the 401's challenge and send exactly once more.
async fn authorize_and_send<S, ReqBody, ResBody>(
    state: Arc<PolicyState>,
    mut inner: S,
    req: Request<ReqBody>,
) -> Result<Response<ResBody>, AuthError<S::Error>>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ReqBody: From<Bytes> + Clone,
{
    let template = RequestTemplate::from_request(req);

    let mut challenge = match state.cached_challenge().await {
        Some(challenge) => challenge,
        None => match discover(&state, &mut inner, template.probe()).await? {
            Discovery::Challenge(challenge) => challenge,
            Discovery::Passthrough(response) => return Ok(response),
        },
    };

    let mut retried = false;
    loop {
        let token = state.tokens.get_token(&challenge).await?;
        debug!(token_len = token.len(), retried, "attaching Bearer token");

        let response = send(&mut inner, template.authorized(&token)?).await?;
        debug!(status = %response.status(), "response received");

        if response.status() != StatusCode::UNAUTHORIZED || retried {
            return Ok(response);
        }
        retried = true;

        info!("received 401, re-challenging and retrying once");
        state.reset(&token).await;

        challenge = if response.headers().contains_key(WWW_AUTHENTICATE) {
            let parsed = challenge::extract_challenge(&response)?;
            state.adopt(parsed, template.host()).await?
        } else {
            debug!("401 carried no challenge, probing again");
            match discover(&state, &mut inner, template.probe()).await? {
                Discovery::Challenge(challenge) => challenge,
                Discovery::Passthrough(response) => return Ok(response),
            }
        };
    }
}

/// Send `probe`, a body-less and unauthenticated copy of the request, and
/// read the challenge from the answer.
async fn discover<S, ReqBody, ResBody>(
    state: &PolicyState,
    inner: &mut S,
    probe: Request<ReqBody>,
) -> Result<Discovery<ResBody>, AuthError<S::Error>>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    debug!(method = %probe.method(), uri = %probe.uri(), "sending challenge probe");
    let host = probe.uri().host().map(str::to_owned);

    let response = send(inner, probe).await?;
    let status = response.status();
    debug!(status = %status, "probe response received");

    if status != StatusCode::UNAUTHORIZED && (status.is_client_error() || status.is_server_error())
    {
        warn!(status = %status, "probe failed without a challenge, returning response");
        return Ok(Discovery::Passthrough(response));
    }

    let parsed = challenge::extract_challenge(&response).inspect_err(|e| {
        warn!(error = %e, "unusable authentication challenge");
    })?;
    let challenge = state.adopt(parsed, host.as_deref()).await?;

    Ok(Discovery::Challenge(challenge))
}

/// Ready the inner service and send one request through it.
async fn send<S, ReqBody, ResBody>(
    inner: &mut S,
    req: Request<ReqBody>,
) -> Result<Response<ResBody>, AuthError<S::Error>>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    std::future::poll_fn(|cx| inner.poll_ready(cx))
        .await
        .map_err(AuthError::Inner)?;

    inner.call(req).await.map_err(AuthError::Inner)
}

fn make_bearer_header(token: &str) -> Result<HeaderValue, CredentialError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
        CredentialError::InvalidResponse(format!("token contains invalid header characters: {e}"))
    })?;
    value.set_sensitive(true);
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
