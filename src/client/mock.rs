//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use tower::Service;

use crate::credential::{AccessToken, CredentialError, TokenCredential, TokenRequestOptions};

/// A request as seen by [`MockHttpService`].
#[derive(Debug)]
#[allow(dead_code)]
pub(crate) struct CapturedRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

/// A Tower service that answers from a queue of canned responses and
/// records every request it receives.
#[derive(Clone)]
pub(crate) struct MockHttpService {
    responses: Arc<Mutex<VecDeque<Response<Full<Bytes>>>>>,
    captured_requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockHttpService {
    pub fn new(responses: Vec<Response<Full<Bytes>>>) -> Self {
        MockHttpService {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            captured_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Drain and return all captured requests.
    pub fn take_captured_requests(&self) -> Vec<CapturedRequest> {
        self.captured_requests.lock().unwrap().drain(..).collect()
    }
}

impl Service<Request<Full<Bytes>>> for MockHttpService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let responses = self.responses.clone();
        let captured_requests = self.captured_requests.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes();

            captured_requests.lock().unwrap().push(CapturedRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            });

            let response = responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("MockHttpService: ran out of configured responses");

            Ok(response)
        })
    }
}

/// A credential that hands out `token-1`, `token-2`, ... and counts calls.
pub(crate) struct CountingCredential {
    calls: AtomicUsize,
    lifetime: Duration,
    delay: Duration,
    requests: Mutex<Vec<TokenRequestOptions>>,
}

impl CountingCredential {
    pub fn new(lifetime: Duration) -> Self {
        CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Make every acquisition take `delay`, so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TokenRequestOptions> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenCredential for CountingCredential {
    async fn get_token(
        &self,
        options: TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(options);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        Ok(AccessToken::expiring_in(format!("token-{n}"), self.lifetime))
    }
}
