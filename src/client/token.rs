//! The bearer token cache owned by one challenge policy.
//!
//! The cache holds at most one token: the one issued for the scope and
//! tenant of the most recent challenge. It is refreshed when it gets within
//! the refresh margin of its expiry, when a different scope/tenant is asked
//! for, or after the service rejected it.
//!
//! Refreshes are single-flight. Readers take a read lock on the cached value;
//! a task that finds it stale queues on the refresh mutex and re-checks the
//! cache once it gets there, so tasks that queued behind a refresh reuse its
//! result instead of calling the credential again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::credential::{CredentialError, TokenCredential, TokenRequestOptions};

use super::challenge::Challenge;

/// A token as stored by [`TokenCache`].
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: Instant,
    pub scope: String,
    pub tenant_id: String,
}

impl CachedToken {
    /// Whether the token expires within `margin` from now.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Instant::now()
            .checked_add(margin)
            .is_none_or(|deadline| deadline >= self.expires_at)
    }

    fn is_usable_for(&self, challenge: &Challenge, margin: Duration) -> bool {
        self.scope == challenge.scope
            && self.tenant_id == challenge.tenant_id
            && !self.expires_within(margin)
    }
}

pub struct TokenCache {
    credential: Arc<dyn TokenCredential>,
    refresh_margin: Duration,
    token: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new(credential: Arc<dyn TokenCredential>, refresh_margin: Duration) -> Self {
        TokenCache {
            credential,
            refresh_margin,
            token: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Return a token valid for `challenge`, acquiring one if needed.
    pub async fn get_token(&self, challenge: &Challenge) -> Result<String, CredentialError> {
        if let Some(token) = self.cached(challenge).await {
            return Ok(token);
        }

        let _refreshing = self.refresh.lock().await;

        // Another task may have refreshed while we waited for the mutex.
        if let Some(token) = self.cached(challenge).await {
            debug!("another task already refreshed the token");
            return Ok(token);
        }

        info!(
            scope = %challenge.scope,
            tenant_id = %challenge.tenant_id,
            "acquiring access token"
        );

        let options = TokenRequestOptions::new(
            challenge.scope.clone(),
            Some(challenge.tenant_id.clone()),
        );
        let acquired = self.credential.get_token(options).await.inspect_err(|e| {
            warn!(error = %e, "token acquisition failed");
        })?;

        let cached = CachedToken {
            access_token: acquired.token,
            expires_at: acquired.expires_on,
            scope: challenge.scope.clone(),
            tenant_id: challenge.tenant_id.clone(),
        };
        debug!(expires_at = ?cached.expires_at, "caching new token");

        let access_token = cached.access_token.clone();
        *self.token.write().await = Some(cached);

        Ok(access_token)
    }

    /// Drop the cached token so the next [`get_token`](Self::get_token) calls
    /// the credential.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    /// Drop the cached token only if it is still `rejected`.
    ///
    /// When several requests fail with the same token, only the first one
    /// clears it; the others then pick up whatever replaced it.
    pub async fn invalidate_rejected(&self, rejected: &str) {
        let mut guard = self.token.write().await;
        if guard
            .as_ref()
            .is_some_and(|token| token.access_token == rejected)
        {
            *guard = None;
        }
    }

    async fn cached(&self, challenge: &Challenge) -> Option<String> {
        let guard = self.token.read().await;
        match guard.as_ref() {
            Some(token) if token.is_usable_for(challenge, self.refresh_margin) => {
                debug!(expires_at = ?token.expires_at, "using cached token");
                Some(token.access_token.clone())
            }
            Some(_) => {
                debug!("cached token is stale or for another scope");
                None
            }
            None => None,
        }
    }
}
