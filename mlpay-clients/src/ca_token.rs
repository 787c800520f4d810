use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ClientsResult;

/// A single token exchange result. CA rotates the refresh token on every
/// exchange, so the caller must persist it atomically alongside the access
/// token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaTokenExchange {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: i64,
}

#[async_trait]
pub trait CaAuthenticator: Send + Sync {
    async fn exchange_refresh_token(&self, refresh_token: &str) -> ClientsResult<CaTokenExchange>;
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

/// Proactive refresh interval: every 30 minutes, regardless of the token's
/// nominal expiry.
const PROACTIVE_REFRESH_INTERVAL: Duration = Duration::minutes(30);
/// Grace window subtracted from the nominal expiry so clock skew between us
/// and CA doesn't cause a request to be dispatched with a token that expires
/// mid-flight.
const EXPIRY_GRACE: Duration = Duration::seconds(30);

/// Caches the CA access token with its expiry and serialises every refresh
/// through a mutex, so concurrent 401s on the same token collapse into a
/// single exchange.
pub struct CaTokenCache {
    authenticator: std::sync::Arc<dyn CaAuthenticator>,
    state: Mutex<CachedToken>,
    last_refreshed_at: Mutex<DateTime<Utc>>,
}

impl CaTokenCache {
    #[must_use]
    pub fn new(authenticator: std::sync::Arc<dyn CaAuthenticator>, initial: CaTokenExchange, now: DateTime<Utc>) -> Self {
        let expires_at = now + Duration::seconds(initial.expires_in_seconds);
        Self {
            authenticator,
            state: Mutex::new(CachedToken { access_token: initial.access_token, refresh_token: initial.refresh_token, expires_at }),
            last_refreshed_at: Mutex::new(now),
        }
    }

    async fn apply_exchange(&self, state: &mut CachedToken, exchange: CaTokenExchange, now: DateTime<Utc>) {
        state.access_token = exchange.access_token;
        state.refresh_token = exchange.refresh_token;
        state.expires_at = now + Duration::seconds(exchange.expires_in_seconds);
        *self.last_refreshed_at.lock().await = now;
    }

    /// Returns a usable access token, refreshing proactively if the cached
    /// token is within [`EXPIRY_GRACE`] of expiry or the proactive interval
    /// has elapsed since the last refresh.
    pub async fn access_token(&self, now: DateTime<Utc>) -> ClientsResult<String> {
        let mut state = self.state.lock().await;
        let needs_proactive_refresh = now - *self.last_refreshed_at.lock().await >= PROACTIVE_REFRESH_INTERVAL;
        let needs_expiry_refresh = now + EXPIRY_GRACE >= state.expires_at;
        if needs_proactive_refresh || needs_expiry_refresh {
            debug!(proactive = needs_proactive_refresh, expiry = needs_expiry_refresh, "refreshing ca access token");
            let exchange = self.authenticator.exchange_refresh_token(&state.refresh_token).await?;
            self.apply_exchange(&mut state, exchange, now).await;
        }
        Ok(state.access_token.clone())
    }

    /// Reactive refresh on a 401. `observed_access_token` is the token the
    /// caller actually saw rejected: if another task already refreshed past
    /// it, this call is a no-op and returns the already-current token,
    /// guaranteeing exactly one refresh per concurrent batch of 401s.
    pub async fn force_refresh(&self, observed_access_token: &str, now: DateTime<Utc>) -> ClientsResult<String> {
        let mut state = self.state.lock().await;
        if state.access_token != observed_access_token {
            return Ok(state.access_token.clone());
        }
        let exchange = self.authenticator.exchange_refresh_token(&state.refresh_token).await?;
        self.apply_exchange(&mut state, exchange, now).await;
        Ok(state.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    struct CountingAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaAuthenticator for CountingAuthenticator {
        async fn exchange_refresh_token(&self, refresh_token: &str) -> ClientsResult<CaTokenExchange> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CaTokenExchange { access_token: format!("access-{call}"), refresh_token: format!("{refresh_token}-rotated-{call}"), expires_in_seconds: 3600 })
        }
    }

    fn cache(now: DateTime<Utc>) -> (Arc<CountingAuthenticator>, CaTokenCache) {
        let auth = Arc::new(CountingAuthenticator { calls: AtomicUsize::new(0) });
        let cache = CaTokenCache::new(auth.clone(), CaTokenExchange { access_token: "access-0".into(), refresh_token: "refresh-0".into(), expires_in_seconds: 3600 }, now);
        (auth, cache)
    }

    #[tokio::test]
    async fn fresh_token_is_reused_without_refreshing() {
        let now = Utc::now();
        let (auth, cache) = cache(now);
        let token = cache.access_token(now + Duration::minutes(5)).await.expect("token");
        assert_eq!(token, "access-0");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn proactive_refresh_fires_after_interval() {
        let now = Utc::now();
        let (auth, cache) = cache(now);
        let token = cache.access_token(now + PROACTIVE_REFRESH_INTERVAL).await.expect("token");
        assert_eq!(token, "access-1");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_401s_collapse_into_one_refresh() {
        let now = Utc::now();
        let (auth, cache) = cache(now);
        let cache = Arc::new(cache);
        let first = cache.force_refresh("access-0", now).await.expect("first refresh");
        let second = cache.force_refresh("access-0", now).await.expect("second refresh is a no-op");
        assert_eq!(first, second);
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }
}
