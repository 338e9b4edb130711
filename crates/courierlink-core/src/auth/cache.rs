//! Per-account cache of upstream sessions.
//!
//! `SessionCache::get_valid_token` serves a bearer token for a connected
//! account in strict priority order:
//!
//! 1. the cached record, while `now < expiry - buffer`
//! 2. a refresh with the cached refresh token (failures fall through)
//! 3. a full login from the stored, encrypted credentials
//!
//! Steps 2 and 3 run under a per-account lock and re-check the cache once
//! the lock is held, so concurrent callers for the same account share one
//! upstream login instead of racing each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{IdentityError, IdentityProvider, TokenGrant};
use crate::cache::TokenStore;
use crate::config::{ConnectPolicy, SessionSettings};

use super::credentials::{CredentialStore, StoredCredentials};
use super::crypto::PasswordCipher;
use super::session::SessionTokens;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Account {0} has not connected an upstream account")]
    NotConnected(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("{0}")]
    InvalidCredentials(#[source] IdentityError),

    #[error("Upstream re-authentication required for {account_id}: {reason}")]
    ReauthenticationRequired { account_id: String, reason: String },

    #[error("Session storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl SessionError {
    fn reauth(account_id: &str, reason: impl std::fmt::Display) -> Self {
        SessionError::ReauthenticationRequired {
            account_id: account_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Remove an account's stored credentials and cached session.
///
/// `SessionCache::disconnect` does this under the account lock; callers
/// holding only the local stores use it directly.
pub fn forget_account(
    credentials: &impl CredentialStore,
    tokens: &impl TokenStore,
    account_id: &str,
) -> anyhow::Result<()> {
    credentials.clear_credentials(account_id)?;
    tokens.delete(account_id)
}

impl From<IdentityError> for SessionError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::UpstreamUnavailable(msg) => SessionError::UpstreamUnavailable(msg),
            rejected => SessionError::InvalidCredentials(rejected),
        }
    }
}

pub struct SessionCache<P, T, C> {
    provider: P,
    tokens: T,
    credentials: C,
    cipher: PasswordCipher,
    settings: SessionSettings,
    policy: ConnectPolicy,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<P, T, C> SessionCache<P, T, C>
where
    P: IdentityProvider,
    T: TokenStore,
    C: CredentialStore,
{
    pub fn new(
        provider: P,
        tokens: T,
        credentials: C,
        cipher: PasswordCipher,
        settings: SessionSettings,
        policy: ConnectPolicy,
    ) -> Self {
        Self {
            provider,
            tokens,
            credentials,
            cipher,
            settings,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn policy(&self) -> ConnectPolicy {
        self.policy
    }

    /// Return a bearer token for the account, from cache, refresh or a
    /// full login, in that order.
    pub async fn get_valid_token(&self, account_id: &str) -> Result<String, SessionError> {
        if let Some(tokens) = self.usable_cached(account_id) {
            debug!(account = account_id, "Session cache hit");
            return Ok(tokens.access_token);
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        // another caller may have renewed the session while we waited
        let cached = self.cached(account_id);
        if let Some(tokens) = &cached {
            if tokens.is_usable(self.settings.refresh_buffer()) {
                debug!(account = account_id, "Session renewed by a concurrent caller");
                return Ok(tokens.access_token.clone());
            }
        }

        if let Some(stale) = cached.filter(|t| t.has_refresh_token()) {
            match self.provider.refresh(&stale.refresh_token).await {
                Ok(grant) => {
                    let tokens = self.store_grant(account_id, grant)?;
                    info!(account = account_id, "Refreshed upstream session");
                    return Ok(tokens.access_token);
                }
                Err(e) => {
                    warn!(account = account_id, error = %e, "Refresh failed, logging in again");
                }
            }
        }

        let tokens = self.login_from_credentials(account_id).await?;
        self.store(account_id, &tokens)?;
        info!(account = account_id, "Re-authenticated upstream session");
        Ok(tokens.access_token)
    }

    /// Log in from stored credentials without touching the token cache.
    pub async fn fresh_login(&self, account_id: &str) -> Result<String, SessionError> {
        let tokens = self.login_from_credentials(account_id).await?;
        Ok(tokens.access_token)
    }

    /// Token for a scheduled job, following the configured connect policy.
    pub async fn token_for_batch(&self, account_id: &str) -> Result<String, SessionError> {
        match self.policy {
            ConnectPolicy::CacheThenBatch => self.get_valid_token(account_id).await,
            ConnectPolicy::CredentialsOnly => self.fresh_login(account_id).await,
        }
    }

    /// Validate the upstream login and store the account's credentials.
    ///
    /// Under `CacheThenBatch` the grant from the validating login also
    /// seeds the token cache.
    pub async fn connect(
        &self,
        account_id: &str,
        email: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        let external_id = self.provider.resolve_account_id(email).await?;
        let grant = self.provider.authenticate(&external_id, password).await?;

        let encrypted = self
            .cipher
            .encrypt(password)
            .map_err(|e| SessionError::Storage(e.into()))?;
        self.credentials.set_credentials(
            account_id,
            StoredCredentials {
                email: Some(email.to_string()),
                encrypted_password: Some(encrypted),
                external_id: Some(external_id),
            },
        )?;

        match self.policy {
            ConnectPolicy::CacheThenBatch => {
                self.store_grant(account_id, grant)?;
            }
            ConnectPolicy::CredentialsOnly => {
                // a record left over from an earlier connection must not be served
                self.tokens.delete(account_id)?;
            }
        }

        info!(account = account_id, policy = ?self.policy, "Connected upstream account");
        Ok(())
    }

    /// Forget the account's credentials and cached session.
    pub async fn disconnect(&self, account_id: &str) -> Result<(), SessionError> {
        let lock = self.account_lock(account_id);
        {
            let _guard = lock.lock().await;
            forget_account(&self.credentials, &self.tokens, account_id)?;
        }
        drop(lock);
        self.release_lock(account_id);

        info!(account = account_id, "Disconnected upstream account");
        Ok(())
    }

    pub fn connected_accounts(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.credentials.connected_accounts()?)
    }

    /// The cached record for the account, usable or not.
    pub fn session(&self, account_id: &str) -> Option<SessionTokens> {
        self.cached(account_id)
    }

    fn cached(&self, account_id: &str) -> Option<SessionTokens> {
        match self.tokens.get(account_id) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(account = account_id, error = %e, "Token cache unreadable, treating as a miss");
                None
            }
        }
    }

    fn usable_cached(&self, account_id: &str) -> Option<SessionTokens> {
        self.cached(account_id)
            .filter(|t| t.is_usable(self.settings.refresh_buffer()))
    }

    fn store(&self, account_id: &str, tokens: &SessionTokens) -> Result<(), SessionError> {
        self.tokens
            .put(account_id, tokens, self.settings.lifetime())?;
        Ok(())
    }

    fn store_grant(&self, account_id: &str, grant: TokenGrant) -> Result<SessionTokens, SessionError> {
        let tokens = SessionTokens::from_grant(grant, Utc::now(), self.settings.lifetime());
        self.store(account_id, &tokens)?;
        Ok(tokens)
    }

    /// Full login from the stored credentials. Every failure other than
    /// missing credentials is terminal for the caller.
    async fn login_from_credentials(&self, account_id: &str) -> Result<SessionTokens, SessionError> {
        let stored = self
            .credentials
            .get_credentials(account_id)
            .map_err(|e| SessionError::reauth(account_id, e))?
            .ok_or_else(|| SessionError::NotConnected(account_id.to_string()))?;

        let (Some(email), Some(encrypted)) = (&stored.email, &stored.encrypted_password) else {
            return Err(SessionError::NotConnected(account_id.to_string()));
        };

        let password = self
            .cipher
            .decrypt(encrypted)
            .map_err(|e| SessionError::reauth(account_id, e))?;

        let external_id = match stored.external_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                let id = self
                    .provider
                    .resolve_account_id(email)
                    .await
                    .map_err(|e| SessionError::reauth(account_id, e))?;
                let updated = StoredCredentials {
                    external_id: Some(id.clone()),
                    ..stored.clone()
                };
                if let Err(e) = self.credentials.set_credentials(account_id, updated) {
                    warn!(account = account_id, error = %e, "Could not record resolved external id");
                }
                id
            }
        };

        let grant = self
            .provider
            .authenticate(&external_id, &password)
            .await
            .map_err(|e| SessionError::reauth(account_id, e))?;

        Ok(SessionTokens::from_grant(grant, Utc::now(), self.settings.lifetime()))
    }

    fn account_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the account's lock entry unless a caller still holds it.
    fn release_lock(&self, account_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(account_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryCredentialStore;
    use crate::cache::MemoryTokenStore;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PASSWORD: &str = "hunter2";

    #[derive(Default)]
    struct FakeProvider {
        resolve_calls: AtomicUsize,
        auth_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        refresh_error: Option<IdentityError>,
        auth_error: Option<IdentityError>,
    }

    impl FakeProvider {
        fn calls(&self) -> (usize, usize, usize) {
            (
                self.resolve_calls.load(Ordering::SeqCst),
                self.auth_calls.load(Ordering::SeqCst),
                self.refresh_calls.load(Ordering::SeqCst),
            )
        }
    }

    fn grant(tag: &str) -> TokenGrant {
        TokenGrant {
            access_token: format!("access-{}", tag),
            id_token: format!("id-{}", tag),
            refresh_token: format!("refresh-{}", tag),
            expires_in_secs: 3600,
        }
    }

    impl IdentityProvider for FakeProvider {
        async fn resolve_account_id(&self, email: &str) -> Result<String, IdentityError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ext-{}", email))
        }

        async fn authenticate(
            &self,
            external_id: &str,
            password: &str,
        ) -> Result<TokenGrant, IdentityError> {
            let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(e) = &self.auth_error {
                return Err(e.clone());
            }
            if password != PASSWORD {
                return Err(IdentityError::InvalidCredentials(external_id.to_string()));
            }
            // give concurrent callers a chance to interleave
            tokio::task::yield_now().await;
            Ok(grant(&format!("auth{}", n)))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, IdentityError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(e) = &self.refresh_error {
                return Err(e.clone());
            }
            Ok(grant(&format!("refresh{}", n)))
        }
    }

    type TestCache = SessionCache<FakeProvider, MemoryTokenStore, MemoryCredentialStore>;

    fn cache_with(provider: FakeProvider, policy: ConnectPolicy) -> TestCache {
        SessionCache::new(
            provider,
            MemoryTokenStore::new(),
            MemoryCredentialStore::new(),
            PasswordCipher::from_secret("test-secret").expect("cipher"),
            SessionSettings::default(),
            policy,
        )
    }

    fn cache(provider: FakeProvider) -> TestCache {
        cache_with(provider, ConnectPolicy::CacheThenBatch)
    }

    fn seed_credentials(cache: &TestCache, account: &str, external_id: Option<&str>) {
        let encrypted = cache.cipher.encrypt(PASSWORD).expect("encrypt");
        cache
            .credentials
            .set_credentials(
                account,
                StoredCredentials {
                    email: Some(format!("{}@example.com", account.to_lowercase())),
                    encrypted_password: Some(encrypted),
                    external_id: external_id.map(String::from),
                },
            )
            .expect("seed credentials");
    }

    fn seed_session(cache: &TestCache, account: &str, expires_in: Duration) {
        let tokens = SessionTokens {
            access_token: "access-cached".into(),
            id_token: "id-cached".into(),
            refresh_token: "refresh-cached".into(),
            expiry: Utc::now() + expires_in,
        };
        cache
            .tokens
            .put(account, &tokens, Duration::minutes(15))
            .expect("seed session");
    }

    fn assert_fresh_expiry(tokens: &SessionTokens, before: chrono::DateTime<Utc>) {
        let lifetime = Duration::minutes(15);
        assert!(tokens.expiry >= before + lifetime);
        assert!(tokens.expiry <= Utc::now() + lifetime);
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_calls() {
        let cache = cache(FakeProvider::default());
        seed_session(&cache, "U1", Duration::minutes(20));

        let token = cache.get_valid_token("U1").await.expect("token");
        assert_eq!(token, "access-cached");
        assert_eq!(cache.provider().calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_refreshes_inside_buffer() {
        let cache = cache(FakeProvider::default());
        seed_session(&cache, "U1", Duration::minutes(2));
        let before = Utc::now();

        let token = cache.get_valid_token("U1").await.expect("token");
        assert_eq!(token, "access-refresh1");
        assert_eq!(cache.provider().calls(), (0, 0, 1));

        let stored = cache.session("U1").expect("record");
        assert_eq!(stored.refresh_token, "refresh-refresh1");
        assert_fresh_expiry(&stored, before);
    }

    #[tokio::test]
    async fn test_refresh_failure_falls_through_to_login() {
        let cache = cache(FakeProvider {
            refresh_error: Some(IdentityError::InvalidRefreshToken("expired".into())),
            ..Default::default()
        });
        seed_credentials(&cache, "U1", Some("ext-u1"));
        seed_session(&cache, "U1", Duration::minutes(2));

        let token = cache.get_valid_token("U1").await.expect("token");
        assert_eq!(token, "access-auth1");
        assert_eq!(cache.provider().calls(), (0, 1, 1));
    }

    #[tokio::test]
    async fn test_stale_record_without_refresh_token_logs_in() {
        let cache = cache(FakeProvider::default());
        seed_credentials(&cache, "U1", Some("ext-u1"));
        let stale = SessionTokens {
            access_token: "access-cached".into(),
            id_token: "id-cached".into(),
            refresh_token: String::new(),
            expiry: Utc::now() + Duration::minutes(2),
        };
        cache
            .tokens
            .put("U1", &stale, Duration::minutes(15))
            .expect("seed session");

        let token = cache.get_valid_token("U1").await.expect("token");
        assert_eq!(token, "access-auth1");
        assert_eq!(cache.provider().calls(), (0, 1, 0));
        assert_eq!(
            cache.session("U1").expect("record").refresh_token,
            "refresh-auth1"
        );
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_is_swallowed() {
        let cache = cache(FakeProvider {
            refresh_error: Some(IdentityError::UpstreamUnavailable("timeout".into())),
            ..Default::default()
        });
        seed_credentials(&cache, "U1", Some("ext-u1"));
        seed_session(&cache, "U1", Duration::minutes(1));

        assert_eq!(cache.get_valid_token("U1").await.expect("token"), "access-auth1");
    }

    #[tokio::test]
    async fn test_not_connected_makes_no_calls() {
        let cache = cache(FakeProvider::default());

        let err = cache.get_valid_token("U1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected(ref id) if id == "U1"));
        assert_eq!(cache.provider().calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_login_replaces_whole_record() {
        let cache = cache(FakeProvider {
            refresh_error: Some(IdentityError::InvalidRefreshToken("revoked".into())),
            ..Default::default()
        });
        seed_credentials(&cache, "U1", Some("ext-u1"));
        seed_session(&cache, "U1", Duration::minutes(2));
        let before = Utc::now();

        cache.get_valid_token("U1").await.expect("token");

        let stored = cache.session("U1").expect("record");
        assert_ne!(stored.refresh_token, "refresh-cached");
        assert_eq!(stored.access_token, "access-auth1");
        assert_eq!(stored.id_token, "id-auth1");
        assert_eq!(stored.refresh_token, "refresh-auth1");
        assert_fresh_expiry(&stored, before);
    }

    #[tokio::test]
    async fn test_login_from_credentials_end_to_end() {
        let cache = cache(FakeProvider::default());
        seed_credentials(&cache, "U1", None);

        let token = cache.get_valid_token("U1").await.expect("token");
        assert_eq!(token, "access-auth1");
        assert_eq!(cache.provider().calls(), (1, 1, 0));

        let stored = cache.session("U1").expect("record written");
        assert_eq!(stored.access_token, token);

        // the resolved id is kept so the next login skips the lookup
        let creds = cache
            .credentials
            .get_credentials("U1")
            .expect("read")
            .expect("present");
        assert_eq!(creds.external_id.as_deref(), Some("ext-u1@example.com"));
    }

    #[tokio::test]
    async fn test_known_external_id_skips_lookup() {
        let cache = cache(FakeProvider::default());
        seed_credentials(&cache, "U1", Some("ext-u1"));

        cache.get_valid_token("U1").await.expect("token");
        assert_eq!(cache.provider().calls(), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_login_rejection_requires_reauthentication() {
        let cache = cache(FakeProvider {
            auth_error: Some(IdentityError::PasswordResetRequired),
            ..Default::default()
        });
        seed_credentials(&cache, "U1", Some("ext-u1"));

        let err = cache.get_valid_token("U1").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::ReauthenticationRequired { ref account_id, .. } if account_id == "U1"
        ));
        assert!(cache.session("U1").is_none());
    }

    #[tokio::test]
    async fn test_undecryptable_password_requires_reauthentication() {
        let cache = cache(FakeProvider::default());
        cache
            .credentials
            .set_credentials(
                "U1",
                StoredCredentials {
                    email: Some("u1@example.com".into()),
                    encrypted_password: Some("bm90IGEgcmVhbCBjaXBoZXJ0ZXh0".into()),
                    external_id: Some("ext-u1".into()),
                },
            )
            .expect("seed");

        let err = cache.get_valid_token("U1").await.unwrap_err();
        assert!(matches!(err, SessionError::ReauthenticationRequired { .. }));
        assert_eq!(cache.provider().calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let cache = cache(FakeProvider::default());
        seed_credentials(&cache, "U1", Some("ext-u1"));

        let (a, b) = futures::join!(cache.get_valid_token("U1"), cache.get_valid_token("U1"));
        assert_eq!(a.expect("first"), "access-auth1");
        assert_eq!(b.expect("second"), "access-auth1");
        assert_eq!(cache.provider().calls(), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_connect_seeds_cache() {
        let cache = cache(FakeProvider::default());

        cache
            .connect("U1", "driver@example.com", PASSWORD)
            .await
            .expect("connect");
        assert_eq!(cache.provider().calls(), (1, 1, 0));

        let creds = cache
            .credentials
            .get_credentials("U1")
            .expect("read")
            .expect("stored");
        assert_eq!(creds.email.as_deref(), Some("driver@example.com"));
        assert_eq!(creds.external_id.as_deref(), Some("ext-driver@example.com"));
        let sealed = creds.encrypted_password.expect("password");
        assert_ne!(sealed, PASSWORD);
        assert_eq!(cache.cipher.decrypt(&sealed).expect("decrypt"), PASSWORD);

        // seeded by connect, so this is a pure cache hit
        assert_eq!(cache.get_valid_token("U1").await.expect("token"), "access-auth1");
        assert_eq!(cache.provider().calls(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_connect_with_wrong_password_stores_nothing() {
        let cache = cache(FakeProvider::default());

        let err = cache
            .connect("U1", "driver@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidCredentials(IdentityError::InvalidCredentials(_))
        ));
        assert!(cache.connected_accounts().expect("list").is_empty());
        assert!(cache.session("U1").is_none());
    }

    #[tokio::test]
    async fn test_connect_reports_transient_failure() {
        let cache = cache(FakeProvider {
            auth_error: Some(IdentityError::UpstreamUnavailable("503".into())),
            ..Default::default()
        });

        let err = cache
            .connect("U1", "driver@example.com", PASSWORD)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disconnect_clears_credentials_and_session() {
        let cache = cache(FakeProvider::default());
        cache
            .connect("U1", "driver@example.com", PASSWORD)
            .await
            .expect("connect");
        assert!(cache.session("U1").is_some());

        cache.disconnect("U1").await.expect("disconnect");
        assert!(cache.session("U1").is_none());
        assert!(cache.connected_accounts().expect("list").is_empty());

        let err = cache.get_valid_token("U1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected(_)));
    }

    #[test]
    fn test_forget_account_without_upstream() {
        let credentials = MemoryCredentialStore::new();
        let tokens = MemoryTokenStore::new();
        credentials
            .set_credentials(
                "U1",
                StoredCredentials {
                    email: Some("u1@example.com".into()),
                    encrypted_password: Some("sealed".into()),
                    external_id: None,
                },
            )
            .expect("seed");
        let record = SessionTokens::from_grant(grant("x"), Utc::now(), Duration::minutes(15));
        tokens
            .put("U1", &record, Duration::minutes(15))
            .expect("seed");

        forget_account(&credentials, &tokens, "U1").expect("forget");
        assert!(credentials.connected_accounts().expect("list").is_empty());
        assert!(tokens.get("U1").expect("read").is_none());
        // forgetting twice is harmless
        forget_account(&credentials, &tokens, "U1").expect("forget again");
    }

    #[tokio::test]
    async fn test_disconnect_releases_account_lock() {
        let cache = cache(FakeProvider::default());
        cache
            .connect("U1", "driver@example.com", PASSWORD)
            .await
            .expect("connect");
        cache
            .connect("U2", "other@example.com", PASSWORD)
            .await
            .expect("connect");
        assert_eq!(cache.locks.lock().expect("locks").len(), 2);

        cache.disconnect("U1").await.expect("disconnect");
        let locks = cache.locks.lock().expect("locks");
        assert!(!locks.contains_key("U1"));
        assert!(locks.contains_key("U2"));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_lock_another_caller_holds() {
        let cache = cache(FakeProvider::default());
        let held = cache.account_lock("U1");

        cache.disconnect("U1").await.expect("disconnect");
        assert!(cache.locks.lock().expect("locks").contains_key("U1"));
        drop(held);
    }

    #[tokio::test]
    async fn test_credentials_only_policy_never_caches() {
        let cache = cache_with(FakeProvider::default(), ConnectPolicy::CredentialsOnly);
        cache
            .connect("U1", "driver@example.com", PASSWORD)
            .await
            .expect("connect");
        assert!(cache.session("U1").is_none());

        assert_eq!(cache.token_for_batch("U1").await.expect("token"), "access-auth2");
        assert_eq!(cache.token_for_batch("U1").await.expect("token"), "access-auth3");
        assert!(cache.session("U1").is_none());
        // the external id stored at connect time is reused
        assert_eq!(cache.provider().calls(), (1, 3, 0));
    }

    #[tokio::test]
    async fn test_cache_then_batch_policy_uses_cache() {
        let cache = cache(FakeProvider::default());
        seed_session(&cache, "U1", Duration::minutes(20));

        assert_eq!(cache.token_for_batch("U1").await.expect("token"), "access-cached");
        assert_eq!(cache.provider().calls(), (0, 0, 0));
    }
}
