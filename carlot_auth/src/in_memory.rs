//! An auth client that issues tokens from memory

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use carlot_clock::{Clock, DurationSecs, System};
use tokio::sync::watch;

use crate::{
    state::SessionCell, AccessToken, AuthClient, AuthError, Credentials, IdToken,
    SessionIdentity, SessionStatus, TokenClaims, TokenLifetimeConfig, TokenSet,
};

/// An auth client that hands out a fixed access token without an identity provider
///
/// Any credentials are accepted. Refreshes re-issue the same token with a new
/// lifetime, or can be made to fail as the provider would for a revoked
/// session. Useful for exercising consumers of a [`Session`][crate::Session]
/// and for talking to APIs that accept a pre-issued token.
pub struct InMemoryAuthClient<C = System> {
    token: AccessToken,
    lifetime: DurationSecs,
    lifetime_config: TokenLifetimeConfig<C>,
    reject_refresh: AtomicBool,
    reject_logout: AtomicBool,
    refreshes: AtomicUsize,
    state: SessionCell,
}

impl InMemoryAuthClient<System> {
    /// Constructs a client handing out `token`
    pub fn new(token: impl Into<AccessToken>) -> Self {
        Self {
            token: token.into(),
            lifetime: DurationSecs(300),
            lifetime_config: TokenLifetimeConfig::default(),
            reject_refresh: AtomicBool::new(false),
            reject_logout: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            state: SessionCell::new(),
        }
    }
}

impl<C> InMemoryAuthClient<C> {
    /// Uses the given clock to stamp and check token lifetimes
    pub fn with_clock<D>(self, clock: D) -> InMemoryAuthClient<D> {
        InMemoryAuthClient {
            token: self.token,
            lifetime: self.lifetime,
            lifetime_config: self.lifetime_config.with_clock(clock),
            reject_refresh: self.reject_refresh,
            reject_logout: self.reject_logout,
            refreshes: self.refreshes,
            state: self.state,
        }
    }

    /// Sets the lifetime of issued tokens
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Makes subsequent refreshes fail as if the session had been revoked
    pub fn reject_refresh(self, reject: bool) -> Self {
        self.set_reject_refresh(reject);
        self
    }

    /// Makes subsequent refreshes fail, or succeed again
    pub fn set_reject_refresh(&self, reject: bool) {
        self.reject_refresh.store(reject, Ordering::Release);
    }

    /// Makes subsequent logouts report that the provider did not end the
    /// session; the local session is cleared either way
    pub fn set_reject_logout(&self, reject: bool) {
        self.reject_logout.store(reject, Ordering::Release);
    }

    /// The number of refreshes attempted so far
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Acquire)
    }
}

impl<C: Clock> InMemoryAuthClient<C> {
    fn issue(&self) -> TokenSet {
        let access =
            self.lifetime_config
                .create_token(&self.token, None::<IdToken>, self.lifetime);
        TokenSet::new(access, None, None)
    }
}

impl<C: fmt::Debug> fmt::Debug for InMemoryAuthClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InMemoryAuthClient")
            .field("token", &self.token)
            .field("lifetime", &self.lifetime)
            .field("lifetime_config", &self.lifetime_config)
            .field("reject_refresh", &self.reject_refresh)
            .field("reject_logout", &self.reject_logout)
            .field("refreshes", &self.refreshes)
            .field("state", &self.state)
            .finish()
    }
}

#[async_trait]
impl<C> AuthClient for InMemoryAuthClient<C>
where
    C: Clock + Send + Sync + fmt::Debug,
{
    async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let _operation = self.state.lock_operation().await;
        self.state.begin_login();
        self.state.establish(self.issue());
        tracing::info!(username = %credentials.username, "logged in");
        Ok(())
    }

    async fn logout(&self) -> Result<(), AuthError> {
        let _operation = self.state.lock_operation().await;
        self.state.clear();
        if self.reject_logout.load(Ordering::Acquire) {
            return Err(AuthError::Rejected {
                status: 503,
                error: "temporarily_unavailable".to_owned(),
                description: None,
            });
        }
        Ok(())
    }

    async fn update_token(&self, min_validity: DurationSecs) -> Result<AccessToken, AuthError> {
        let _operation = self.state.lock_operation().await;
        if self.state.status() != SessionStatus::Authenticated {
            return Err(AuthError::NotAuthenticated);
        }

        let tokens = self.state.tokens().ok_or(AuthError::NotAuthenticated)?;
        let remaining = tokens
            .access()
            .until_expired_with_clock(self.lifetime_config.clock());
        if remaining >= min_validity {
            return Ok(tokens.access().access_token().to_owned());
        }

        self.refreshes.fetch_add(1, Ordering::AcqRel);
        if self.reject_refresh.load(Ordering::Acquire) {
            tracing::warn!("refresh rejected, clearing session");
            self.state.clear();
            return Err(AuthError::Rejected {
                status: 400,
                error: "invalid_grant".to_owned(),
                description: Some("Session not active".to_owned()),
            });
        }

        self.state.refresh(self.issue());
        Ok(self.token.clone())
    }

    fn restore(&self, tokens: TokenSet) {
        self.state.establish(tokens);
    }

    fn status(&self) -> SessionStatus {
        self.state.status()
    }

    fn token(&self) -> Option<AccessToken> {
        self.state.token()
    }

    fn tokens(&self) -> Option<Arc<TokenSet>> {
        self.state.tokens()
    }

    fn token_claims(&self) -> Option<Arc<TokenClaims>> {
        self.state.claims()
    }

    fn subscribe(&self) -> watch::Receiver<SessionIdentity> {
        self.state.subscribe()
    }
}
