//! The session capability handed to everything that talks to the API

use std::{error, sync::Arc};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    AccessToken, AuthClient, AuthError, Credentials, SessionIdentity, SessionStatus, TokenClaims,
    TokenSet, DEFAULT_MIN_VALIDITY,
};

/// A handle to the user's session
///
/// Cloning the handle is cheap; all clones observe the same session. There is
/// no process-wide session: every component that needs one is given a handle.
#[derive(Clone, Debug)]
pub struct Session {
    client: Arc<dyn AuthClient>,
}

impl Session {
    /// Wraps an auth client as a session
    pub fn new(client: impl AuthClient + 'static) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    /// Wraps a shared auth client as a session
    pub fn from_arc(client: Arc<dyn AuthClient>) -> Self {
        Self { client }
    }

    /// The current authentication status
    #[inline]
    pub fn status(&self) -> SessionStatus {
        self.client.status()
    }

    /// Whether the session is currently authenticated
    #[inline]
    pub fn authenticated(&self) -> bool {
        self.client.authenticated()
    }

    /// The current access token, if any
    #[inline]
    pub fn token(&self) -> Option<AccessToken> {
        self.client.token()
    }

    /// The current set of tokens, if any
    #[inline]
    pub fn tokens(&self) -> Option<Arc<TokenSet>> {
        self.client.tokens()
    }

    /// The claims of the current access token
    #[inline]
    pub fn token_claims(&self) -> Option<Arc<TokenClaims>> {
        self.client.token_claims()
    }

    /// The session's current identity
    pub fn identity(&self) -> SessionIdentity {
        *self.client.subscribe().borrow()
    }

    /// Subscribes to changes of the session's identity
    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<SessionIdentity> {
        self.client.subscribe()
    }

    /// Logs in with the given credentials
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.client.login(credentials).await
    }

    /// Ends the session
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.client.logout().await
    }

    /// Obtains an access token valid for at least the default minimum validity
    pub async fn update_token(&self) -> Result<AccessToken, AuthError> {
        self.client.update_token(DEFAULT_MIN_VALIDITY).await
    }

    /// Installs a previously saved set of tokens
    pub fn restore(&self, tokens: TokenSet) {
        self.client.restore(tokens)
    }
}

/// Obtains credentials from the user when a login is required
#[async_trait]
pub trait LoginPrompt: Send {
    /// Asks the user for credentials
    async fn credentials(
        &mut self,
    ) -> Result<Credentials, Box<dyn error::Error + Send + Sync + 'static>>;

    /// Whether asking again can give different credentials
    ///
    /// A prompt that answers from configuration would repeat a rejected
    /// login forever, so callers only retry interactive prompts.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// A prompt that always answers with the same credentials
#[derive(Clone, Debug)]
pub struct FixedCredentials(pub Credentials);

#[async_trait]
impl LoginPrompt for FixedCredentials {
    async fn credentials(
        &mut self,
    ) -> Result<Credentials, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(self.0.clone())
    }
}

/// Proof that the session was authenticated when it was handed out
///
/// Components that perform business operations are only constructed from a
/// `Secured` handle.
#[derive(Clone, Debug)]
pub struct Secured {
    session: Session,
}

impl Secured {
    /// The authenticated session
    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// Keeps a session authenticated, starting a login whenever it is not
#[derive(Debug)]
pub struct SessionProvider<P> {
    session: Session,
    prompt: P,
}

impl<P: LoginPrompt> SessionProvider<P> {
    /// Constructs a provider for the session, using `prompt` to log in
    pub fn new(session: Session, prompt: P) -> Self {
        Self { session, prompt }
    }

    /// The session being provided
    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The prompt used to log in
    #[inline]
    pub fn prompt(&self) -> &P {
        &self.prompt
    }

    /// Ensures the session is authenticated
    ///
    /// An authenticated session is first checked by updating its token; if the
    /// identity provider no longer accepts it, or the session was never
    /// authenticated, a login is started immediately.
    pub async fn secure(&mut self) -> Result<Secured, AuthError> {
        if self.session.status() == SessionStatus::Authenticated {
            match self.session.update_token().await {
                Ok(_) => return Ok(self.secured()),
                Err(error) if error.invalidates_session() => {
                    tracing::info!(%error, "saved session is no longer valid");
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!("session is not authenticated, starting login");
        let credentials = self.prompt.credentials().await.map_err(AuthError::Prompt)?;
        self.session.login(&credentials).await?;
        Ok(self.secured())
    }

    fn secured(&self) -> Secured {
        Secured {
            session: self.session.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use carlot_clock::{DurationSecs, SharedTestClock, UnixTime};

    use super::*;
    use crate::{AccessTokenRef, InMemoryAuthClient};

    fn credentials() -> Credentials {
        Credentials::new("alice", "secret")
    }

    #[derive(Default)]
    struct CountingPrompt {
        asked: usize,
    }

    #[async_trait]
    impl LoginPrompt for CountingPrompt {
        async fn credentials(
            &mut self,
        ) -> Result<Credentials, Box<dyn error::Error + Send + Sync + 'static>> {
            self.asked += 1;
            Ok(credentials())
        }
    }

    struct FailingPrompt;

    #[async_trait]
    impl LoginPrompt for FailingPrompt {
        async fn credentials(
            &mut self,
        ) -> Result<Credentials, Box<dyn error::Error + Send + Sync + 'static>> {
            Err("no terminal attached".into())
        }
    }

    #[tokio::test]
    async fn unauthenticated_session_triggers_login() {
        let session = Session::new(InMemoryAuthClient::new("token"));
        let mut provider = SessionProvider::new(session.clone(), CountingPrompt::default());

        let secured = provider.secure().await.unwrap();

        assert!(secured.session().authenticated());
        assert_eq!(provider.prompt.asked, 1);
        assert_eq!(
            session.token().as_deref(),
            Some(AccessTokenRef::from_static("token"))
        );
    }

    #[tokio::test]
    async fn authenticated_session_is_not_prompted() {
        let session = Session::new(InMemoryAuthClient::new("token"));
        session.login(&credentials()).await.unwrap();
        let mut provider = SessionProvider::new(session, CountingPrompt::default());

        provider.secure().await.unwrap();

        assert_eq!(provider.prompt.asked, 0);
    }

    #[tokio::test]
    async fn expired_session_that_cannot_refresh_logs_in_again() {
        let clock = SharedTestClock::new(UnixTime(1_000));
        let client = InMemoryAuthClient::new("token")
            .with_clock(clock.clone())
            .with_lifetime(DurationSecs(60))
            .reject_refresh(true);
        let session = Session::new(client);
        session.login(&credentials()).await.unwrap();
        clock.inc(120);
        let mut provider = SessionProvider::new(session.clone(), CountingPrompt::default());

        provider.secure().await.unwrap();

        assert_eq!(provider.prompt.asked, 1);
        assert!(session.authenticated());
    }

    #[tokio::test]
    async fn prompt_failure_is_reported() {
        let session = Session::new(InMemoryAuthClient::new("token"));
        let mut provider = SessionProvider::new(session.clone(), FailingPrompt);

        let error = provider.secure().await.unwrap_err();

        assert!(matches!(error, AuthError::Prompt(_)));
        assert!(!session.authenticated());
    }

    #[tokio::test]
    async fn fixed_credentials_log_in() {
        let session = Session::new(InMemoryAuthClient::new("token"));
        let mut provider = SessionProvider::new(session, FixedCredentials(credentials()));

        let secured = provider.secure().await.unwrap();

        assert_eq!(
            secured.session().status(),
            SessionStatus::Authenticated
        );
    }
}
