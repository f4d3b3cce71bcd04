//! The contract of an identity provider client

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use carlot_clock::DurationSecs;
use thiserror::Error;
use tokio::sync::watch;

use crate::{AccessToken, Password, TokenClaims, TokenSet, Username};

/// The minimum validity requested of a token before it is used, unless
/// otherwise specified
pub const DEFAULT_MIN_VALIDITY: DurationSecs = DurationSecs(5);

/// Credentials a user presents to log in
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The user's login name
    pub username: Username,
    /// The user's password
    pub password: Password,
}

impl Credentials {
    /// Constructs a new set of credentials
    pub fn new(username: impl Into<Username>, password: impl Into<Password>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// The authentication status of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not yet known, either at start-up or while a login is underway
    Unknown,
    /// The session holds tokens accepted by the identity provider
    Authenticated,
    /// The session holds no usable tokens
    Unauthenticated,
}

/// A generation counter identifying the credentials currently held by a session
///
/// The identity changes whenever a login, logout, or invalidation occurs, or a
/// refresh produces a token for a different subject. Observers re-load anything
/// fetched on behalf of the previous identity when it changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionIdentity(pub u64);

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An error while interacting with the identity provider
#[derive(Debug, Error)]
pub enum AuthError {
    /// The operation requires an authenticated session
    #[error("session is not authenticated")]
    NotAuthenticated,
    /// The session cannot be refreshed as it holds no refresh token
    #[error("session has no refresh token")]
    NoRefreshToken,
    /// The refresh token is past its expiry
    #[error("session has expired")]
    SessionExpired,
    /// The identity provider refused the request
    #[error("identity provider rejected the request with status {status}: {error}")]
    Rejected {
        /// The HTTP status returned
        status: u16,
        /// The OAuth2 error code, or the raw body if none was returned
        error: String,
        /// A human-readable description of the problem, if provided
        description: Option<String>,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from identity provider")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a request to the identity provider
    #[error("error sending request to identity provider")]
    RequestSend(#[source] reqwest_middleware::Error),
    /// Credentials could not be obtained from the user
    #[error("unable to obtain login credentials")]
    Prompt(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

impl AuthError {
    /// Whether the error means the session can no longer be used
    ///
    /// Transport errors leave the session usable once the provider is
    /// reachable again.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::NoRefreshToken
                | Self::SessionExpired
                | Self::Rejected { .. }
        )
    }
}

/// A client of an identity provider that owns a user's session
///
/// Implementations hold the session state; all reads are cheap and
/// non-blocking, while operations that talk to the provider are asynchronous.
#[async_trait]
pub trait AuthClient: Send + Sync + fmt::Debug {
    /// Logs in with the given credentials, replacing any current session
    async fn login(&self, credentials: &Credentials) -> Result<(), AuthError>;

    /// Ends the session with the identity provider and clears it locally
    ///
    /// The local session is cleared even if the provider cannot be reached.
    async fn logout(&self) -> Result<(), AuthError>;

    /// Obtains an access token valid for at least `min_validity`
    ///
    /// If the current token is valid for long enough it is returned without
    /// contacting the provider; otherwise the session is refreshed.
    async fn update_token(&self, min_validity: DurationSecs) -> Result<AccessToken, AuthError>;

    /// Installs a previously obtained set of tokens as the session
    fn restore(&self, tokens: TokenSet);

    /// The current authentication status
    fn status(&self) -> SessionStatus;

    /// Whether the session is currently authenticated
    fn authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    /// The current access token, if any
    fn token(&self) -> Option<AccessToken>;

    /// The current set of tokens, if any
    fn tokens(&self) -> Option<Arc<TokenSet>>;

    /// The claims of the current access token, if it carries any
    fn token_claims(&self) -> Option<Arc<TokenClaims>>;

    /// Subscribes to changes in the session's identity
    fn subscribe(&self) -> watch::Receiver<SessionIdentity>;
}
