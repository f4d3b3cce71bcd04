//! Session management against an OpenID Connect identity provider
//!
//! This crate owns everything the client knows about the logged-in user: the
//! tokens issued by the identity provider, when they go stale, the claims they
//! carry, and how to obtain fresh ones.
//!
//! The [`AuthClient`] trait is the contract of the identity provider client.
//! [`KeycloakClient`][keycloak::KeycloakClient] implements it against a
//! Keycloak realm, logging users in with their password and refreshing the
//! session on demand with the refresh token. Consumers never hold the client
//! directly; they are handed a [`Session`], a cheap handle that exposes the
//! current status and token and lets callers ask for a token that will stay
//! valid for long enough to make a request.
//!
//! A [`SessionProvider`] keeps a session authenticated. Whenever it observes
//! that the session is not authenticated, it immediately starts a login with
//! the credentials supplied by a [`LoginPrompt`], and only hands out a
//! [`Secured`] proof once the login succeeded.
//!
//! ```
//! use carlot_auth::{
//!     keycloak::{KeycloakClient, KeycloakConfig},
//!     Credentials, FixedCredentials, Session, SessionProvider,
//! };
//!
//! # async fn run() -> Result<(), carlot_auth::AuthError> {
//! let client = KeycloakClient::new(KeycloakConfig::default(), reqwest::Client::new());
//! let session = Session::new(client);
//!
//! let prompt = FixedCredentials(Credentials::new("alice", "secret"));
//! let secured = SessionProvider::new(session, prompt).secure().await?;
//!
//! let token = secured.session().update_token().await?;
//! tracing::info!(token = format_args!("{:#?}", token), "ready to call the API");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `file`: Provides [`FileSessionStore`][file::FileSessionStore] for saving a
//!   session to the local filesystem. Enabled by default.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
mod client;
#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub mod file;
mod in_memory;
pub mod keycloak;
mod session;
mod state;
mod tokens;

pub use braids::*;
pub use claims::TokenClaims;
pub use client::{
    AuthClient, AuthError, Credentials, SessionIdentity, SessionStatus, DEFAULT_MIN_VALIDITY,
};
pub use in_memory::InMemoryAuthClient;
pub use session::{FixedCredentials, LoginPrompt, Secured, Session, SessionProvider};
pub use tokens::{TokenLifetimeConfig, TokenSet, TokenStatus, TokenWithLifetime};
