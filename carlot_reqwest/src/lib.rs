//! Middleware to attach the session's access token to outgoing requests
//!
//! Include the [`AccessTokenMiddleware`] in a
//! [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware) stack
//! and every request it lets through carries `Authorization: Bearer <token>`
//! with the token the [`Session`] currently holds.
//!
//! The middleware never refreshes anything itself. Callers that need a
//! token with some minimum remaining validity ask the session to update its
//! token before sending.
//!
//! A request that already has an `Authorization` header keeps it. A session
//! that holds no token sends the request without one.
//!
//! ```
//! use carlot_auth::{InMemoryAuthClient, Session};
//! use carlot_reqwest::AccessTokenMiddleware;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! let session = Session::new(InMemoryAuthClient::new("token"));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(session))
//!     .build();
//! # drop(client);
//! ```
//!
//! Which requests get the token is decided by a predicate over the
//! request. The default only allows HTTPS. An API served over plain HTTP
//! on a development machine is allowed by naming its origin instead, which
//! also keeps the token from following a request anywhere else. Predicates
//! compose:
//!
//! ```
//! use carlot_auth::{InMemoryAuthClient, Session};
//! use carlot_reqwest::{AccessTokenMiddleware, HttpsOnly, SameOrigin};
//! use predicates::prelude::PredicateBooleanExt;
//!
//! let session = Session::new(InMemoryAuthClient::new("token"));
//! let api = "http://localhost:1291".parse().unwrap();
//!
//! AccessTokenMiddleware::new(session)
//!     .with_predicate(SameOrigin::new(&api).and(HttpsOnly.not()));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bytes::{BufMut, BytesMut};
use carlot_auth::{AccessTokenRef, Session};
use carlot_clock::Clock;
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use url::{Origin, Url};

const BEARER: &[u8] = b"Bearer ";

/// A middleware that injects the session's access token into outgoing requests
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    session: Session,
    predicate: P,
}

impl AccessTokenMiddleware<HttpsOnly> {
    /// Constructs a middleware that sends the session's token over HTTPS only
    ///
    /// Use [`with_predicate()`][Self::with_predicate()] to choose which
    /// requests get the token.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the predicate deciding which requests get the token
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            session: self.session,
            predicate,
        }
    }
}

impl<P> AccessTokenMiddleware<P> {
    fn authorization(&self) -> Option<header::HeaderValue> {
        let Some(tokens) = self.session.tokens() else {
            tracing::debug!("session holds no access token, sending request without one");
            return None;
        };
        let token = tokens.access();

        tracing::trace!(
            token.status = ?token.token_status_at(carlot_clock::System.now()),
            token.expiry = token.expiry().0,
            "attaching access token"
        );

        bearer_header(token.access_token())
    }
}

fn bearer_header(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut value = BytesMut::with_capacity(BEARER.len() + token.as_str().len());
    value.put_slice(BEARER);
    value.put_slice(token.as_str().as_bytes());

    match header::HeaderValue::from_maybe_shared(value.freeze()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("access token is not a valid header value, not attaching it");
            None
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request already carries authorization");
        } else if !self.predicate.eval(&req) {
            tracing::trace!(url = %req.url(), "predicate declined to attach access token");
        } else if let Some(value) = self.authorization() {
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}

fn mismatch<'a>(
    predicate: &'a dyn reflection::PredicateReflection,
    expected: bool,
    result: bool,
    name: &'static str,
    actual: String,
) -> Option<reflection::Case<'a>> {
    (result != expected).then(|| {
        reflection::Case::new(Some(predicate), result)
            .add_product(reflection::Product::new(name, actual))
    })
}

/// Allows requests sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        mismatch(self, expected, result, "scheme", req.url().scheme().to_owned())
    }
}

impl reflection::PredicateReflection for HttpsOnly {}

impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Allows requests sent to the same scheme, host, and port as a base URL
#[derive(Clone, Debug)]
pub struct SameOrigin {
    origin: Origin,
}

impl SameOrigin {
    /// Allows requests to the origin of `base`
    pub fn new(base: &Url) -> Self {
        Self {
            origin: base.origin(),
        }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        self.origin.is_tuple() && req.url().origin() == self.origin
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        mismatch(
            self,
            expected,
            result,
            "origin",
            req.url().origin().ascii_serialization(),
        )
    }
}

impl reflection::PredicateReflection for SameOrigin {}

impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin == {}", self.origin.ascii_serialization())
    }
}
