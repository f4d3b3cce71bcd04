//! A client for the cars REST API
//!
//! [`CarsApi`] talks to the resource server on behalf of a logged-in user.
//! Each call follows the same pattern: check that the session is
//! authenticated, make sure its access token will not expire mid-flight,
//! send a single request carrying the token, and classify the outcome into
//! an [`ApiError`] that tells apart a session that needs a new login from an
//! API that could not be reached.
//!
//! ```no_run
//! use carlot_api::{Car, CarsApi};
//! use carlot_auth::{Credentials, InMemoryAuthClient, Session};
//! use url::Url;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(InMemoryAuthClient::new("token"));
//! session.login(&Credentials::new("alice", "secret")).await?;
//!
//! let api = CarsApi::new(Url::parse("http://localhost:1291")?, session);
//! api.create_car(&Car::new("Civic", "blue", 20000.0)).await?;
//! for car in api.list_cars().await? {
//!     println!("{car}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `fake`: Provides [`FakeCarsServer`][fake::FakeCarsServer], an in-memory
//!   stand-in for the API to test against.

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

mod car;
mod client;
mod error;
#[cfg(any(test, feature = "fake"))]
#[cfg_attr(docsrs, doc(cfg(feature = "fake")))]
pub mod fake;

pub use car::{Car, CarId};
pub use client::{CarsApi, ADMIN_PATH, CARS_PATH};
pub use error::ApiError;
