//! A command-line client for the cars API
//!
//! Users log in against a Keycloak realm and then list, add, edit, and
//! remove cars, either one command at a time or from an interactive shell.
//! Nothing is shown to a user who has not logged in.

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

pub mod app;
pub mod config;
pub mod views;
