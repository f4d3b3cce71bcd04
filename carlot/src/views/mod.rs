//! Views over the cars API that follow the user's session
//!
//! A view is mounted from a [`Secured`][carlot_auth::Secured] session, so it
//! only ever exists while the user is logged in. It keeps its own state,
//! fetches what it shows when mounted, and fetches again whenever the session
//! changes identity. Background fetches stop once the view is dropped.

mod admin;
mod cars;
mod lifetime;

pub use admin::AdminView;
pub use cars::{parse_price, CarField, CarsState, CarsView, FieldError};
pub use lifetime::{Lifetime, LifetimeWatch};
