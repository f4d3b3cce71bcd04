use std::{
    num::ParseFloatError,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard},
};

use carlot_api::{ApiError, Car, CarId, CarsApi};
use carlot_auth::{AuthError, Secured, SessionIdentity};
use thiserror::Error;

use super::{Lifetime, LifetimeWatch};

/// What the cars view currently shows
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CarsState {
    /// The cars as last fetched
    pub cars: Vec<Car>,
    /// The form for a car to be added
    pub new_car: Car,
    /// The car being edited, if any
    pub editing: Option<Car>,
    /// The session identity the list was last fetched for
    pub loaded_for: Option<SessionIdentity>,
}

/// An editable field of a car
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CarField {
    /// The model name
    Name,
    /// The color
    Color,
    /// The price
    Price,
}

impl FromStr for CarField {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "color" | "colour" => Ok(Self::Color),
            "price" => Ok(Self::Price),
            other => Err(FieldError::Unknown(other.to_owned())),
        }
    }
}

impl CarField {
    /// Sets this field of `car` from its textual form
    pub fn apply(self, car: &mut Car, value: &str) -> Result<(), FieldError> {
        match self {
            Self::Name => car.name = value.to_owned(),
            Self::Color => car.color = value.to_owned(),
            Self::Price => car.price = parse_price(value)?,
        }
        Ok(())
    }
}

/// Parses a price, which must be a finite number
///
/// `NaN` and infinities parse as `f64` but have no JSON representation.
pub fn parse_price(value: &str) -> Result<f64, FieldError> {
    let price: f64 = value.parse().map_err(FieldError::Price)?;
    if price.is_finite() {
        Ok(price)
    } else {
        Err(FieldError::PriceNotFinite(price))
    }
}

/// A field edit that could not be applied
#[derive(Debug, Error)]
pub enum FieldError {
    /// No such field
    #[error("unknown field `{0}`; expected name, color, or price")]
    Unknown(String),
    /// The price is not a number
    #[error("price must be a number")]
    Price(#[source] ParseFloatError),
    /// The price is `NaN` or infinite
    #[error("price must be a finite number, not {0}")]
    PriceNotFinite(f64),
    /// No car is being edited
    #[error("no car is being edited")]
    NotEditing,
}

/// The list of cars, with a form for a new car and one for editing a car
///
/// The list is fetched when the view is mounted and again whenever the
/// session's identity changes. Every successful write is followed by a fresh
/// fetch of the whole list. A failed call is logged and leaves the view as it
/// was.
#[derive(Debug)]
pub struct CarsView {
    api: Arc<CarsApi>,
    state: Arc<Mutex<CarsState>>,
    lifetime: Lifetime,
}

impl CarsView {
    /// Mounts the view, fetching the list and following the session
    pub async fn mount(secured: &Secured, api: Arc<CarsApi>) -> Self {
        let view = Self {
            api,
            state: Arc::default(),
            lifetime: Lifetime::new(),
        };

        let mut identity = secured.session().subscribe();
        identity.borrow_and_update();
        let _ = view.reload().await;

        let api = view.api.clone();
        let state = view.state.clone();
        let mut alive = view.lifetime.watch();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = alive.ended() => break,
                    changed = identity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let identity = *identity.borrow_and_update();
                        tracing::debug!(%identity, "session changed, reloading cars");
                        let _ = reload(&api, &state, &alive).await;
                    }
                }
            }
            tracing::trace!("cars view reload task finished");
        });

        view
    }

    /// A copy of what the view currently shows
    pub fn snapshot(&self) -> CarsState {
        lock(&self.state).clone()
    }

    /// Fetches the list again
    pub async fn reload(&self) -> Result<(), ApiError> {
        reload(&self.api, &self.state, &self.lifetime.watch()).await
    }

    /// Replaces the new car form
    pub fn set_new_car(&self, car: Car) {
        lock(&self.state).new_car = car;
    }

    /// Changes a field of the new car form
    pub fn edit_new_car(&self, field: CarField, value: &str) -> Result<(), FieldError> {
        field.apply(&mut lock(&self.state).new_car, value)
    }

    /// Starts editing the listed car with the given id
    ///
    /// Any edit already in progress is abandoned. Returns `false` if no such
    /// car is listed.
    pub fn start_edit(&self, id: CarId) -> bool {
        let mut state = lock(&self.state);
        match state.cars.iter().find(|car| car.id == Some(id)).cloned() {
            Some(car) => {
                state.editing = Some(car);
                true
            }
            None => false,
        }
    }

    /// Changes a field of the car being edited
    pub fn edit_target(&self, field: CarField, value: &str) -> Result<(), FieldError> {
        let mut state = lock(&self.state);
        let car = state.editing.as_mut().ok_or(FieldError::NotEditing)?;
        field.apply(car, value)
    }

    /// Abandons the edit in progress
    pub fn cancel_edit(&self) {
        lock(&self.state).editing = None;
    }

    /// Adds the car in the new car form
    pub async fn create(&self) -> Result<(), ApiError> {
        let car = self.snapshot().new_car;
        if let Err(error) = self.api.create_car(&car).await {
            tracing::warn!(%error, "unable to add car");
            return Err(error);
        }

        lock(&self.state).new_car = Car::default();
        self.reload().await
    }

    /// Saves the car being edited
    ///
    /// Returns `false` without calling the API if nothing is being edited.
    pub async fn save_edit(&self) -> Result<bool, ApiError> {
        let car = match self.snapshot().editing {
            Some(car) if car.is_persisted() => car,
            _ => return Ok(false),
        };

        if let Err(error) = self.api.update_car(&car).await {
            tracing::warn!(%error, car.id = car.id, "unable to save car");
            return Err(error);
        }

        lock(&self.state).editing = None;
        self.reload().await?;
        Ok(true)
    }

    /// Removes the car with the given id
    ///
    /// A car the API no longer knows about counts as removed.
    pub async fn delete(&self, id: CarId) -> Result<(), ApiError> {
        match self.api.delete_car(id).await {
            Ok(()) => {}
            Err(ApiError::Status { status, .. }) if status.is_client_error() => {
                tracing::info!(car.id = id, %status, "car was already gone");
            }
            Err(error) => {
                tracing::warn!(%error, car.id = id, "unable to delete car");
                return Err(error);
            }
        }

        self.reload().await
    }

    /// Ends the session and forgets what was shown
    ///
    /// The view is cleared even when the identity provider reports an error,
    /// as the local session is gone by then.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let result = self.api.session().logout().await;
        *lock(&self.state) = CarsState::default();
        result
    }
}

async fn reload(
    api: &CarsApi,
    state: &Mutex<CarsState>,
    alive: &LifetimeWatch,
) -> Result<(), ApiError> {
    let identity = api.session().identity();
    let cars = match api.list_cars().await {
        Ok(cars) => cars,
        Err(error) => {
            tracing::warn!(%error, "unable to fetch cars");
            return Err(error);
        }
    };

    if !alive.is_alive() {
        tracing::trace!("cars view is gone, discarding fetched cars");
        return Ok(());
    }

    let mut state = lock(state);
    tracing::debug!(count = cars.len(), "fetched cars");
    state.cars = cars;
    state.loaded_for = Some(identity);
    Ok(())
}

fn lock(state: &Mutex<CarsState>) -> MutexGuard<'_, CarsState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
