//! An in-process stand-in for the cars API
//!
//! [`FakeCarsServer`] is a terminal middleware: placed last in a
//! `reqwest-middleware` stack it answers every request itself, keeping the
//! cars in memory, so that no request ever leaves the process.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use reqwest::{header, Method, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};

use crate::{Car, CarId, ADMIN_PATH, CARS_PATH};

/// The message returned by the admin endpoint
pub const ADMIN_MESSAGE: &str = "Welcome Admin!";

#[derive(Debug, Default)]
struct Store {
    cars: BTreeMap<CarId, Car>,
    next_id: CarId,
}

/// An in-memory implementation of the cars API
#[derive(Debug)]
pub struct FakeCarsServer {
    accepted_tokens: Mutex<BTreeSet<String>>,
    admin_tokens: Mutex<BTreeSet<String>>,
    store: Mutex<Store>,
    requests: AtomicUsize,
    log: Mutex<Vec<(Method, String)>>,
    unavailable: AtomicBool,
    garbled: AtomicBool,
}

impl FakeCarsServer {
    /// Constructs a server that accepts the given access token
    pub fn new(token: &str) -> Self {
        Self {
            accepted_tokens: Mutex::new(BTreeSet::from([token.to_owned()])),
            admin_tokens: Mutex::new(BTreeSet::new()),
            store: Mutex::new(Store {
                cars: BTreeMap::new(),
                next_id: 1,
            }),
            requests: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            garbled: AtomicBool::new(false),
        }
    }

    /// Also accepts `token`, granting it access to the admin endpoint
    pub fn with_admin(self, token: &str) -> Self {
        lock(&self.accepted_tokens).insert(token.to_owned());
        lock(&self.admin_tokens).insert(token.to_owned());
        self
    }

    /// Seeds the server with a car, assigning it the next id
    pub fn with_car(self, car: Car) -> Self {
        self.insert(car);
        self
    }

    /// Makes the server answer every request with `503 Service Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Makes the server answer reads with a body that is not JSON
    pub fn set_garbled(&self, garbled: bool) {
        self.garbled.store(garbled, Ordering::Release);
    }

    /// The number of requests received
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Acquire)
    }

    /// The method and path of every request received, in order
    pub fn requests(&self) -> Vec<(Method, String)> {
        lock(&self.log).clone()
    }

    /// The cars currently stored
    pub fn cars(&self) -> Vec<Car> {
        lock(&self.store).cars.values().cloned().collect()
    }

    fn insert(&self, mut car: Car) -> Car {
        let mut store = lock(&self.store);
        let id = store.next_id;
        store.next_id += 1;
        car.id = Some(id);
        store.cars.insert(id, car.clone());
        car
    }

    fn bearer(req: &Request) -> Option<&str> {
        req.headers()
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
    }

    fn route(&self, req: &Request) -> Response {
        if self.unavailable.load(Ordering::Acquire) {
            return respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", b"down".to_vec());
        }

        let token = match Self::bearer(req) {
            Some(token) if lock(&self.accepted_tokens).contains(token) => token.to_owned(),
            _ => return respond(StatusCode::UNAUTHORIZED, "text/plain", Vec::new()),
        };

        let path = req.url().path();
        let id = path
            .strip_prefix(CARS_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::parse::<CarId>);

        match (req.method().clone(), path, id) {
            (Method::GET, ADMIN_PATH, _) => {
                if lock(&self.admin_tokens).contains(&token) {
                    respond(StatusCode::OK, "text/plain", ADMIN_MESSAGE.as_bytes().to_vec())
                } else {
                    respond(StatusCode::FORBIDDEN, "text/plain", Vec::new())
                }
            }
            (Method::GET, CARS_PATH, _) => {
                if self.garbled.load(Ordering::Acquire) {
                    return respond(StatusCode::OK, "application/json", b"<html>".to_vec());
                }
                let cars = self.cars();
                respond_json(StatusCode::OK, &cars)
            }
            (Method::POST, CARS_PATH, _) => match body_car(req) {
                Some(car) => {
                    let car = self.insert(Car { id: None, ..car });
                    respond_json(StatusCode::CREATED, &car)
                }
                None => respond(StatusCode::BAD_REQUEST, "text/plain", Vec::new()),
            },
            (Method::PUT, _, Some(Ok(id))) => {
                let mut store = lock(&self.store);
                match (store.cars.get_mut(&id), body_car(req)) {
                    (Some(existing), Some(car)) => {
                        *existing = Car { id: Some(id), ..car };
                        let updated = existing.clone();
                        drop(store);
                        respond_json(StatusCode::OK, &updated)
                    }
                    (None, _) => respond(StatusCode::NOT_FOUND, "text/plain", Vec::new()),
                    (_, None) => respond(StatusCode::BAD_REQUEST, "text/plain", Vec::new()),
                }
            }
            (Method::DELETE, _, Some(Ok(id))) => {
                if lock(&self.store).cars.remove(&id).is_some() {
                    respond(StatusCode::NO_CONTENT, "text/plain", Vec::new())
                } else {
                    respond(StatusCode::NOT_FOUND, "text/plain", Vec::new())
                }
            }
            _ => respond(StatusCode::NOT_FOUND, "text/plain", Vec::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn body_car(req: &Request) -> Option<Car> {
    let bytes = req.body()?.as_bytes()?;
    serde_json::from_slice(bytes).ok()
}

fn respond(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response {
    let mut resp = http::Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    resp.into()
}

fn respond_json<T: serde::Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(_) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", Vec::new()),
    }
}

#[async_trait::async_trait]
impl Middleware for FakeCarsServer {
    async fn handle(
        &self,
        req: Request,
        _: &mut http::Extensions,
        _: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        self.requests.fetch_add(1, Ordering::AcqRel);
        lock(&self.log).push((req.method().clone(), req.url().path().to_owned()));
        tracing::trace!(method = %req.method(), path = req.url().path(), "fake cars server received request");
        Ok(self.route(&req))
    }
}
