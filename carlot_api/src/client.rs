use std::{fmt, sync::Arc};

use carlot_auth::{AuthError, Session};
use carlot_reqwest::{AccessTokenMiddleware, SameOrigin};
use reqwest::{Method, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{ApiError, Car, CarId};

/// The collection path of the cars resource
pub const CARS_PATH: &str = "/api/cars";

/// The path of the admin-only greeting
pub const ADMIN_PATH: &str = "/admin";

/// A client for the cars API that authenticates with the user's session
///
/// Every call first makes sure the session holds an access token that stays
/// valid for a little while longer, refreshing it if needed, and only then
/// sends a single request. The token is attached only to requests sent to the
/// API's own origin.
#[derive(Clone)]
pub struct CarsApi {
    http: ClientWithMiddleware,
    base_url: Url,
    session: Session,
}

impl fmt::Debug for CarsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarsApi")
            .field("base_url", &self.base_url.as_str())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl CarsApi {
    /// Constructs a client for the API at `base_url` using a default HTTP client
    pub fn new(base_url: Url, session: Session) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, session)
    }

    /// Constructs a client for the API at `base_url` using the given HTTP client
    pub fn with_client(client: reqwest::Client, base_url: Url, session: Session) -> Self {
        Self::with_middleware(client, base_url, session, std::iter::empty())
    }

    /// Constructs a client that runs `layers` after the token has been attached
    ///
    /// The layers see each request exactly as it will be sent, `Authorization`
    /// header included.
    pub fn with_middleware(
        client: reqwest::Client,
        base_url: Url,
        session: Session,
        layers: impl IntoIterator<Item = Arc<dyn Middleware>>,
    ) -> Self {
        let builder = ClientBuilder::new(client).with(
            AccessTokenMiddleware::new(session.clone())
                .with_predicate(SameOrigin::new(&base_url)),
        );
        let http = layers
            .into_iter()
            .fold(builder, |builder, layer| builder.with_arc(layer))
            .build();

        Self {
            http,
            base_url,
            session,
        }
    }

    /// The session used to authenticate requests
    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The URL of `path` below the base URL
    ///
    /// `path` is appended to any path the base URL already has, so an API
    /// served under a prefix such as `http://gateway/cars-svc/` keeps it.
    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// Sends one authenticated request to `path`, with an optional JSON body
    ///
    /// Returns the response only if its status was successful.
    #[tracing::instrument(level = "debug", skip(self, body), fields(base_url = %self.base_url))]
    pub async fn request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        if !self.session.authenticated() {
            tracing::debug!("session is not authenticated, not sending request");
            return Err(ApiError::NotAuthenticated);
        }

        self.session.update_token().await.map_err(|error| match error {
            AuthError::NotAuthenticated => ApiError::NotAuthenticated,
            error => ApiError::TokenRefresh(error),
        })?;

        let url = self.endpoint(path)?;
        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(ApiError::Transport)?;
        let status = resp.status();
        tracing::debug!(%status, "received response");

        match status {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            StatusCode::FORBIDDEN => Err(ApiError::Forbidden),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ApiError::Status { status, body })
            }
        }
    }

    /// Sends a request and decodes the JSON response body
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let resp = self.request(method, path, body).await?;
        let bytes = resp.bytes().await.map_err(ApiError::BodyRead)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetches every car
    pub async fn list_cars(&self) -> Result<Vec<Car>, ApiError> {
        self.request_json(Method::GET, CARS_PATH, None::<&()>).await
    }

    /// Adds a car; the server assigns its id
    pub async fn create_car(&self, car: &Car) -> Result<(), ApiError> {
        self.request(Method::POST, CARS_PATH, Some(car)).await?;
        Ok(())
    }

    /// Replaces the car with the same id
    pub async fn update_car(&self, car: &Car) -> Result<(), ApiError> {
        let id = car.id.ok_or(ApiError::MissingId)?;
        self.request(Method::PUT, &car_path(id), Some(car)).await?;
        Ok(())
    }

    /// Removes the car with the given id
    pub async fn delete_car(&self, id: CarId) -> Result<(), ApiError> {
        self.request(Method::DELETE, &car_path(id), None::<&()>)
            .await?;
        Ok(())
    }

    /// Fetches the greeting reserved for administrators
    pub async fn admin_message(&self) -> Result<String, ApiError> {
        let resp = self.request(Method::GET, ADMIN_PATH, None::<&()>).await?;
        resp.text().await.map_err(ApiError::BodyRead)
    }
}

fn car_path(id: CarId) -> String {
    format!("{CARS_PATH}/{id}")
}
