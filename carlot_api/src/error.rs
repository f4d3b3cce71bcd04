use carlot_auth::AuthError;
use reqwest::StatusCode;
use thiserror::Error;

/// An error while calling the cars API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The session is not authenticated, so no request was made
    #[error("session is not authenticated")]
    NotAuthenticated,
    /// The access token could not be refreshed, so no request was made
    #[error("unable to refresh access token")]
    TokenRefresh(#[source] AuthError),
    /// The car has not been assigned an id, so it cannot be addressed
    #[error("car has no id")]
    MissingId,
    /// The API did not accept the access token
    #[error("API rejected the access token")]
    Unauthorized,
    /// The access token does not grant access to the resource
    #[error("access to the resource is forbidden")]
    Forbidden,
    /// The API answered with an unexpected status
    #[error("API responded with status {status}: {body}")]
    Status {
        /// The status returned
        status: StatusCode,
        /// The body returned, if readable
        body: String,
    },
    /// Unable to build a URL for the request path
    #[error("invalid request path")]
    Url(#[from] url::ParseError),
    /// Unable to send the request to the API
    #[error("error sending request to API")]
    Transport(#[source] reqwest_middleware::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to decode the response body
    #[error("error decoding response body")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether the error means the user needs to log in again
    pub fn requires_login(&self) -> bool {
        match self {
            Self::NotAuthenticated | Self::Unauthorized => true,
            Self::TokenRefresh(error) => error.invalidates_session(),
            _ => false,
        }
    }

    /// Whether the error was caused by a failure to reach the API, and
    /// the same request might succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::BodyRead(_) => true,
            Self::TokenRefresh(error) => !error.invalidates_session(),
            Self::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}
