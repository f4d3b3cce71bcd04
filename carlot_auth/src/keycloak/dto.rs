//! DTOs for interacting with the identity provider's OpenID Connect endpoints

use carlot_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{AccessToken, ClientIdRef, IdToken, PasswordRef, RefreshToken, RefreshTokenRef, UsernameRef};

/// A resource owner password grant
#[derive(Debug, Serialize)]
pub(super) struct PasswordGrant<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    pub username: &'a UsernameRef,
    pub password: &'a PasswordRef,
    pub scope: &'static str,
}

impl<'a> PasswordGrant<'a> {
    pub(super) fn new(
        client_id: &'a ClientIdRef,
        username: &'a UsernameRef,
        password: &'a PasswordRef,
    ) -> Self {
        Self {
            grant_type: "password",
            client_id,
            username,
            password,
            scope: "openid",
        }
    }
}

/// A refresh token grant
#[derive(Debug, Serialize)]
pub(super) struct RefreshGrant<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    pub refresh_token: &'a RefreshTokenRef,
}

impl<'a> RefreshGrant<'a> {
    pub(super) fn new(client_id: &'a ClientIdRef, refresh_token: &'a RefreshTokenRef) -> Self {
        Self {
            grant_type: "refresh_token",
            client_id,
            refresh_token,
        }
    }
}

/// A request to end the session held by a refresh token
#[derive(Debug, Serialize)]
pub(super) struct LogoutRequest<'a> {
    pub client_id: &'a ClientIdRef,
    pub refresh_token: &'a RefreshTokenRef,
}

#[derive(Debug, Deserialize, Serialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    pub expires_in: DurationSecs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<DurationSecs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
