//! An auth client backed by a Keycloak realm's OpenID Connect endpoints

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use carlot_clock::{Clock, DurationSecs, System};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    state::SessionCell, AccessToken, AuthClient, AuthError, ClientId, Credentials, Realm,
    SessionIdentity, SessionStatus, TokenClaims, TokenLifetimeConfig, TokenSet,
};

mod dto;

/// Connection parameters for a Keycloak realm
#[derive(Clone, Debug)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak server
    pub url: reqwest::Url,
    /// The realm users log in to
    pub realm: Realm,
    /// The public client this application is registered as
    pub client_id: ClientId,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            url: reqwest::Url::parse("http://localhost:14082/").expect("static URL is valid"),
            realm: Realm::from_static("springboot-test"),
            client_id: ClientId::from_static("react-app"),
        }
    }
}

impl KeycloakConfig {
    /// Constructs a new configuration
    pub fn new(url: reqwest::Url, realm: impl Into<Realm>, client_id: impl Into<ClientId>) -> Self {
        Self {
            url,
            realm: realm.into(),
            client_id: client_id.into(),
        }
    }

    /// The realm's token endpoint
    pub fn token_endpoint(&self) -> reqwest::Url {
        self.openid_connect_endpoint("token")
    }

    /// The realm's end-session endpoint
    pub fn logout_endpoint(&self) -> reqwest::Url {
        self.openid_connect_endpoint("logout")
    }

    fn openid_connect_endpoint(&self, action: &str) -> reqwest::Url {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "realms",
                self.realm.as_str(),
                "protocol",
                "openid-connect",
                action,
            ]);
        }
        url
    }
}

/// An auth client that logs users in against a Keycloak realm
///
/// Users log in with the resource owner password grant. The session is
/// refreshed on demand with the refresh token grant whenever a caller asks
/// for a token that would otherwise be too close to its expiry.
pub struct KeycloakClient<C = System> {
    config: KeycloakConfig,
    token_url: reqwest::Url,
    logout_url: reqwest::Url,
    http: ClientWithMiddleware,
    lifetime_config: TokenLifetimeConfig<C>,
    state: SessionCell,
}

impl KeycloakClient<System> {
    /// Constructs a new client for the configured realm
    pub fn new(config: KeycloakConfig, http: impl Into<ClientWithMiddleware>) -> Self {
        Self {
            token_url: config.token_endpoint(),
            logout_url: config.logout_endpoint(),
            config,
            http: http.into(),
            lifetime_config: TokenLifetimeConfig::default(),
            state: SessionCell::new(),
        }
    }
}

impl<C> KeycloakClient<C> {
    /// Replaces the lifetime configuration used to stamp issued tokens
    pub fn with_lifetime_config<D>(
        self,
        lifetime_config: TokenLifetimeConfig<D>,
    ) -> KeycloakClient<D> {
        KeycloakClient {
            config: self.config,
            token_url: self.token_url,
            logout_url: self.logout_url,
            http: self.http,
            lifetime_config,
            state: self.state,
        }
    }
}

impl<C> fmt::Debug for KeycloakClient<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeycloakClient")
            .field("config", &self.config)
            .field("lifetime_config", &self.lifetime_config)
            .field("state", &self.state)
            .finish()
    }
}

impl<C: Clock + Send + Sync> KeycloakClient<C> {
    #[tracing::instrument(
        err,
        skip(self, form),
        fields(token_url = %self.token_url, client_id = %self.config.client_id),
    )]
    async fn request_token<F: Serialize + Sync>(
        &self,
        grant_type: &'static str,
        form: &F,
    ) -> Result<TokenSet, AuthError> {
        tracing::trace!("requesting token from identity provider");

        let resp = self
            .http
            .post(self.token_url.clone())
            .form(form)
            .send()
            .await
            .map_err(AuthError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received token response from identity provider"
        );

        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }

        let body = resp.bytes().await.map_err(AuthError::BodyReadError)?;
        let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

        let token = self.lifetime_config.create_token(
            &resp.access_token,
            resp.id_token.as_ref(),
            resp.expires_in,
        );
        let refresh_expiry = resp
            .refresh_expires_in
            .filter(|lifetime| lifetime.0 > 0)
            .map(|lifetime| token.issued() + lifetime);

        tracing::info!(
            has_id_token = resp.id_token.is_some(),
            has_refresh_token = resp.refresh_token.is_some(),
            lifetime = token.lifetime().0,
            stale = token.stale().0,
            expiry = token.expiry().0,
            "received new tokens"
        );

        Ok(TokenSet::new(token, resp.refresh_token, refresh_expiry))
    }

    fn current_token(&self, min_validity: DurationSecs) -> Result<Option<AccessToken>, AuthError> {
        if self.state.status() != SessionStatus::Authenticated {
            return Err(AuthError::NotAuthenticated);
        }

        let tokens = self.state.tokens().ok_or(AuthError::NotAuthenticated)?;
        let remaining = tokens
            .access()
            .until_expired_with_clock(self.lifetime_config.clock());

        if remaining >= min_validity {
            tracing::trace!(
                remaining = remaining.0,
                min_validity = min_validity.0,
                "current token is valid for long enough"
            );
            Ok(Some(tokens.access().access_token().to_owned()))
        } else {
            Ok(None)
        }
    }
}

async fn rejection(resp: reqwest::Response) -> AuthError {
    let status = resp.status().as_u16();
    match resp.text().await {
        Ok(body) => match serde_json::from_str::<dto::ErrorResponse>(&body) {
            Ok(error) => AuthError::Rejected {
                status,
                error: error.error,
                description: error.error_description,
            },
            Err(_) => AuthError::Rejected {
                status,
                error: body,
                description: None,
            },
        },
        Err(error) => AuthError::BodyReadError(error),
    }
}

#[async_trait]
impl<C> AuthClient for KeycloakClient<C>
where
    C: Clock + Send + Sync + fmt::Debug,
{
    async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let _operation = self.state.lock_operation().await;
        self.state.begin_login();

        let grant = dto::PasswordGrant::new(
            &self.config.client_id,
            &credentials.username,
            &credentials.password,
        );

        match self.request_token("password", &grant).await {
            Ok(tokens) => {
                self.state.establish(tokens);
                tracing::info!(username = %credentials.username, "logged in");
                Ok(())
            }
            Err(error) => {
                self.state.clear();
                Err(error)
            }
        }
    }

    async fn logout(&self) -> Result<(), AuthError> {
        let _operation = self.state.lock_operation().await;
        let tokens = self.state.tokens();
        self.state.clear();

        let Some(refresh_token) = tokens.as_deref().and_then(TokenSet::refresh_token) else {
            tracing::debug!("no refresh token held, session cleared locally");
            return Ok(());
        };

        let resp = self
            .http
            .post(self.logout_url.clone())
            .form(&dto::LogoutRequest {
                client_id: &self.config.client_id,
                refresh_token,
            })
            .send()
            .await
            .map_err(AuthError::RequestSend)?;

        if !resp.status().is_success() {
            return Err(rejection(resp).await);
        }

        tracing::info!("logged out");
        Ok(())
    }

    async fn update_token(&self, min_validity: DurationSecs) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.current_token(min_validity)? {
            return Ok(token);
        }

        let _operation = self.state.lock_operation().await;

        // Another caller may have refreshed while this one waited
        if let Some(token) = self.current_token(min_validity)? {
            return Ok(token);
        }

        let tokens = self.state.tokens().ok_or(AuthError::NotAuthenticated)?;
        let result = if tokens.refresh_expired_at(self.lifetime_config.clock().now()) {
            Err(AuthError::SessionExpired)
        } else if let Some(refresh_token) = tokens.refresh_token() {
            let grant = dto::RefreshGrant::new(&self.config.client_id, refresh_token);
            self.request_token("refresh_token", &grant).await
        } else {
            Err(AuthError::NoRefreshToken)
        };

        match result {
            Ok(refreshed) => {
                let token = refreshed.access().access_token().to_owned();
                if self.state.refresh(refreshed) {
                    Ok(token)
                } else {
                    Err(AuthError::NotAuthenticated)
                }
            }
            Err(error) => {
                if error.invalidates_session() {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "session can no longer be refreshed, clearing it"
                    );
                    self.state.clear();
                }
                Err(error)
            }
        }
    }

    fn restore(&self, tokens: TokenSet) {
        tracing::debug!(expiry = tokens.access().expiry().0, "restoring saved session");
        self.state.establish(tokens);
    }

    fn status(&self) -> SessionStatus {
        self.state.status()
    }

    fn token(&self) -> Option<AccessToken> {
        self.state.token()
    }

    fn tokens(&self) -> Option<Arc<TokenSet>> {
        self.state.tokens()
    }

    fn token_claims(&self) -> Option<Arc<TokenClaims>> {
        self.state.claims()
    }

    fn subscribe(&self) -> watch::Receiver<SessionIdentity> {
        self.state.subscribe()
    }
}
