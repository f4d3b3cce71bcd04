//! Claims carried by the identity provider's access tokens
//!
//! Claims are decoded from the access token's payload without verifying the
//! signature. The token is only ever shown back to the API that issued the
//! session, which performs the real verification; the client only uses the
//! claims for display and for deciding which roles to expect.

use std::collections::{BTreeMap, BTreeSet};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use carlot_clock::UnixTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AccessTokenRef, ClientIdRef};

/// Roles granted within some scope of the identity provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    /// The granted role names
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The decoded payload of an access token
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The subject the token was issued to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// The user's login name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Expiry of the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<UnixTime>,
    /// Time the token was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<UnixTime>,
    /// Roles granted across the whole realm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RoleGrant>,
    /// Roles granted per client
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_access: BTreeMap<String, RoleGrant>,
    /// Any other claims present in the token
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An error decoding the claims of a token
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// The token does not have the three dot-separated segments of a JWT
    #[error("token is not a JWT")]
    NotAJwt,
    /// The payload segment is not valid base64url
    #[error("token payload is not valid base64url")]
    Base64(#[from] base64::DecodeError),
    /// The payload is not a JSON claims object
    #[error("token payload is not a valid claims object")]
    Json(#[from] serde_json::Error),
}

impl TokenClaims {
    /// Decodes the claims from the payload segment of a JWT access token
    pub fn decode(token: &AccessTokenRef) -> Result<Self, ClaimsError> {
        let mut segments = token.as_str().split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(ClaimsError::NotAJwt),
        };

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The name to show for the user
    ///
    /// Falls back to the subject when the provider did not include a
    /// preferred username.
    pub fn display_name(&self) -> Option<&str> {
        self.preferred_username.as_deref().or(self.sub.as_deref())
    }

    /// All roles granted to the user, either realm-wide or on the given client
    pub fn roles(&self, client_id: &ClientIdRef) -> BTreeSet<&str> {
        let realm = self
            .realm_access
            .iter()
            .flat_map(|grant| grant.roles.iter());
        let client = self
            .resource_access
            .get(client_id.as_str())
            .into_iter()
            .flat_map(|grant| grant.roles.iter());

        realm.chain(client).map(String::as_str).collect()
    }

}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{test_util::unsigned_jwt, *};

    fn keycloak_claims() -> serde_json::Value {
        json!({
            "exp": 1_700_000_300,
            "iat": 1_700_000_000,
            "sub": "8a1f0e5c",
            "preferred_username": "alice",
            "realm_access": { "roles": ["basic-role", "offline_access"] },
            "resource_access": {
                "react-app": { "roles": ["view-cars", "admin-role"] },
                "account": { "roles": ["manage-account"] }
            },
            "scope": "openid profile"
        })
    }

    #[test]
    fn decodes_keycloak_access_token() {
        let token = unsigned_jwt(&keycloak_claims());
        let claims = TokenClaims::decode(&token).unwrap();

        assert_eq!(claims.display_name(), Some("alice"));
        assert_eq!(claims.exp, Some(UnixTime(1_700_000_300)));
        assert_eq!(claims.extra.get("scope"), Some(&json!("openid profile")));
    }

    #[test]
    fn merges_realm_and_client_roles() {
        let token = unsigned_jwt(&keycloak_claims());
        let claims = TokenClaims::decode(&token).unwrap();
        let client = ClientIdRef::from_static("react-app");

        let roles: Vec<_> = claims.roles(client).into_iter().collect();
        assert_eq!(
            roles,
            ["admin-role", "basic-role", "offline_access", "view-cars"]
        );
    }

    #[test]
    fn roles_of_another_client_are_ignored() {
        let token = unsigned_jwt(&keycloak_claims());
        let claims = TokenClaims::decode(&token).unwrap();

        let roles = claims.roles(ClientIdRef::from_static("other-app"));
        assert!(roles.contains("basic-role"));
        assert!(!roles.contains("view-cars"));
    }

    #[test]
    fn falls_back_to_subject_for_display() {
        let token = unsigned_jwt(&json!({ "sub": "service-account" }));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.display_name(), Some("service-account"));
    }

    #[test]
    fn opaque_token_is_not_a_jwt() {
        let token = AccessTokenRef::from_static("opaque-token");
        assert!(matches!(
            TokenClaims::decode(token),
            Err(ClaimsError::NotAJwt)
        ));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        let token = AccessTokenRef::from_static("a.!!!.c");
        assert!(matches!(
            TokenClaims::decode(token),
            Err(ClaimsError::Base64(_))
        ));
    }
}
