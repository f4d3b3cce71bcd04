use carlot_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, IdToken, IdTokenRef, RefreshToken, RefreshTokenRef};

/// An access token stamped with when it was issued and how long it lasts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenWithLifetime {
    access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<IdToken>,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// Where a token is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// Valid, with no need to refresh yet
    Fresh,
    /// Still valid, but due for a refresh
    Stale,
    /// No longer accepted
    Expired,
}

impl TokenWithLifetime {
    /// The bearer token sent to the API
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// The ID token, when the provider issued one
    #[inline]
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_deref()
    }

    /// How long the token was issued for
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// When the token was received
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// When the token becomes due for a refresh
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// When the token stops being accepted
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// The token's status at `time`
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        match time {
            t if t < self.stale => TokenStatus::Fresh,
            t if t < self.expiry => TokenStatus::Stale,
            _ => TokenStatus::Expired,
        }
    }

    /// Time left before the token expires, measured by `clock`
    #[inline]
    pub fn until_expired_with_clock<C: Clock>(&self, clock: &C) -> DurationSecs {
        self.until_expired_at(clock.now())
    }

    /// Time left before the token expires, zero once it has
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// Everything an authenticated session holds
///
/// Keycloak always issues a refresh token for the password grant, but other
/// providers may not, so it stays optional.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenSet {
    access: TokenWithLifetime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_expiry: Option<UnixTime>,
}

impl TokenSet {
    /// Bundles an access token with the refresh token issued alongside it
    pub fn new(
        access: TokenWithLifetime,
        refresh_token: Option<RefreshToken>,
        refresh_expiry: Option<UnixTime>,
    ) -> Self {
        Self {
            access,
            refresh_token,
            refresh_expiry,
        }
    }

    /// The access token and its lifetime
    #[inline]
    pub fn access(&self) -> &TokenWithLifetime {
        &self.access
    }

    /// The refresh token, if the provider issued one
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Whether the refresh token is known to have expired as of `time`
    ///
    /// A refresh token without a reported expiry is never considered expired.
    pub fn refresh_expired_at(&self, time: UnixTime) -> bool {
        self.refresh_expiry.is_some_and(|expiry| time >= expiry)
    }
}

/// Decides when a newly issued token becomes due for a refresh
///
/// A token goes stale after three quarters of its lifetime, and always at
/// least 30 seconds before it expires.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    freshness_period: f64,
    min_staleness_period: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    fn default() -> Self {
        Self {
            freshness_period: 0.75,
            min_staleness_period: DurationSecs(30),
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Replaces the clock used to stamp newly issued tokens
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            freshness_period: self.freshness_period,
            min_staleness_period: self.min_staleness_period,
            clock,
        }
    }

    /// The clock used to stamp tokens
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn time_to_stale(&self, issued: UnixTime, valid_duration: DurationSecs) -> UnixTime {
        let stale_delay = valid_duration * self.freshness_period;
        let latest_stale = issued + valid_duration - self.min_staleness_period;
        (issued + stale_delay).min(latest_stale).max(issued)
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Stamps a token received just now that is valid for `valid_duration`
    pub fn create_token<A, I>(
        &self,
        access_token: A,
        id_token: Option<I>,
        valid_duration: DurationSecs,
    ) -> TokenWithLifetime
    where
        A: AsRef<AccessTokenRef>,
        I: AsRef<IdTokenRef>,
    {
        let issued = self.clock.now();
        TokenWithLifetime {
            access_token: access_token.as_ref().to_owned(),
            id_token: id_token.map(|i| i.as_ref().to_owned()),
            lifetime: valid_duration,
            issued,
            stale: self.time_to_stale(issued, valid_duration),
            expiry: issued + valid_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use carlot_clock::TestClock;

    use super::*;

    fn config_at(time: u64) -> TokenLifetimeConfig<TestClock> {
        TokenLifetimeConfig::default().with_clock(TestClock::new(UnixTime(time)))
    }

    #[test]
    fn token_becomes_stale_after_three_quarters_of_lifetime() {
        let token = config_at(1_000).create_token(
            AccessToken::from_static("token"),
            None::<IdToken>,
            DurationSecs(300),
        );

        assert_eq!(token.issued(), UnixTime(1_000));
        assert_eq!(token.stale(), UnixTime(1_225));
        assert_eq!(token.expiry(), UnixTime(1_300));
        assert_eq!(token.token_status_at(UnixTime(1_100)), TokenStatus::Fresh);
        assert_eq!(token.token_status_at(UnixTime(1_225)), TokenStatus::Stale);
        assert_eq!(token.token_status_at(UnixTime(1_300)), TokenStatus::Expired);
    }

    #[test]
    fn short_lived_token_keeps_minimum_stale_window() {
        let token = config_at(1_000).create_token(
            AccessToken::from_static("token"),
            None::<IdToken>,
            DurationSecs(60),
        );

        assert_eq!(token.stale(), UnixTime(1_030));
    }

    #[test]
    fn token_shorter_than_stale_window_is_immediately_stale() {
        let token = config_at(1_000).create_token(
            AccessToken::from_static("token"),
            None::<IdToken>,
            DurationSecs(10),
        );

        assert_eq!(token.stale(), UnixTime(1_000));
        assert_eq!(token.token_status_at(UnixTime(1_000)), TokenStatus::Stale);
    }

    #[test]
    fn remaining_validity_saturates_at_zero() {
        let token = config_at(1_000).create_token(
            AccessToken::from_static("token"),
            None::<IdToken>,
            DurationSecs(60),
        );

        assert_eq!(token.until_expired_at(UnixTime(1_050)), DurationSecs(10));
        assert_eq!(token.until_expired_at(UnixTime(2_000)), DurationSecs(0));
    }

    #[test]
    fn token_set_survives_json_round_trip() {
        let access = config_at(1_000).create_token(
            AccessToken::from_static("token"),
            Some(IdToken::from_static("id")),
            DurationSecs(300),
        );
        let set = TokenSet::new(
            access,
            Some(RefreshToken::from_static("refresh")),
            Some(UnixTime(2_800)),
        );

        let json = serde_json::to_string(&set).unwrap();
        let back: TokenSet = serde_json::from_str(&json).unwrap();

        assert_eq!(back.access().access_token().as_str(), "token");
        assert_eq!(back.access().id_token().map(|t| t.as_str()), Some("id"));
        assert_eq!(back.refresh_token().map(|t| t.as_str()), Some("refresh"));
        assert!(!back.refresh_expired_at(UnixTime(2_799)));
        assert!(back.refresh_expired_at(UnixTime(2_800)));
    }
}
