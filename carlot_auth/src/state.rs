use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::{AccessToken, SessionIdentity, SessionStatus, TokenClaims, TokenSet};

#[derive(Debug)]
struct Snapshot {
    status: SessionStatus,
    tokens: Option<Arc<TokenSet>>,
    claims: Option<Arc<TokenClaims>>,
}

/// Session state shared by the auth client implementations
///
/// Reads never block. Writers that talk to the identity provider hold the
/// operation lock for the whole exchange so that only one login, refresh, or
/// logout is in flight at a time.
#[derive(Debug)]
pub(crate) struct SessionCell {
    snapshot: ArcSwap<Snapshot>,
    identity: watch::Sender<SessionIdentity>,
    operation: Mutex<()>,
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCell {
    pub(crate) fn new() -> Self {
        let (identity, _) = watch::channel(SessionIdentity::default());
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot {
                status: SessionStatus::Unknown,
                tokens: None,
                claims: None,
            }),
            identity,
            operation: Mutex::new(()),
        }
    }

    pub(crate) async fn lock_operation(&self) -> MutexGuard<'_, ()> {
        self.operation.lock().await
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.snapshot.load().status
    }

    pub(crate) fn tokens(&self) -> Option<Arc<TokenSet>> {
        self.snapshot.load().tokens.clone()
    }

    pub(crate) fn token(&self) -> Option<AccessToken> {
        self.snapshot
            .load()
            .tokens
            .as_ref()
            .map(|t| t.access().access_token().to_owned())
    }

    pub(crate) fn claims(&self) -> Option<Arc<TokenClaims>> {
        self.snapshot.load().claims.clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionIdentity> {
        self.identity.subscribe()
    }

    /// Marks a login as underway
    pub(crate) fn begin_login(&self) {
        let current = self.snapshot.load();
        self.snapshot.store(Arc::new(Snapshot {
            status: SessionStatus::Unknown,
            tokens: current.tokens.clone(),
            claims: current.claims.clone(),
        }));
    }

    /// Installs a new set of tokens for a freshly authenticated user
    pub(crate) fn establish(&self, tokens: TokenSet) {
        let claims = decode_claims(&tokens);
        self.snapshot.store(Arc::new(Snapshot {
            status: SessionStatus::Authenticated,
            tokens: Some(Arc::new(tokens)),
            claims,
        }));
        self.bump_identity();
    }

    /// Replaces the tokens of an authenticated session after a refresh
    ///
    /// The session identity only changes if the new token belongs to a
    /// different subject. Returns `false` if the session was cleared while
    /// the refresh was underway, in which case the tokens are discarded.
    pub(crate) fn refresh(&self, tokens: TokenSet) -> bool {
        let current = self.snapshot.load_full();
        if current.tokens.is_none() {
            tracing::debug!("session cleared during refresh, discarding refreshed tokens");
            return false;
        }

        let claims = decode_claims(&tokens);
        let previous_subject = current.claims.as_ref().and_then(|c| c.sub.as_deref());
        let subject = claims.as_ref().and_then(|c| c.sub.as_deref());
        let subject_changed = previous_subject != subject;

        self.snapshot.store(Arc::new(Snapshot {
            status: SessionStatus::Authenticated,
            tokens: Some(Arc::new(tokens)),
            claims,
        }));

        if subject_changed {
            tracing::info!("refreshed token belongs to a different subject");
            self.bump_identity();
        }

        true
    }

    /// Drops any tokens held and marks the session unauthenticated
    pub(crate) fn clear(&self) {
        let previous = self.snapshot.swap(Arc::new(Snapshot {
            status: SessionStatus::Unauthenticated,
            tokens: None,
            claims: None,
        }));

        if previous.tokens.is_some() {
            self.bump_identity();
        }
    }

    fn bump_identity(&self) {
        self.identity.send_modify(|identity| identity.0 += 1);
        let identity = *self.identity.borrow();
        tracing::debug!(%identity, "session identity changed");
    }
}

fn decode_claims(tokens: &TokenSet) -> Option<Arc<TokenClaims>> {
    match TokenClaims::decode(tokens.access().access_token()) {
        Ok(claims) => Some(Arc::new(claims)),
        Err(error) => {
            tracing::debug!(%error, "access token carries no readable claims");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use carlot_clock::DurationSecs;
    use serde_json::json;

    use super::*;
    use crate::{claims::test_util::unsigned_jwt, IdToken, TokenLifetimeConfig};

    fn tokens_for(subject: &str) -> TokenSet {
        let access = TokenLifetimeConfig::default().create_token(
            unsigned_jwt(&json!({ "sub": subject })),
            None::<IdToken>,
            DurationSecs(300),
        );
        TokenSet::new(access, None, None)
    }

    #[test]
    fn starts_unknown_without_tokens() {
        let cell = SessionCell::new();
        assert_eq!(cell.status(), SessionStatus::Unknown);
        assert!(cell.tokens().is_none());
        assert_eq!(*cell.subscribe().borrow(), SessionIdentity(0));
    }

    #[test]
    fn establishing_changes_identity() {
        let cell = SessionCell::new();
        let rx = cell.subscribe();

        cell.establish(tokens_for("alice"));

        assert_eq!(cell.status(), SessionStatus::Authenticated);
        assert_eq!(*rx.borrow(), SessionIdentity(1));
        assert_eq!(
            cell.claims().and_then(|c| c.sub.clone()).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn refresh_for_same_subject_keeps_identity() {
        let cell = SessionCell::new();
        cell.establish(tokens_for("alice"));
        let rx = cell.subscribe();

        assert!(cell.refresh(tokens_for("alice")));

        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), SessionIdentity(1));
    }

    #[test]
    fn refresh_for_new_subject_changes_identity() {
        let cell = SessionCell::new();
        cell.establish(tokens_for("alice"));
        let rx = cell.subscribe();

        assert!(cell.refresh(tokens_for("bob")));

        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn refresh_after_clear_is_discarded() {
        let cell = SessionCell::new();
        cell.establish(tokens_for("alice"));
        cell.clear();

        assert!(!cell.refresh(tokens_for("alice")));
        assert_eq!(cell.status(), SessionStatus::Unauthenticated);
        assert!(cell.tokens().is_none());
    }

    #[test]
    fn clearing_an_empty_session_keeps_identity() {
        let cell = SessionCell::new();
        let rx = cell.subscribe();

        cell.clear();

        assert_eq!(cell.status(), SessionStatus::Unauthenticated);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn login_in_progress_is_unknown() {
        let cell = SessionCell::new();
        cell.clear();
        cell.begin_login();
        assert_eq!(cell.status(), SessionStatus::Unknown);
    }
}
