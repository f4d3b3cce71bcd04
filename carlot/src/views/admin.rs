use std::sync::{Arc, Mutex, MutexGuard};

use carlot_api::{ApiError, CarsApi};
use carlot_auth::Secured;

use super::{Lifetime, LifetimeWatch};

/// The greeting reserved for administrators
///
/// Fetched on mount and whenever the session's identity changes. A failed
/// fetch keeps whatever message was shown before.
#[derive(Debug)]
pub struct AdminView {
    api: Arc<CarsApi>,
    message: Arc<Mutex<Option<String>>>,
    lifetime: Lifetime,
}

impl AdminView {
    /// Mounts the view, fetching the message and following the session
    pub async fn mount(secured: &Secured, api: Arc<CarsApi>) -> Self {
        let view = Self {
            api,
            message: Arc::default(),
            lifetime: Lifetime::new(),
        };

        let mut identity = secured.session().subscribe();
        identity.borrow_and_update();
        let _ = view.refresh().await;

        let api = view.api.clone();
        let message = view.message.clone();
        let mut alive = view.lifetime.watch();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = alive.ended() => break,
                    changed = identity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        identity.borrow_and_update();
                        let _ = fetch(&api, &message, &alive).await;
                    }
                }
            }
        });

        view
    }

    /// The message as last fetched
    pub fn message(&self) -> Option<String> {
        lock(&self.message).clone()
    }

    /// Fetches the message again
    pub async fn refresh(&self) -> Result<(), ApiError> {
        fetch(&self.api, &self.message, &self.lifetime.watch()).await
    }
}

async fn fetch(
    api: &CarsApi,
    message: &Mutex<Option<String>>,
    alive: &LifetimeWatch,
) -> Result<(), ApiError> {
    match api.admin_message().await {
        Ok(text) if alive.is_alive() => {
            *lock(message) = Some(text);
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(error) => {
            tracing::warn!(%error, "unable to fetch admin message");
            Err(error)
        }
    }
}

fn lock(message: &Mutex<Option<String>>) -> MutexGuard<'_, Option<String>> {
    message.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
