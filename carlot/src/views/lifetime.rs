use tokio::sync::watch;

/// Marks how long a view is alive
///
/// Background work started by a view holds a [`LifetimeWatch`] and checks it
/// before applying any result. Dropping the view drops its `Lifetime`, which
/// ends every watch.
#[derive(Debug)]
pub struct Lifetime {
    alive: watch::Sender<()>,
}

impl Lifetime {
    /// Starts a new lifetime
    pub fn new() -> Self {
        let (alive, _) = watch::channel(());
        Self { alive }
    }

    /// Watches this lifetime
    pub fn watch(&self) -> LifetimeWatch {
        LifetimeWatch {
            alive: self.alive.subscribe(),
        }
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

/// Observes whether a [`Lifetime`] has ended
#[derive(Clone, Debug)]
pub struct LifetimeWatch {
    alive: watch::Receiver<()>,
}

impl LifetimeWatch {
    /// Whether the lifetime is still going
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.has_changed().is_ok()
    }

    /// Completes once the lifetime has ended
    pub async fn ended(&mut self) {
        while self.alive.changed().await.is_ok() {}
    }
}
