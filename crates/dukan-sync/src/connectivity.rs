//! # Connectivity Monitor
//!
//! Tracks whether the remote store is reachable and announces transitions
//! on the change notifier.
//!
//! ```text
//!   set(false) ──► watch: false ──► ChangeEvent::Connectivity(false)  "offline"
//!   set(true)  ──► watch: true  ──► ChangeEvent::Connectivity(true)   "online"
//!   set(true)  ──► unchanged, nothing published
//! ```

use dukan_store::{ChangeEvent, ChangeNotifier};
use tokio::sync::watch;
use tracing::info;

/// Current connectivity, shared by readers, the writer and the stock service.
#[derive(Debug)]
pub struct Connectivity {
    state: watch::Sender<bool>,
    notifier: ChangeNotifier,
}

impl Connectivity {
    pub fn new(online: bool, notifier: ChangeNotifier) -> Self {
        let (state, _) = watch::channel(online);
        Connectivity { state, notifier }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Updates connectivity. Returns true when the value changed.
    pub fn set(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if changed {
            info!(online, "Connectivity changed");
            self.notifier.publish(ChangeEvent::Connectivity(online));
        }
        changed
    }

    /// Receiver that observes every transition.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
