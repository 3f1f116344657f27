use tokio::sync::watch;
use tracing::info;

/// Observes online/offline transitions and lets the scheduler gate sync
/// passes on them.
///
/// Flapping is not an error here: the monitor only records the current
/// state. Whatever surface actually detects connectivity (network stack
/// callback, reachability probe) calls `set_online` / `set_offline`; the
/// scheduler subscribes and reacts to recoveries.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: watch::channel(initially_online).0,
        }
    }

    pub fn set_online(&self) {
        if !*self.state.borrow() {
            info!("Connectivity restored");
        }
        self.state.send_replace(true);
    }

    pub fn set_offline(&self) {
        if *self.state.borrow() {
            info!("Connectivity lost");
        }
        self.state.send_replace(false);
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that yields on every state change
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
