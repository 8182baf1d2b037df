//! The hub handle shared with components

use ha_auth::AuthManager;
use ha_core::{events, Context, CoreState, Event};
use ha_event_bus::{EventBus, SharedEventBus};
use ha_registries::{Registries, Storage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// The central hub instance
pub struct HomeAssistant {
    /// Configuration directory; `.storage/` lives below it
    pub config_dir: PathBuf,
    /// Event bus for pub/sub communication
    pub bus: SharedEventBus,
    /// Entity, device and area registries
    pub registries: Arc<Registries>,
    /// Users and tokens
    pub auth: AuthManager,
    state: watch::Sender<CoreState>,
}

impl HomeAssistant {
    /// Create a hub rooted at `config_dir`
    ///
    /// Nothing is loaded from disk yet; see [`Registries::load_all`] and
    /// [`AuthManager::load`].
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self::with_bus(config_dir, Arc::new(EventBus::new()))
    }

    /// Create a hub on an existing bus
    pub fn with_bus(config_dir: impl AsRef<Path>, bus: SharedEventBus) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        let registries = Arc::new(Registries::with_bus(&config_dir, bus.clone()));
        let auth = AuthManager::new(registries.storage.clone());
        let (state, _) = watch::channel(CoreState::NotRunning);

        Self {
            config_dir,
            bus,
            registries,
            auth,
            state,
        }
    }

    pub fn storage(&self) -> Arc<Storage> {
        self.registries.storage.clone()
    }

    pub fn state(&self) -> CoreState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: CoreState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Hub state {} -> {}", previous, state);
        }
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<CoreState> {
        self.state.subscribe()
    }

    /// True once startup has finished
    pub fn is_running(&self) -> bool {
        self.state() == CoreState::Running
    }

    /// Mark the hub running and announce it on the bus
    pub fn start(&self) {
        self.set_state(CoreState::Running);
        self.bus.fire(Event::new(
            events::HOMEASSISTANT_STARTED,
            serde_json::json!({}),
            Context::new(),
        ));
    }

    /// Announce shutdown on the bus
    pub fn begin_stop(&self) {
        self.set_state(CoreState::Stopping);
        self.bus.fire(Event::new(
            events::HOMEASSISTANT_STOP,
            serde_json::json!({}),
            Context::new(),
        ));
    }
}

/// Shared handle to the hub
pub type SharedHomeAssistant = Arc<HomeAssistant>;
