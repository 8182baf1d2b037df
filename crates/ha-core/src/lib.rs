//! Core types for the hub
//!
//! This crate provides the fundamental types shared by every other crate in
//! the workspace: Context, Event, CoreState and the payloads of the events
//! fired by the registries.

mod context;
mod core_state;
pub mod domains;
mod event;

pub use context::Context;
pub use core_state::CoreState;
pub use event::{Event, EventData, EventOrigin, EventType};

/// Standard event types fired on the bus
pub mod events {
    use serde::{Deserialize, Serialize};

    use super::EventData;

    /// Fired when the hub starts
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Fired once every component has been set up and the hub is running
    pub const HOMEASSISTANT_STARTED: &str = "homeassistant_started";

    /// Fired when the hub is asked to stop
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Fired when an entity registry entry is created, updated or removed
    pub const ENTITY_REGISTRY_UPDATED: &str = "entity_registry_updated";

    /// Fired when a device registry entry is created, updated or removed
    pub const DEVICE_REGISTRY_UPDATED: &str = "device_registry_updated";

    /// What happened to a registry entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RegistryAction {
        Create,
        Update,
        Remove,
    }

    /// Data for ENTITY_REGISTRY_UPDATED events
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct EntityRegistryUpdatedData {
        pub action: RegistryAction,
        pub entity_id: String,
        /// Previous entity_id when an update renamed the entity
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub old_entity_id: Option<String>,
        /// Names of the fields that changed (update only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub changes: Option<Vec<String>>,
    }

    impl EventData for EntityRegistryUpdatedData {
        fn event_type() -> &'static str {
            ENTITY_REGISTRY_UPDATED
        }
    }

    /// Data for DEVICE_REGISTRY_UPDATED events
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct DeviceRegistryUpdatedData {
        pub action: RegistryAction,
        pub device_id: String,
        /// Names of the fields that changed (update only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub changes: Option<Vec<String>>,
    }

    impl EventData for DeviceRegistryUpdatedData {
        fn event_type() -> &'static str {
            DEVICE_REGISTRY_UPDATED
        }
    }
}
