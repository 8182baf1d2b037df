//! Xiaozhi voice assistant bridge
//!
//! Reports the hub's controllable entities to the Xiaozhi backend through a
//! local loader process, and keeps a long-lived access token issued so the
//! backend can call back into the hub.
//!
//! Registry changes are debounced into a single upload; a snapshot of the
//! last accepted upload (`.storage/chuguan-xiaozhi.<mac>`) suppresses redundant ones.

mod config;
mod debounce;
mod error;
mod exposed;
mod hub;
mod mac;
mod socket;
mod store;

pub use config::{
    XiaozhiConfig, DEFAULT_CLIENT_NAME, DEFAULT_SOCKET_PATH, MAX_TOKEN_LIFESPAN_DAYS,
};
pub use debounce::Debouncer;
pub use error::{XiaozhiError, XiaozhiResult};
pub use exposed::exposed_entities;
pub use hub::{setup, XiaozhiHub};
pub use mac::{main_mac, main_mac_in, UNKNOWN_MAC};
pub use socket::{LoaderClient, SockResponse, MAX_RESPONSE_BYTES};
pub use store::{Snapshot, SnapshotStore, TokenRecord, STORAGE_KEY_PREFIX};

/// Configuration section and component name
pub const DOMAIN: &str = "xiaozhi";
