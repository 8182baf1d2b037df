//! Snapshot of what the backend last received
//!
//! One JSON document per hub, keyed by MAC address:
//!
//! ```json
//! {
//!   "devices": ["Kitchen,Ceiling,light.ceiling"],
//!   "api_key": "<access token>",
//!   "host": "...",
//!   "<user_id>": {"token_id": "...", "access_token": "...", "expire_time": 1767225600.0}
//! }
//! ```

use ha_registries::{Storage, StorageFile, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

const DEVICES: &str = "devices";
const API_KEY: &str = "api_key";
const HOST: &str = "host";

/// Storage key prefix; existing installs keep their snapshot under it
pub const STORAGE_KEY_PREFIX: &str = "chuguan-xiaozhi";

/// Long-lived token issued for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Refresh token id in the auth manager
    pub token_id: String,
    pub access_token: String,
    /// Unix seconds
    pub expire_time: f64,
}

/// The snapshot document
///
/// Keys this type does not know about survive a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot(Map<String, Value>);

impl Snapshot {
    /// Interpret stored data; anything but an object is an empty snapshot
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Last uploaded entity list, None if nothing was uploaded yet
    pub fn devices(&self) -> Option<Vec<String>> {
        self.0
            .get(DEVICES)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_devices(&mut self, devices: &[String]) {
        self.0.insert(DEVICES.to_string(), Value::from(devices.to_vec()));
    }

    /// Last uploaded API token
    pub fn api_key(&self) -> Option<&str> {
        self.0.get(API_KEY).and_then(Value::as_str)
    }

    pub fn set_api_key(&mut self, api_key: Option<&str>) {
        match api_key {
            Some(key) => {
                self.0.insert(API_KEY.to_string(), Value::from(key));
            }
            None => {
                self.0.remove(API_KEY);
            }
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.0.get(HOST).and_then(Value::as_str)
    }

    pub fn set_host(&mut self, host: &str) {
        self.0.insert(HOST.to_string(), Value::from(host));
    }

    pub fn token(&self, user_id: &str) -> Option<TokenRecord> {
        self.0
            .get(user_id)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_token(&mut self, user_id: &str, record: &TokenRecord) {
        match serde_json::to_value(record) {
            Ok(value) => {
                self.0.insert(user_id.to_string(), value);
            }
            Err(err) => warn!("Cannot store token record for {}: {}", user_id, err),
        }
    }
}

/// Persists the [`Snapshot`] under `chuguan-xiaozhi.<mac>`
pub struct SnapshotStore {
    storage: Arc<Storage>,
    key: String,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(storage: Arc<Storage>, mac: &str) -> Self {
        Self {
            storage,
            key: format!("{}.{}", STORAGE_KEY_PREFIX, mac),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the snapshot
    ///
    /// Missing or unreadable documents give an empty snapshot.
    pub async fn load(&self) -> Snapshot {
        match self.storage.load::<Value>(&self.key).await {
            Ok(Some(file)) => Snapshot::from_value(file.data),
            Ok(None) => Snapshot::default(),
            Err(err) => {
                warn!("Cannot read snapshot {}: {}", self.key, err);
                Snapshot::default()
            }
        }
    }

    /// Apply `f` to the stored snapshot and save the result
    pub async fn update<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Snapshot),
    {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.load().await;
        f(&mut snapshot);

        let file = StorageFile::new(
            self.key.clone(),
            snapshot.into_value(),
            STORAGE_VERSION,
            STORAGE_MINOR_VERSION,
        );
        self.storage.save(&file).await?;
        debug!("Saved snapshot {}", self.key);
        Ok(())
    }
}
