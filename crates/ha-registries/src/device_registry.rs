//! Device Registry
//!
//! Tracks registered devices by identifiers and connections. A device's
//! area is what entities without an area of their own fall back to.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::{DeviceRegistryUpdatedData, RegistryAction};
use ha_core::Context;
use ha_event_bus::SharedEventBus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::changed_fields;
use crate::entity_registry::DisabledBy;
use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for device registry
pub const STORAGE_KEY: &str = "core.device_registry";
/// Connection type for network MAC addresses
pub const CONNECTION_NETWORK_MAC: &str = "mac";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 12;

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A device connection (type, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConnection(pub String, pub String);

impl DeviceConnection {
    /// Create a connection; MAC addresses are normalized
    pub fn new(conn_type: impl Into<String>, id: impl Into<String>) -> Self {
        let conn_type = conn_type.into();
        let id = id.into();
        let id = if conn_type == CONNECTION_NETWORK_MAC {
            format_mac(&id)
        } else {
            id
        };
        Self(conn_type, id)
    }

    pub fn connection_type(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Format a MAC address as lowercase, colon-separated.
///
/// Accepts colon, dash, dot (Cisco) or separator-less input; anything else is
/// returned unchanged.
pub fn format_mac(mac: &str) -> String {
    let colons = mac.chars().filter(|c| *c == ':').count();
    let dashes = mac.chars().filter(|c| *c == '-').count();
    let dots = mac.chars().filter(|c| *c == '.').count();

    if mac.len() == 17 && colons == 5 {
        return mac.to_lowercase();
    }

    let stripped = if mac.len() == 17 && dashes == 5 {
        mac.replace('-', "")
    } else if mac.len() == 14 && dots == 2 {
        mac.replace('.', "")
    } else if mac.len() == 12 && mac.chars().all(|c| c.is_ascii_hexdigit()) {
        mac.to_string()
    } else {
        return mac.to_string();
    };

    stripped
        .to_lowercase()
        .as_bytes()
        .chunks(2)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal id
    pub id: String,

    /// Unique identifiers by domain (e.g., [["hue", "bridge123"]])
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    /// Connection info (e.g., [["mac", "aa:bb:cc:dd:ee:ff"]])
    #[serde(default)]
    pub connections: Vec<DeviceConnection>,

    /// Associated config entries
    #[serde(default)]
    pub config_entries: Vec<String>,

    /// Device name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_by_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Parent device (for nested devices)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_device_id: Option<String>,

    /// Disable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,

    /// Assigned area
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,

    /// Insertion order (for stable iteration)
    #[serde(skip)]
    pub insertion_order: u64,
}

impl DeviceEntry {
    /// Create a new device entry
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            connections: Vec::new(),
            config_entries: Vec::new(),
            name: name.map(|s| s.to_string()),
            name_by_user: None,
            manufacturer: None,
            model: None,
            via_device_id: None,
            disabled_by: None,
            area_id: None,
            created_at: now,
            modified_at: now,
            insertion_order: 0,
        }
    }

    /// Get display name (user name or device name)
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }

    /// Check if device is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }
}

/// Device registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device Registry
///
/// Entries are stored as `Arc<DeviceEntry>` to avoid cloning on reads.
pub struct DeviceRegistry {
    storage: Arc<Storage>,

    /// Event bus notified of every change
    bus: Option<SharedEventBus>,

    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device_id
    by_identifier: DashMap<String, String>,

    /// Index: connection key -> device_id
    by_connection: DashMap<String, String>,

    /// Index: area_id -> set of device_ids
    by_area_id: DashMap<String, HashSet<String>>,

    insertion_counter: AtomicU64,
}

impl DeviceRegistry {
    /// Create a new device registry
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            bus: None,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_connection: DashMap::new(),
            by_area_id: DashMap::new(),
            insertion_counter: AtomicU64::new(0),
        }
    }

    /// Fire `device_registry_updated` on the given bus for every change
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<DeviceRegistryData>(STORAGE_KEY).await? {
            info!(
                "Loading {} devices from storage (v{}.{})",
                storage_file.data.devices.len(),
                storage_file.version,
                storage_file.minor_version
            );

            let mut devices = storage_file.data.devices;
            devices.sort_by_key(|e| e.created_at);
            for mut entry in devices {
                entry.insertion_order = self.insertion_counter.fetch_add(1, Ordering::Relaxed);
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = DeviceRegistryData {
            devices: self.iter().into_iter().map(|d| (*d).clone()).collect(),
        };
        let count = data.devices.len();

        self.storage.save(&data.into_storage_file()).await?;
        debug!("Saved {} devices to storage", count);
        Ok(())
    }

    fn notify(&self, data: DeviceRegistryUpdatedData) {
        if let Some(bus) = &self.bus {
            bus.fire_typed(data, Context::new());
        }
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier.insert(identifier.key(), device_id.clone());
        }

        for connection in &entry.connections {
            self.by_connection.insert(connection.key(), device_id.clone());
        }

        if let Some(ref area_id) = entry.area_id {
            self.by_area_id
                .entry(area_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }

        for connection in &entry.connections {
            self.by_connection.remove(&connection.key());
        }

        if let Some(ref area_id) = entry.area_id {
            if let Some(mut ids) = self.by_area_id.get_mut(area_id) {
                ids.remove(&entry.id);
            }
        }

        self.by_id.remove(&entry.id);
    }

    /// Get device by ID
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Get device by identifier
    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let key = DeviceIdentifier::new(domain, id).key();
        let device_id = self.by_identifier.get(&key)?.clone();
        self.get(&device_id)
    }

    /// Get device by connection
    pub fn get_by_connection(&self, conn_type: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let key = DeviceConnection::new(conn_type, id).key();
        let device_id = self.by_connection.get(&key)?.clone();
        self.get(&device_id)
    }

    /// Get all devices in an area
    pub fn get_by_area_id(&self, area_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_area_id
            .get(area_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create a device
    ///
    /// Looks up by identifiers first, then connections. A device that is
    /// found gets any missing identifiers, connections and config entry merged
    /// in; otherwise a new device is created.
    pub fn get_or_create(
        &self,
        identifiers: &[DeviceIdentifier],
        connections: &[DeviceConnection],
        config_entry_id: Option<&str>,
        name: Option<&str>,
    ) -> Arc<DeviceEntry> {
        let connections: Vec<DeviceConnection> = connections
            .iter()
            .map(|c| DeviceConnection::new(c.connection_type(), c.id()))
            .collect();

        let existing = identifiers
            .iter()
            .find_map(|i| self.get_by_identifier(i.domain(), i.id()))
            .or_else(|| {
                connections
                    .iter()
                    .find_map(|c| self.get_by_connection(c.connection_type(), c.id()))
            });

        if let Some(existing) = existing {
            debug!("Found existing device: {}", existing.id);
            return self
                .update(&existing.id, |e| {
                    for identifier in identifiers {
                        if !e.identifiers.contains(identifier) {
                            e.identifiers.push(identifier.clone());
                        }
                    }
                    for connection in &connections {
                        if !e.connections.contains(connection) {
                            e.connections.push(connection.clone());
                        }
                    }
                    if let Some(config_entry_id) = config_entry_id {
                        if !e.config_entries.iter().any(|c| c == config_entry_id) {
                            e.config_entries.push(config_entry_id.to_string());
                        }
                    }
                })
                .unwrap_or(existing);
        }

        let mut entry = DeviceEntry::new(name);
        entry.insertion_order = self.insertion_counter.fetch_add(1, Ordering::Relaxed);
        entry.identifiers = identifiers.to_vec();
        entry.connections = connections;
        entry.config_entries = config_entry_id.map(String::from).into_iter().collect();

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("Registered new device: {:?} ({})", name, arc_entry.id);
        self.notify(DeviceRegistryUpdatedData {
            action: RegistryAction::Create,
            device_id: arc_entry.id.clone(),
            changes: None,
        });
        arc_entry
    }

    /// Update a device
    ///
    /// Returns the updated entry, or None if the device doesn't exist. An
    /// update that changes nothing fires no event.
    pub fn update<F>(&self, device_id: &str, f: F) -> Option<Arc<DeviceEntry>>
    where
        F: FnOnce(&mut DeviceEntry),
    {
        let old = self.get(device_id)?;
        let mut entry = (*old).clone();
        f(&mut entry);
        // The id is the primary key and cannot change
        entry.id = old.id.clone();

        let changes = changed_fields(&*old, &entry, &["modified_at"]);
        if changes.is_empty() {
            return Some(old);
        }
        entry.modified_at = Utc::now();

        self.unindex_entry(&old);
        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));

        self.notify(DeviceRegistryUpdatedData {
            action: RegistryAction::Update,
            device_id: device_id.to_string(),
            changes: Some(changes),
        });
        Some(new_arc)
    }

    /// Remove a device
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let (_, arc_entry) = self.by_id.remove(device_id)?;
        self.unindex_entry(&arc_entry);
        info!("Removed device: {}", device_id);
        self.notify(DeviceRegistryUpdatedData {
            action: RegistryAction::Remove,
            device_id: device_id.to_string(),
            changes: None,
        });
        Some(arc_entry)
    }

    /// Get count of devices
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All devices in insertion order
    pub fn iter(&self) -> Vec<Arc<DeviceEntry>> {
        let mut devices: Vec<Arc<DeviceEntry>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        devices.sort_by_key(|d| d.insertion_order);
        devices
    }
}
