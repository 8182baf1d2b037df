//! Entity Registry
//!
//! Tracks all registered entities with unique_id tracking, device linking,
//! and indexes for fast lookups. When attached to an event bus every change
//! fires `entity_registry_updated`.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::{EntityRegistryUpdatedData, RegistryAction};
use ha_core::Context;
use ha_event_bus::SharedEventBus;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::changed_fields;
use crate::storage::{Storable, Storage, StorageResult};

/// Errors that can occur in the entity registry
#[derive(Debug, Error, Clone)]
pub enum EntityRegistryError {
    /// Entity was not found
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// An update tried to rename an entity onto an existing entity_id
    #[error("Entity ID already registered: {0}")]
    AlreadyRegistered(String),
}

/// Storage key for entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 19;

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    ConfigEntry,
    Device,
    Hass,
    Integration,
    User,
}

/// Reason an entity was hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenBy {
    Integration,
    User,
}

/// Entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    /// Configuration entity
    Config,
    /// Diagnostic entity
    Diagnostic,
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal id
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Parent device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Config entry that created this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    /// Component/platform that provides this entity
    pub platform: String,

    /// Entity category (config, diagnostic, or none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<EntityCategory>,

    /// Disable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,
    /// Hidden reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_by: Option<HiddenBy>,

    /// Custom icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Assigned area; falls back to the device's area when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    /// Alternative names
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub aliases: HashSet<String>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modified timestamp
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Create a new entity entry with minimal required fields
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id,
            device_id: None,
            config_entry_id: None,
            name: None,
            original_name: None,
            platform: platform.into(),
            entity_category: None,
            disabled_by: None,
            hidden_by: None,
            icon: None,
            area_id: None,
            aliases: HashSet::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Get the domain from entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    /// Get the object_id from entity_id
    pub fn object_id(&self) -> &str {
        self.entity_id.split('.').nth(1).unwrap_or(&self.entity_id)
    }

    /// Check if entity is disabled
    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    /// Check if entity is hidden
    pub fn is_hidden(&self) -> bool {
        self.hidden_by.is_some()
    }
}

/// Entity registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    /// All registered entities
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Entity Registry with multi-index support
///
/// Entries are stored as `Arc<EntityEntry>` to avoid cloning on reads.
pub struct EntityRegistry {
    storage: Arc<Storage>,

    /// Event bus notified of every change
    bus: Option<SharedEventBus>,

    /// Primary index: entity_id -> EntityEntry, in insertion order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: unique_id -> entity_id
    by_unique_id: DashMap<String, String>,

    /// Index: device_id -> set of entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: area_id -> set of entity_ids
    by_area_id: DashMap<String, HashSet<String>>,
}

impl EntityRegistry {
    /// Create a new entity registry
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            bus: None,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
            by_device_id: DashMap::new(),
            by_area_id: DashMap::new(),
        }
    }

    /// Fire `entity_registry_updated` on the given bus for every change
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Load from storage
    ///
    /// Loading does not fire events.
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<EntityRegistryData>(STORAGE_KEY).await? {
            info!(
                "Loading {} entities from storage (v{}.{})",
                storage_file.data.entities.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.entities {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = EntityRegistryData {
            entities: self.iter().into_iter().map(|e| (*e).clone()).collect(),
        };
        let count = data.entities.len();

        self.storage.save(&data.into_storage_file()).await?;
        debug!("Saved {} entities to storage", count);
        Ok(())
    }

    fn notify(&self, data: EntityRegistryUpdatedData) {
        if let Some(bus) = &self.bus {
            bus.fire_typed(data, Context::new());
        }
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.insert(unique_id.clone(), entity_id.clone());
        }

        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Some(ref area_id) = entry.area_id {
            self.by_area_id
                .entry(area_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    /// Remove an entry from the secondary indexes
    fn unindex_secondary(&self, entry: &EntityEntry) {
        let entity_id = &entry.entity_id;

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id.remove(unique_id);
        }

        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(entity_id);
            }
        }

        if let Some(ref area_id) = entry.area_id {
            if let Some(mut ids) = self.by_area_id.get_mut(area_id) {
                ids.remove(entity_id);
            }
        }
    }

    /// Get entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Get entity by unique_id
    pub fn get_by_unique_id(&self, unique_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_unique_id
            .get(unique_id)
            .and_then(|entity_id| self.get(&entity_id))
    }

    /// Get all entities for a device
    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get all entities directly assigned to an area
    pub fn get_by_area_id(&self, area_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_area_id
            .get(area_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create an entity entry
    ///
    /// If an entity with the same unique_id or entity_id exists it is
    /// returned unchanged; otherwise a new entry is registered.
    pub fn get_or_create(
        &self,
        platform: &str,
        entity_id: &str,
        unique_id: Option<&str>,
        config_entry_id: Option<&str>,
        device_id: Option<&str>,
    ) -> Arc<EntityEntry> {
        if let Some(uid) = unique_id {
            if let Some(existing) = self.get_by_unique_id(uid) {
                debug!("Found existing entity by unique_id: {}", existing.entity_id);
                return existing;
            }
        }

        if let Some(existing) = self.get(entity_id) {
            return existing;
        }

        let mut entry = EntityEntry::new(entity_id, platform, unique_id.map(String::from));
        entry.config_entry_id = config_entry_id.map(String::from);
        entry.device_id = device_id.map(String::from);

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("Registered new entity: {}", entity_id);
        self.notify(EntityRegistryUpdatedData {
            action: RegistryAction::Create,
            entity_id: entity_id.to_string(),
            old_entity_id: None,
            changes: None,
        });
        arc_entry
    }

    /// Update an entity entry
    ///
    /// The closure receives a mutable copy of the entry. Renaming the
    /// entity_id is allowed as long as the new id is free. An update that
    /// changes nothing fires no event.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let old = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        let mut entry = (*old).clone();
        f(&mut entry);

        if entry.entity_id != old.entity_id && self.get(&entry.entity_id).is_some() {
            return Err(EntityRegistryError::AlreadyRegistered(entry.entity_id));
        }

        let changes = changed_fields(&*old, &entry, &["modified_at"]);
        if changes.is_empty() {
            return Ok(old);
        }
        entry.modified_at = Utc::now();

        self.unindex_secondary(&old);
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.shift_remove(&old.entity_id);
        }

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));

        let old_entity_id = (new_arc.entity_id != old.entity_id).then(|| old.entity_id.clone());
        self.notify(EntityRegistryUpdatedData {
            action: RegistryAction::Update,
            entity_id: new_arc.entity_id.clone(),
            old_entity_id,
            changes: Some(changes),
        });

        Ok(new_arc)
    }

    /// Remove an entity
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let arc_entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))?;

        self.unindex_secondary(&arc_entry);
        info!("Removed entity: {}", entity_id);
        self.notify(EntityRegistryUpdatedData {
            action: RegistryAction::Remove,
            entity_id: entity_id.to_string(),
            old_entity_id: None,
            changes: None,
        });
        Some(arc_entry)
    }

    /// Get all entity IDs
    pub fn entity_ids(&self) -> Vec<String> {
        self.by_entity_id
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Get count of registered entities
    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entities in insertion order
    ///
    /// Returns a Vec to avoid holding the lock during iteration.
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::ENTITY_REGISTRY_UPDATED;
    use ha_event_bus::EventBus;
    use tempfile::TempDir;

    fn registry_with_bus(dir: &TempDir) -> (EntityRegistry, SharedEventBus) {
        let bus: SharedEventBus = Arc::new(EventBus::new());
        let storage = Arc::new(Storage::new(dir.path()));
        (EntityRegistry::new(storage).with_bus(bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_create_fires_event() {
        let dir = TempDir::new().unwrap();
        let (registry, bus) = registry_with_bus(&dir);
        let mut rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        let entry = registry.get_or_create("hue", "light.kitchen", Some("hue-1"), None, None);
        assert_eq!(entry.domain(), "light");
        assert_eq!(entry.object_id(), "kitchen");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.action, RegistryAction::Create);
        assert_eq!(event.data.entity_id, "light.kitchen");
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (registry, bus) = registry_with_bus(&dir);

        let first = registry.get_or_create("hue", "light.kitchen", Some("hue-1"), None, None);
        let mut rx = bus.subscribe(ENTITY_REGISTRY_UPDATED);
        let second = registry.get_or_create("hue", "light.other", Some("hue-1"), None, None);

        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_reports_changed_fields() {
        let dir = TempDir::new().unwrap();
        let (registry, bus) = registry_with_bus(&dir);
        registry.get_or_create("hue", "light.kitchen", None, None, None);
        let mut rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        registry
            .update("light.kitchen", |e| {
                e.area_id = Some("kitchen".to_string());
                e.name = Some("Ceiling".to_string());
            })
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.action, RegistryAction::Update);
        let mut changes = event.data.changes.unwrap();
        changes.sort();
        assert_eq!(changes, vec!["area_id", "name"]);
        assert_eq!(registry.get_by_area_id("kitchen").len(), 1);
    }

    #[tokio::test]
    async fn test_noop_update_fires_nothing() {
        let dir = TempDir::new().unwrap();
        let (registry, bus) = registry_with_bus(&dir);
        registry.get_or_create("hue", "light.kitchen", None, None, None);
        let mut rx = bus.subscribe(ENTITY_REGISTRY_UPDATED);

        registry.update("light.kitchen", |_| {}).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rename_updates_indexes() {
        let dir = TempDir::new().unwrap();
        let (registry, bus) = registry_with_bus(&dir);
        registry.get_or_create("hue", "light.kitchen", Some("hue-1"), None, Some("dev-1"));
        registry.get_or_create("hue", "light.hall", None, None, None);
        let mut rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        let err = registry
            .update("light.kitchen", |e| e.entity_id = "light.hall".to_string())
            .unwrap_err();
        assert!(matches!(err, EntityRegistryError::AlreadyRegistered(_)));

        registry
            .update("light.kitchen", |e| e.entity_id = "light.cooking".to_string())
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.entity_id, "light.cooking");
        assert_eq!(event.data.old_entity_id.as_deref(), Some("light.kitchen"));
        assert!(registry.get("light.kitchen").is_none());
        assert_eq!(
            registry.get_by_unique_id("hue-1").unwrap().entity_id,
            "light.cooking"
        );
        assert_eq!(registry.get_by_device_id("dev-1")[0].entity_id, "light.cooking");
    }

    #[tokio::test]
    async fn test_remove_fires_event() {
        let dir = TempDir::new().unwrap();
        let (registry, bus) = registry_with_bus(&dir);
        registry.get_or_create("hue", "light.kitchen", Some("hue-1"), None, None);
        let mut rx = bus.subscribe_typed::<EntityRegistryUpdatedData>();

        assert!(registry.remove("light.kitchen").is_some());
        assert!(registry.remove("light.kitchen").is_none());
        assert!(registry.get_by_unique_id("hue-1").is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.action, RegistryAction::Remove);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (registry, _bus) = registry_with_bus(&dir);
        registry.get_or_create("hue", "light.b", None, None, None);
        registry.get_or_create("hue", "light.a", None, None, None);
        registry
            .update("light.a", |e| e.entity_category = Some(EntityCategory::Diagnostic))
            .unwrap();
        registry.save().await.unwrap();

        let reloaded = EntityRegistry::new(Arc::new(Storage::new(dir.path())));
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.entity_ids(), vec!["light.b", "light.a"]);
        assert_eq!(
            reloaded.get("light.a").unwrap().entity_category,
            Some(EntityCategory::Diagnostic)
        );
    }
}
