//! Area Registry
//!
//! Tracks the areas (rooms, zones) of the home. Area names are what the
//! exposed entity list shows, so renames matter to listeners.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for area registry
pub const STORAGE_KEY: &str = "core.area_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 6;

/// A registered area entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaEntry {
    pub id: String,

    /// Area name (e.g., "Living Room")
    pub name: String,

    /// Normalized name for searching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_name: Option<String>,

    /// Area icon (e.g., "mdi:sofa")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Alternative names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl AreaEntry {
    /// Create a new area entry
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: slugify(&name),
            normalized_name: Some(normalize_name(&name)),
            name,
            icon: None,
            aliases: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// Normalize a name for searching
fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .trim()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ', "")
}

/// Area ids are slugs of the name at creation time ("Living Room" -> "living_room")
fn slugify(name: &str) -> String {
    let slug = name
        .trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        ulid::Ulid::new().to_string().to_lowercase()
    } else {
        slug
    }
}

/// Area registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaRegistryData {
    pub areas: Vec<AreaEntry>,
}

impl Storable for AreaRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Area Registry
pub struct AreaRegistry {
    storage: Arc<Storage>,

    /// Primary index: area_id -> AreaEntry
    by_id: DashMap<String, Arc<AreaEntry>>,

    /// Index: normalized_name -> area_id
    by_name: DashMap<String, String>,
}

impl AreaRegistry {
    /// Create a new area registry
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_name: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<AreaRegistryData>(STORAGE_KEY).await? {
            info!(
                "Loading {} areas from storage (v{}.{})",
                storage_file.data.areas.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.areas {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let mut areas: Vec<AreaEntry> = self.by_id.iter().map(|r| (**r.value()).clone()).collect();
        areas.sort_by_key(|a| a.created_at);
        let data = AreaRegistryData { areas };

        self.storage.save(&data.into_storage_file()).await?;
        debug!("Saved {} areas to storage", self.by_id.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<AreaEntry>) {
        let area_id = entry.id.clone();

        if let Some(ref normalized) = entry.normalized_name {
            self.by_name.insert(normalized.clone(), area_id.clone());
        }

        self.by_id.insert(area_id, entry);
    }

    /// Get area by ID
    pub fn get(&self, area_id: &str) -> Option<Arc<AreaEntry>> {
        self.by_id.get(area_id).map(|r| Arc::clone(r.value()))
    }

    /// Get area by name (case and punctuation insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<Arc<AreaEntry>> {
        let normalized = normalize_name(name);
        let area_id = self.by_name.get(&normalized)?.clone();
        self.get(&area_id)
    }

    /// Create a new area
    ///
    /// The id is derived from the name; a clash gets a numeric suffix.
    pub fn create(&self, name: &str) -> Arc<AreaEntry> {
        let mut entry = AreaEntry::new(name);
        let base_id = entry.id.clone();
        let mut suffix = 2;
        while self.by_id.contains_key(&entry.id) {
            entry.id = format!("{}_{}", base_id, suffix);
            suffix += 1;
        }

        let arc_entry = Arc::new(entry);
        info!("Created area: {} ({})", name, arc_entry.id);
        self.index_entry(Arc::clone(&arc_entry));
        arc_entry
    }

    /// Update an area
    pub fn update<F>(&self, area_id: &str, f: F) -> Option<Arc<AreaEntry>>
    where
        F: FnOnce(&mut AreaEntry),
    {
        let (_, arc_entry) = self.by_id.remove(area_id)?;
        let mut entry = (*arc_entry).clone();

        if let Some(ref normalized) = entry.normalized_name {
            self.by_name.remove(normalized);
        }

        f(&mut entry);
        entry.id = arc_entry.id.clone();
        entry.normalized_name = Some(normalize_name(&entry.name));
        entry.modified_at = Utc::now();

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));
        Some(new_arc)
    }

    /// Remove an area
    pub fn remove(&self, area_id: &str) -> Option<Arc<AreaEntry>> {
        let (_, arc_entry) = self.by_id.remove(area_id)?;
        if let Some(ref normalized) = arc_entry.normalized_name {
            self.by_name.remove(normalized);
        }
        info!("Removed area: {}", area_id);
        Some(arc_entry)
    }

    /// Get count of areas
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterate over all areas
    pub fn iter(&self) -> impl Iterator<Item = Arc<AreaEntry>> + '_ {
        self.by_id.iter().map(|r| Arc::clone(r.value()))
    }
}
