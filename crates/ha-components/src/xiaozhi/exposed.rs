//! Entities reported to the backend

use ha_core::domains::is_controllable_domain;
use ha_registries::{EntityCategory, EntityEntry, Registries};

/// Describe every entity the voice assistant may control
///
/// One `"<area>,<name>,<entity_id>"` string per entity, ordered by
/// entity id. Disabled, hidden and diagnostic entities are left out, as are
/// domains that cannot be controlled.
pub fn exposed_entities(registries: &Registries) -> Vec<String> {
    let mut entities = registries.entities.iter();
    entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    entities
        .iter()
        .filter(|entry| is_exposed(entry))
        .map(|entry| {
            format!(
                "{},{},{}",
                area_name(registries, entry),
                display_name(entry),
                entry.entity_id
            )
        })
        .collect()
}

fn is_exposed(entry: &EntityEntry) -> bool {
    !entry.is_disabled()
        && !entry.is_hidden()
        && entry.entity_category != Some(EntityCategory::Diagnostic)
        && is_controllable_domain(entry.domain())
}

fn display_name(entry: &EntityEntry) -> &str {
    entry
        .name
        .as_deref()
        .or(entry.original_name.as_deref())
        .unwrap_or_else(|| entry.object_id())
}

/// The entity's area, else its device's area; "" when neither resolves
fn area_name(registries: &Registries, entry: &EntityEntry) -> String {
    let area_id = entry.area_id.clone().or_else(|| {
        entry
            .device_id
            .as_deref()
            .and_then(|id| registries.devices.get(id))
            .and_then(|device| device.area_id.clone())
    });

    area_id
        .and_then(|id| registries.areas.get(&id))
        .map(|area| area.name.clone())
        .unwrap_or_default()
}
