//! Hub handle and built-in components
//!
//! [`HomeAssistant`] bundles the bus, registries and auth manager that
//! components are set up against.

mod hass;
pub mod xiaozhi;

pub use hass::{HomeAssistant, SharedHomeAssistant};
