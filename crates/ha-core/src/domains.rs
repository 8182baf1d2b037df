//! Domain metadata and constants

/// Entity domains a voice assistant can act on.
///
/// Read-only domains (sensor, binary_sensor, weather, ...) are deliberately absent.
pub static CONTROLLABLE_DOMAINS: &[&str] = &[
    "alarm_control_panel",
    "button",
    "camera",
    "climate",
    "cover",
    "fan",
    "humidifier",
    "lawn_mower",
    "light",
    "lock",
    "media_player",
    "scene",
    "siren",
    "switch",
    "vacuum",
    "valve",
    "water_heater",
];

/// Check if a domain can be controlled
pub fn is_controllable_domain(domain: &str) -> bool {
    CONTROLLABLE_DOMAINS.contains(&domain)
}
