//! MAC address of the main network interface

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Interfaces tried first, in order
const PREFERRED_INTERFACES: [&str; 3] = ["wlan0", "eth0", "en0"];

pub const UNKNOWN_MAC: &str = "unknown";

/// MAC of the main interface, lowercase, or `"unknown"`
pub fn main_mac() -> String {
    main_mac_in(Path::new(SYS_CLASS_NET))
}

/// Like [`main_mac`], reading interfaces from `net_dir`
pub fn main_mac_in(net_dir: &Path) -> String {
    let macs = interface_macs(net_dir);
    match pick_main_mac(&macs) {
        Some(mac) => mac,
        None => {
            warn!("No network interface with a MAC address found in {:?}", net_dir);
            UNKNOWN_MAC.to_string()
        }
    }
}

/// Hardware addresses by interface name, loopback and all-zero excluded
fn interface_macs(net_dir: &Path) -> BTreeMap<String, String> {
    let mut macs = BTreeMap::new();
    let Ok(entries) = fs::read_dir(net_dir) else {
        return macs;
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "lo" {
            continue;
        }
        let Ok(address) = fs::read_to_string(entry.path().join("address")) else {
            continue;
        };
        let address = address.trim().to_lowercase();
        if address.is_empty() || address.chars().all(|c| c == '0' || c == ':') {
            continue;
        }
        debug!("Interface {} has MAC {}", name, address);
        macs.insert(name, address);
    }
    macs
}

fn pick_main_mac(macs: &BTreeMap<String, String>) -> Option<String> {
    PREFERRED_INTERFACES
        .iter()
        .find_map(|name| macs.get(*name))
        .or_else(|| macs.values().next())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn add_interface(dir: &Path, name: &str, address: &str) {
        let iface = dir.join(name);
        fs::create_dir_all(&iface).unwrap();
        fs::write(iface.join("address"), format!("{}\n", address)).unwrap();
    }

    #[test]
    fn test_prefers_wlan0() {
        let dir = TempDir::new().unwrap();
        add_interface(dir.path(), "eth0", "11:11:11:11:11:11");
        add_interface(dir.path(), "wlan0", "AA:BB:CC:DD:EE:FF");
        assert_eq!(main_mac_in(dir.path()), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_falls_back_to_first_by_name() {
        let dir = TempDir::new().unwrap();
        add_interface(dir.path(), "lo", "00:00:00:00:00:01");
        add_interface(dir.path(), "wlp2s0", "22:22:22:22:22:22");
        add_interface(dir.path(), "enp1s0", "33:33:33:33:33:33");
        add_interface(dir.path(), "docker0", "00:00:00:00:00:00");
        assert_eq!(main_mac_in(dir.path()), "33:33:33:33:33:33");
    }

    #[test]
    fn test_unknown_without_interfaces() {
        let dir = TempDir::new().unwrap();
        add_interface(dir.path(), "lo", "00:00:00:00:00:00");
        assert_eq!(main_mac_in(dir.path()), UNKNOWN_MAC);
        assert_eq!(main_mac_in(&dir.path().join("missing")), UNKNOWN_MAC);
    }
}
