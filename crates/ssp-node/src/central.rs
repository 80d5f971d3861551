//! Directory kept by the central: who is on the network, under which id.
//!
//! Registration is idempotent per serial number. A component that comes
//! back keeps its id, a new one gets the id it suggests if that is free,
//! otherwise the lowest free id. Names are made unique with a numeric
//! suffix (`imu`, `imu_1`, `imu_2`, ...).

use regex_lite::Regex;
use ssp_types::constants::{is_valid_component_id, BIGGEST_REGULAR_COMPONENT_ID, CENTRAL_ID};
use ssp_types::ComponentId;
use ssp_wire::ComponentInfo;
use std::sync::OnceLock;
use tracing::info;

const MAX_NAME_SUFFIX: u32 = 200;

/// One registered component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: ComponentId,
    pub name: String,
    pub serial: u32,
}

/// The central's directory.
#[derive(Debug, Clone)]
pub struct Central {
    entries: Vec<DirectoryEntry>,
}

impl Central {
    /// A directory holding only the central itself.
    pub fn new(name: &str, serial: u32) -> Self {
        Self {
            entries: vec![DirectoryEntry {
                id: CENTRAL_ID,
                name: name.to_string(),
                serial,
            }],
        }
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn by_id(&self, id: ComponentId) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn by_serial(&self, serial: u32) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.serial == serial)
    }

    /// Resolves a name, a serial number or an id written as text. Returns 0
    /// when nothing matches.
    pub fn lookup(&self, key: &str) -> ComponentId {
        self.entries
            .iter()
            .find(|e| e.name == key || e.serial.to_string() == key || e.id.to_string() == key)
            .map(|e| e.id)
            .unwrap_or(0)
    }

    /// Assigns an id to an announcing component. `None` when the id space is
    /// exhausted.
    pub fn register(&mut self, cinfo: &ComponentInfo) -> Option<ComponentId> {
        let mut suggested = Some(cinfo.id).filter(|id| is_valid_component_id(*id));
        if let Some(id) = suggested {
            match self.by_id(id) {
                Some(entry) if entry.serial == cinfo.serial => return Some(id),
                Some(_) => suggested = None,
                None => {}
            }
        }
        if cinfo.serial != 0 {
            if let Some(entry) = self.by_serial(cinfo.serial) {
                return Some(entry.id);
            }
        }
        let id = match suggested {
            Some(id) => id,
            None => self.free_id()?,
        };
        let name = self.unique_name(&cinfo.name);
        info!(id, name = %name, serial = cinfo.serial, "SSP central: registered component");
        self.entries.push(DirectoryEntry {
            id,
            name,
            serial: cinfo.serial,
        });
        Some(id)
    }

    fn free_id(&self) -> Option<ComponentId> {
        (1..BIGGEST_REGULAR_COMPONENT_ID).find(|id| self.by_id(*id).is_none())
    }

    fn unique_name(&self, name: &str) -> String {
        let taken = |n: &str| self.entries.iter().any(|e| e.name == n);
        if !taken(name) {
            return name.to_string();
        }
        let base = name_base(name);
        (1..MAX_NAME_SUFFIX)
            .map(|i| format!("{base}{i}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// `imu_3` → `imu_`, `imu` → `imu_`, `my_sensor` → `my_sensor_`.
fn name_base(name: &str) -> String {
    static SUFFIXED: OnceLock<Option<Regex>> = OnceLock::new();
    let re = SUFFIXED.get_or_init(|| Regex::new(r"^(.*_)[0-9]+$").ok());
    re.as_ref()
        .and_then(|re| re.captures(name))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| {
            if name.ends_with('_') {
                name.to_string()
            } else {
                format!("{name}_")
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cinfo(serial: u32, id: ComponentId, name: &str) -> ComponentInfo {
        ComponentInfo::new(serial, id, 0, name)
    }

    #[test]
    fn test_central_owns_id_one() {
        let central = Central::new("hub", 10);
        assert_eq!(central.lookup("hub"), CENTRAL_ID);
        assert_eq!(central.lookup("10"), CENTRAL_ID);
        assert_eq!(central.lookup("1"), CENTRAL_ID);
        assert_eq!(central.lookup("nobody"), 0);
    }

    #[test]
    fn test_register_is_idempotent_per_serial() {
        let mut central = Central::new("hub", 10);
        let id = central.register(&cinfo(500, 0, "imu")).unwrap();
        assert_eq!(id, 2);
        assert_eq!(central.register(&cinfo(500, 0, "imu")), Some(2));
        assert_eq!(central.register(&cinfo(500, 9, "imu")), Some(2));
        assert_eq!(central.entries().len(), 2);
    }

    #[test]
    fn test_suggested_id_honoured_when_free() {
        let mut central = Central::new("hub", 10);
        assert_eq!(central.register(&cinfo(500, 17, "imu")), Some(17));
        // Taken by another serial: falls back to the lowest free id
        assert_eq!(central.register(&cinfo(600, 17, "gps")), Some(2));
        // The central's own id is never handed out
        assert_eq!(central.register(&cinfo(700, 1, "baro")), Some(3));
        // Out of range suggestions are ignored
        assert_eq!(central.register(&cinfo(800, 200, "mag")), Some(4));
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let mut central = Central::new("hub", 10);
        central.register(&cinfo(2, 0, "imu"));
        central.register(&cinfo(3, 0, "imu"));
        central.register(&cinfo(4, 0, "imu"));
        central.register(&cinfo(5, 0, "imu_1"));
        let names: Vec<&str> = central.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["hub", "imu", "imu_1", "imu_2", "imu_3"]);
        assert_eq!(central.lookup("imu_2"), 4);
    }

    #[test]
    fn test_underscored_names_keep_their_stem() {
        let mut central = Central::new("hub", 10);
        central.register(&cinfo(100, 0, "my_sensor"));
        central.register(&cinfo(101, 0, "my_sensor"));
        central.register(&cinfo(102, 0, "imu_3"));
        central.register(&cinfo(103, 0, "imu_3"));
        central.register(&cinfo(104, 0, "gps_"));
        central.register(&cinfo(105, 0, "gps_"));
        let names: Vec<&str> = central.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            ["hub", "my_sensor", "my_sensor_1", "imu_3", "imu_1", "gps_", "gps_1"]
        );
        assert_eq!(name_base("v2_12"), "v2_");
        assert_eq!(name_base("plain"), "plain_");
    }

    #[test]
    fn test_id_space_exhaustion() {
        let mut central = Central::new("hub", 10);
        for serial in 100..(100 + u32::from(BIGGEST_REGULAR_COMPONENT_ID) - 2) {
            assert!(central.register(&cinfo(serial, 0, "x")).is_some());
        }
        assert_eq!(central.register(&cinfo(9999, 0, "late")), None);
    }
}
