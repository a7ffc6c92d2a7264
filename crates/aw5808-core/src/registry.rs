//! Owned table of devices addressed by stable handles.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DevctlConfig;
use crate::device::Device;
use crate::transport::Connector;

/// Stable handle into a [`DeviceTable`]. Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot {
    name: String,
    device: Device,
}

#[derive(Default)]
pub struct DeviceTable {
    slots: Vec<Option<Slot>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and open every configured device. Devices that fail to open
    /// are logged and left out.
    pub fn open_from_config(config: &DevctlConfig, connector: Arc<dyn Connector>) -> Self {
        let mut table = Self::new();
        for dev in &config.devices {
            let mut device = Device::new(connector.clone());
            match device.open(dev.open_options(&config.io)) {
                Ok(()) => {
                    let id = table.insert(dev.name.clone(), device);
                    info!(id = %id, name = %dev.name, "Device opened");
                }
                Err(e) => warn!(name = %dev.name, error = %e, "Skipping device"),
            }
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, device: Device) -> DeviceId {
        let id = DeviceId(self.slots.len());
        self.slots.push(Some(Slot {
            name: name.into(),
            device,
        }));
        id
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::take)
            .map(|slot| slot.device)
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.slots.get(id.0)?.as_ref().map(|s| &s.device)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.slots.get_mut(id.0)?.as_mut().map(|s| &mut s.device)
    }

    pub fn name(&self, id: DeviceId) -> Option<&str> {
        self.slots.get(id.0)?.as_ref().map(|s| s.name.as_str())
    }

    /// Look a device up by its configured name.
    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.iter().find(|(_, n, _)| *n == name).map(|(id, _, _)| id)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.iter().map(|(id, _, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &str, &Device)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref()
                .map(|s| (DeviceId(i), s.name.as_str(), &s.device))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DeviceId, &mut Device)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|s| (DeviceId(i), &mut s.device)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnector;

    fn device() -> Device {
        Device::new(Arc::new(MockConnector::new()))
    }

    #[test]
    fn test_handles_stay_stable_across_removal() {
        let mut table = DeviceTable::new();
        let a = table.insert("a", device());
        let b = table.insert("b", device());
        assert_eq!(table.len(), 2);

        assert!(table.remove(a).is_some());
        assert!(table.remove(a).is_none());
        assert!(table.get(a).is_none());
        assert_eq!(table.name(b), Some("b"));

        let c = table.insert("c", device());
        assert_ne!(c, a);
        assert_eq!(table.ids(), vec![b, c]);
        assert_eq!(table.find("c"), Some(c));
        assert_eq!(table.find("a"), None);
    }

    #[test]
    fn test_open_from_config_skips_failures() {
        let config = DevctlConfig::from_toml_str(
            "[[device]]\nname = \"gone\"\nserial = \"/dev/ttyNOPE\"\n",
        )
        .unwrap();
        let table = DeviceTable::open_from_config(&config, Arc::new(MockConnector::new()));
        assert!(table.is_empty());
    }
}
