//! The set of devices advertised to the kubelet.
//!
//! Devices are generated once when the plugin is constructed and never change
//! afterwards, so the registry is shared read-only between RPC handlers.

use derive_more::Display;

use crate::api;

/// Device health as understood by the kubelet.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub health: Health,
}

impl Device {
    fn healthy(id: String) -> Self {
        Self {
            id,
            health: Health::Healthy,
        }
    }
}

impl From<&Device> for api::Device {
    fn from(device: &Device) -> Self {
        api::Device {
            id: device.id.clone(),
            health: device.health.to_string(),
            topology: None,
        }
    }
}

/// Static device registry.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// create `count` healthy devices named `dev000`, `dev001`, ...
    pub fn new(count: usize) -> Self {
        let devices = (0..count)
            .map(|i| Device::healthy(format!("dev{i:03}")))
            .collect();
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Full device list in the shape sent on the ListAndWatch stream.
    pub fn snapshot(&self) -> api::ListAndWatchResponse {
        api::ListAndWatchResponse {
            devices: self.devices.iter().map(api::Device::from).collect(),
        }
    }
}
