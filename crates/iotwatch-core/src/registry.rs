use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Device, Sample};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device list is empty")]
    Empty,
    #[error("device at position {0} has no device_id")]
    MissingId(usize),
    #[error("duplicate device_id {0}")]
    Duplicate(String),
}

/// Known devices in the order of the last successful load.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    index: HashMap<String, usize>,
    ignored_samples: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole set. Rejected input leaves the current set untouched.
    pub fn load_all(&mut self, devices: Vec<Device>) -> Result<usize, RegistryError> {
        let index = match Self::build_index(&devices) {
            Ok(index) => index,
            Err(err) => {
                warn!(error = %err, "rejecting device list");
                return Err(err);
            }
        };

        self.devices = devices;
        self.index = index;
        Ok(self.devices.len())
    }

    fn build_index(devices: &[Device]) -> Result<HashMap<String, usize>, RegistryError> {
        if devices.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut index = HashMap::with_capacity(devices.len());
        for (pos, device) in devices.iter().enumerate() {
            if device.device_id.trim().is_empty() {
                return Err(RegistryError::MissingId(pos));
            }
            if index.insert(device.device_id.clone(), pos).is_some() {
                return Err(RegistryError::Duplicate(device.device_id.clone()));
            }
        }
        Ok(index)
    }

    /// Records `sample` on its device. `received_at` is the time the client
    /// observed it, not the time it was measured.
    pub fn apply_sample(&mut self, sample: &Sample, received_at: DateTime<Utc>) -> Option<&Device> {
        let Some(&pos) = self.index.get(&sample.device_id) else {
            self.ignored_samples += 1;
            debug!(device_id = %sample.device_id, "ignoring sample for unknown device");
            return None;
        };

        let device = &mut self.devices[pos];
        device.metrics.merge(&sample.metrics);
        device.last_updated = Some(received_at);
        Some(&*device)
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.index.get(device_id).map(|&pos| &self.devices[pos])
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.index.contains_key(device_id)
    }

    pub fn position(&self, device_id: &str) -> Option<usize> {
        self.index.get(device_id).copied()
    }

    pub fn list(&self) -> &[Device] {
        &self.devices
    }

    pub fn first_id(&self) -> Option<&str> {
        self.devices.first().map(|d| d.device_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ignored_samples(&self) -> u64 {
        self.ignored_samples
    }
}
