// SPDX-License-Identifier: GPL-3.0-only

//! Device enumeration results and slot mapping
//!
//! Every physical device owns three consecutive slots:
//! `slot = device_slot * 3 + sub_stream_index`.

use crate::backends::camera::{DeviceInfo, StreamKind, StreamProfile};
use crate::constants::SUB_STREAMS_PER_DEVICE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Identity of one logical stream: which device, which imager
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub serial: String,
    pub kind: StreamKind,
}

impl StreamIdentity {
    pub fn new(serial: impl Into<String>, kind: StreamKind) -> Self {
        Self {
            serial: serial.into(),
            kind,
        }
    }

    /// Unique textual form, `"<serial>:<RGB|IR_L|IR_R>"`
    pub fn device_path(&self) -> String {
        format!("{}:{}", self.serial, self.kind.suffix())
    }

    /// Parse the output of [`StreamIdentity::device_path`]
    pub fn parse_device_path(path: &str) -> Option<Self> {
        let (serial, suffix) = path.rsplit_once(':')?;
        if serial.is_empty() {
            return None;
        }
        Some(Self::new(serial, StreamKind::from_suffix(suffix)?))
    }
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.serial, self.kind.suffix())
    }
}

/// A logical stream as offered to device pickers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub identity: StreamIdentity,
    /// Display name of the physical device
    pub name: String,
    pub profile: StreamProfile,
}

impl StreamDescriptor {
    pub fn serial(&self) -> &str {
        &self.identity.serial
    }

    pub fn kind(&self) -> StreamKind {
        self.identity.kind
    }

    pub fn device_path(&self) -> String {
        self.identity.device_path()
    }
}

/// Slot of `kind` on the device at `device_slot`
pub fn logical_slot(device_slot: usize, kind: StreamKind) -> usize {
    device_slot * SUB_STREAMS_PER_DEVICE + kind.sub_stream_index()
}

/// Enumeration-time mapping between devices, serials and slots
///
/// Built once and never modified, so a device that is unplugged and
/// re-attached keeps its slot for the lifetime of the service.
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    devices: Vec<DeviceInfo>,
    descriptors: Vec<StreamDescriptor>,
    device_slots: HashMap<String, usize>,
}

impl DeviceTable {
    /// Assign dense slots in enumeration order; duplicate serials are skipped
    pub fn from_devices(devices: Vec<DeviceInfo>) -> Self {
        let mut table = Self::default();

        for device in devices {
            if table.device_slots.contains_key(&device.serial) {
                warn!(serial = %device.serial, "Duplicate device serial, skipping");
                continue;
            }

            let device_slot = table.devices.len();
            table.device_slots.insert(device.serial.clone(), device_slot);

            for kind in StreamKind::ALL {
                table.descriptors.push(StreamDescriptor {
                    identity: StreamIdentity::new(device.serial.clone(), kind),
                    name: device.name.clone(),
                    profile: StreamProfile::fixed(kind),
                });
            }

            debug!(
                serial = %device.serial,
                name = %device.name,
                device_slot,
                "Registered device"
            );
            table.devices.push(device);
        }

        table
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn slot_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn descriptors(&self) -> &[StreamDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, slot: usize) -> Option<&StreamDescriptor> {
        self.descriptors.get(slot)
    }

    /// Dense index of the device with `serial`
    pub fn device_slot(&self, serial: &str) -> Option<usize> {
        self.device_slots.get(serial).copied()
    }

    /// Slot of an identity, by linear match over the descriptors
    pub fn slot_of(&self, identity: &StreamIdentity) -> Option<usize> {
        self.descriptors
            .iter()
            .position(|descriptor| descriptor.identity == *identity)
    }

    /// Route a frame reported as `{serial, stream_index}` to its slot
    pub fn resolve(&self, serial: &str, stream_index: usize) -> Option<usize> {
        let kind = StreamKind::from_sub_stream_index(stream_index)?;
        Some(logical_slot(self.device_slot(serial)?, kind))
    }
}
