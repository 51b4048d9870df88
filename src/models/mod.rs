//! Data models for the direct connect bridge

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// Remote Directory Models
// ============================================================================

/// A device as reported by the remote device directory.
///
/// The directory is authoritative for identity (`uuid`) and for the set of
/// characteristics a device exposes. Fields we do not model are kept in
/// `extra` so the snapshot can be echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub characteristics: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteDevice {
    /// Known device type, `None` for types this bridge does not support
    pub fn kind(&self) -> Option<DeviceType> {
        DeviceType::parse(&self.device_type)
    }
}

/// Device types with an accessory profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    DoorOpener,
    Light,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::DoorOpener => "Garage Door Opener",
            DeviceType::Light => "Lightbulb",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Garage Door Opener" => Some(DeviceType::DoorOpener),
            "Lightbulb" => Some(DeviceType::Light),
            _ => None,
        }
    }
}

// ============================================================================
// Accessory Models
// ============================================================================

/// Namespace for accessory UUIDs derived from device uuids
const ACCESSORY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_3c2a_9b7e_4d85_a0c4_52e1_8f3b_7a96);

/// Stable accessory UUID for a device uuid (same seed, same accessory)
pub fn accessory_id(device_uuid: &str) -> Uuid {
    Uuid::new_v5(&ACCESSORY_NAMESPACE, device_uuid.as_bytes())
}

/// Local cached projection of a remote device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessoryRecord {
    pub uuid: String,
    pub accessory_id: Uuid,
    pub display_name: String,
    pub device: RemoteDevice,
}

impl AccessoryRecord {
    pub fn from_device(device: RemoteDevice) -> Self {
        Self {
            uuid: device.uuid.clone(),
            accessory_id: accessory_id(&device.uuid),
            display_name: device.name.clone(),
            device,
        }
    }

    /// Replace the snapshot with a fresher copy of the same device
    pub fn refresh(&mut self, device: RemoteDevice) {
        self.display_name = device.name.clone();
        self.device = device;
    }
}

// ============================================================================
// Push Models
// ============================================================================

/// Body of `PATCH /api/`: the device uuid plus capability values
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    pub uuid: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
