//! Per-device-type accessory profiles
//!
//! Device types differ only in data: which capabilities they expose and the
//! accessory information shown by the host.

use crate::capability::Capability;
use crate::models::DeviceType;

#[derive(Debug, PartialEq)]
pub struct DeviceProfile {
    pub device_type: DeviceType,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub capabilities: &'static [Capability],
}

static LIGHT: DeviceProfile = DeviceProfile {
    device_type: DeviceType::Light,
    manufacturer: "Home",
    model: "Light",
    capabilities: &[
        Capability::On,
        Capability::Brightness,
        Capability::ColorTemperature,
        Capability::Hue,
        Capability::Saturation,
    ],
};

static DOOR_OPENER: DeviceProfile = DeviceProfile {
    device_type: DeviceType::DoorOpener,
    manufacturer: "Home",
    model: "Garage Door",
    capabilities: &[
        Capability::CurrentDoorState,
        Capability::TargetDoorState,
        Capability::ObstructionDetected,
    ],
};

pub fn profile(device_type: DeviceType) -> &'static DeviceProfile {
    match device_type {
        DeviceType::Light => &LIGHT,
        DeviceType::DoorOpener => &DOOR_OPENER,
    }
}
