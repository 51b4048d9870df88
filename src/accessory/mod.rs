//! Accessory bridging
//!
//! - `bridge`: per-device get/set/push adapter
//! - `profile`: capability sets and accessory information per device type

pub mod bridge;
pub mod profile;

pub use bridge::{AccessoryBridge, GetError, HandlerSet, PushOutcome, Rejection, SetError};
pub use profile::DeviceProfile;
