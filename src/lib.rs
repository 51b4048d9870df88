//! Direct Connect Bridge
//!
//! Mirrors devices from a remote device directory into a local accessory
//! host: periodic discovery, per-device characteristic bridging, and a push
//! listener for state changes reported by the remote side.

pub mod accessory;
pub mod api;
pub mod capability;
pub mod config;
pub mod error;
pub mod host;
pub mod models;
pub mod remote;
pub mod sync;
