//! Discovery and reconciliation
//!
//! - `registry`: synchronized accessories keyed by device uuid
//! - `reconcile`: one discovery cycle against the remote directory
//! - `syncer`: periodic re-discovery

pub mod reconcile;
pub mod registry;
pub mod syncer;

pub use reconcile::{CycleReport, Reconciler};
pub use registry::{AccessoryRegistry, Slot, SlotSummary};
pub use syncer::DiscoverySyncer;
