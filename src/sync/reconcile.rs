//! Reconciler: keeps the accessory registry equal to the remote directory
//!
//! A cycle fetches the directory once, plans every change against a snapshot
//! of the registry, talks to the host, and then commits membership changes in
//! one write section. A failed fetch aborts the cycle before anything is
//! touched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::accessory::AccessoryBridge;
use crate::config::SetAcknowledgement;
use crate::error::{HostError, SyncError};
use crate::host::{HostAccessory, HostRegistry};
use crate::models::{AccessoryRecord, RemoteDevice};
use crate::remote::RemoteClient;
use crate::sync::registry::{AccessoryRegistry, Changes, Slot};

/// Counts for one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub discovered: usize,
    pub added: usize,
    pub updated: usize,
    pub retired: usize,
    pub unsupported: usize,
    pub duplicates: usize,
    pub host_failures: usize,
}

pub struct Reconciler {
    client: Arc<RemoteClient>,
    host: Arc<dyn HostRegistry>,
    registry: Arc<AccessoryRegistry>,
    acknowledgement: SetAcknowledgement,
    /// Cycles never overlap
    cycle_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        client: Arc<RemoteClient>,
        host: Arc<dyn HostRegistry>,
        registry: Arc<AccessoryRegistry>,
        acknowledgement: SetAcknowledgement,
    ) -> Self {
        Self {
            client,
            host,
            registry,
            acknowledgement,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> Arc<AccessoryRegistry> {
        self.registry.clone()
    }

    fn bridge_for(&self, record: AccessoryRecord) -> Slot {
        match AccessoryBridge::new(record.clone(), self.client.clone(), self.acknowledgement) {
            Some(bridge) => Slot::Bridged(Arc::new(bridge)),
            None => Slot::Unbridged(record),
        }
    }

    /// Seed the registry with accessories the host restored from its cache.
    ///
    /// Restored accessories with a supported cached device get live handlers
    /// right away. Returns how many were added.
    pub async fn restore_cached(&self) -> Result<usize, HostError> {
        let cached = self.host.restore_cached().await?;
        let mut restored = 0;

        for accessory in cached {
            tracing::info!(
                "[Discovery] Loading accessory from cache: {}",
                accessory.display_name
            );

            let slot = match accessory.context.clone() {
                Some(device) if device.uuid == accessory.uuid => {
                    let mut record = AccessoryRecord::from_device(device);
                    record.accessory_id = accessory.accessory_id;
                    self.bridge_for(record)
                }
                _ => Slot::Restored(accessory.clone()),
            };

            if self.registry.insert_if_absent(accessory.uuid.clone(), slot).await {
                restored += 1;
            }
        }

        Ok(restored)
    }

    async fn fetch_directory(&self) -> Result<Vec<RemoteDevice>, SyncError> {
        let value = self.client.call(Method::GET, "", None).await?;
        serde_json::from_value(value).map_err(|e| {
            tracing::error!(
                "[Discovery] Invalid response from {}: {}",
                self.client.display_name(),
                e
            );
            SyncError::InvalidDirectory(e.to_string())
        })
    }

    /// Run one discovery cycle
    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let _cycle = self.cycle_lock.lock().await;

        let fetch_started = Instant::now();
        let directory = self.fetch_directory().await?;

        let current = self.registry.slots_snapshot().await;
        let mut report = CycleReport {
            discovered: directory.len(),
            ..CycleReport::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut changes = Changes::default();

        for device in directory {
            if !seen.insert(device.uuid.clone()) {
                tracing::warn!(
                    "[Discovery] Duplicate uuid {} ({}) ignored",
                    device.uuid,
                    device.name
                );
                report.duplicates += 1;
                continue;
            }

            // A device that fails to register stays untracked and is
            // offered to the host again next cycle
            let upsert = match current.get(&device.uuid) {
                Some(slot) => {
                    self.refresh_slot(slot, device, fetch_started, &mut report)
                        .await
                }
                None => self.add_device(device, &mut report).await,
            };
            changes.upserts.extend(upsert);
        }

        for (uuid, slot) in &current {
            if seen.contains(uuid) {
                continue;
            }
            tracing::info!(
                "[Discovery] Retiring accessory {} ({})",
                slot.display_name().await,
                uuid
            );
            match self.host.unregister(uuid).await {
                Ok(()) | Err(HostError::NotRegistered(_)) => {}
                Err(e) => {
                    tracing::warn!("[Discovery] Host unregister failed for {}: {}", uuid, e);
                    report.host_failures += 1;
                }
            }
            changes.removals.push(uuid.clone());
            report.retired += 1;
        }

        if !changes.is_empty() {
            self.registry.commit(changes).await;
        }

        tracing::info!(
            "[Discovery] Cycle complete: {} discovered, {} added, {} updated, {} retired, {} unsupported",
            report.discovered,
            report.added,
            report.updated,
            report.retired,
            report.unsupported
        );
        Ok(report)
    }

    /// Register a device the registry has never seen
    async fn add_device(
        &self,
        device: RemoteDevice,
        report: &mut CycleReport,
    ) -> Option<(String, Slot)> {
        if device.kind().is_none() {
            tracing::warn!(
                "[Discovery] Device Type Not Supported ({} | {})",
                device.name,
                device.device_type
            );
            report.unsupported += 1;
            return None;
        }

        let record = AccessoryRecord::from_device(device);
        tracing::info!("[Discovery] Adding new accessory: {}", record.display_name);

        match self.host.register(&HostAccessory::from(&record)).await {
            Ok(()) | Err(HostError::AlreadyRegistered(_)) => {}
            Err(e) => {
                tracing::warn!(
                    "[Discovery] Host register failed for {}: {}",
                    record.display_name,
                    e
                );
                report.host_failures += 1;
                return None;
            }
        }

        report.added += 1;
        Some((record.uuid.clone(), self.bridge_for(record)))
    }

    /// Bring an already-tracked slot up to date with a directory entry.
    ///
    /// A bridge for the same device type is refreshed in place so pushes
    /// landing mid-cycle are serialized with the refresh; any other change
    /// yields a replacement slot.
    async fn refresh_slot(
        &self,
        slot: &Slot,
        device: RemoteDevice,
        fetch_started: Instant,
        report: &mut CycleReport,
    ) -> Option<(String, Slot)> {
        let uuid = device.uuid.clone();

        if device.kind().is_none() {
            // Unsupported types are never retired automatically
            report.unsupported += 1;
            let mut record = match slot {
                Slot::Bridged(bridge) => bridge.record().await,
                Slot::Unbridged(record) => record.clone(),
                Slot::Restored(accessory) => restored_record(accessory, &device),
            };
            record.refresh(device);
            return Some((uuid, Slot::Unbridged(record)));
        }

        report.updated += 1;
        tracing::info!("[Discovery] Restoring existing accessory: {}", device.name);

        match slot {
            Slot::Bridged(bridge) if Some(bridge.profile().device_type) == device.kind() => {
                let kept = bridge.refresh(device, fetch_started).await;
                if !kept.is_empty() {
                    tracing::debug!(
                        "[Discovery] {} kept {} values pushed during the fetch",
                        uuid,
                        kept.len()
                    );
                }
                None
            }
            Slot::Bridged(bridge) => {
                let mut record = bridge.record().await;
                record.refresh(device);
                Some((uuid, self.bridge_for(record)))
            }
            Slot::Unbridged(record) => {
                let mut record = record.clone();
                record.refresh(device);
                Some((uuid, self.bridge_for(record)))
            }
            Slot::Restored(accessory) => {
                let record = restored_record(accessory, &device);
                Some((uuid, self.bridge_for(record)))
            }
        }
    }
}

/// Record for a restored accessory, keeping the id the host already knows
fn restored_record(accessory: &HostAccessory, device: &RemoteDevice) -> AccessoryRecord {
    let mut record = AccessoryRecord::from_device(device.clone());
    record.accessory_id = accessory.accessory_id;
    record
}
