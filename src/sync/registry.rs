//! AccessoryRegistry: the set of synchronized accessories, keyed by device uuid
//!
//! Readers (the push listener, the status page) take the read lock; only the
//! reconciler changes membership, and it does so in one write section per
//! cycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::accessory::AccessoryBridge;
use crate::host::HostAccessory;
use crate::models::AccessoryRecord;

/// What the registry holds for one uuid
#[derive(Clone)]
pub enum Slot {
    /// Supported device with live handlers
    Bridged(Arc<AccessoryBridge>),
    /// Device whose type has no profile; tracked, never bridged
    Unbridged(AccessoryRecord),
    /// Restored from the host cache without a device snapshot
    Restored(HostAccessory),
}

impl Slot {
    pub async fn display_name(&self) -> String {
        match self {
            Slot::Bridged(bridge) => bridge.record().await.display_name,
            Slot::Unbridged(record) => record.display_name.clone(),
            Slot::Restored(accessory) => accessory.display_name.clone(),
        }
    }
}

/// Row of the registry snapshot
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SlotSummary {
    pub id: Option<i64>,
    pub uuid: String,
    pub display_name: String,
    pub device_type: Option<String>,
    pub bridged: bool,
}

/// Membership changes computed by one cycle
#[derive(Default)]
pub(crate) struct Changes {
    pub upserts: Vec<(String, Slot)>,
    pub removals: Vec<String>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

#[derive(Default)]
pub struct AccessoryRegistry {
    slots: RwLock<HashMap<String, Slot>>,
}

impl AccessoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live bridge for a uuid, `None` when unknown or not bridged
    pub async fn bridge(&self, uuid: &str) -> Option<Arc<AccessoryBridge>> {
        match self.slots.read().await.get(uuid) {
            Some(Slot::Bridged(bridge)) => Some(bridge.clone()),
            _ => None,
        }
    }

    pub async fn contains(&self, uuid: &str) -> bool {
        self.slots.read().await.contains_key(uuid)
    }

    pub async fn uuids(&self) -> BTreeSet<String> {
        self.slots.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    pub async fn bridge_count(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Bridged(_)))
            .count()
    }

    /// Summary rows sorted by uuid
    pub async fn summaries(&self) -> Vec<SlotSummary> {
        let slots = self.slots_snapshot().await;
        let mut rows = Vec::with_capacity(slots.len());
        for (uuid, slot) in slots {
            let (id, device_type, bridged) = match &slot {
                Slot::Bridged(bridge) => {
                    let record = bridge.record().await;
                    (Some(record.device.id), Some(record.device.device_type), true)
                }
                Slot::Unbridged(record) => (
                    Some(record.device.id),
                    Some(record.device.device_type.clone()),
                    false,
                ),
                Slot::Restored(_) => (None, None, false),
            };
            rows.push(SlotSummary {
                id,
                display_name: slot.display_name().await,
                uuid,
                device_type,
                bridged,
            });
        }
        rows.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        rows
    }

    /// Point-in-time copy of the slots; bridges are shared, not cloned
    pub(crate) async fn slots_snapshot(&self) -> HashMap<String, Slot> {
        self.slots.read().await.clone()
    }

    /// Insert a slot only if the uuid is not yet tracked
    pub(crate) async fn insert_if_absent(&self, uuid: String, slot: Slot) -> bool {
        let mut slots = self.slots.write().await;
        if slots.contains_key(&uuid) {
            return false;
        }
        slots.insert(uuid, slot);
        true
    }

    /// Apply a cycle's changes in a single critical section
    pub(crate) async fn commit(&self, changes: Changes) {
        let mut slots = self.slots.write().await;
        for uuid in changes.removals {
            slots.remove(&uuid);
        }
        for (uuid, slot) in changes.upserts {
            slots.insert(uuid, slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{accessory_id, RemoteDevice};
    use serde_json::json;

    fn record(uuid: &str, device_type: &str) -> AccessoryRecord {
        let device: RemoteDevice = serde_json::from_value(json!({
            "id": 1,
            "uuid": uuid,
            "name": format!("Device {}", uuid),
            "type": device_type
        }))
        .unwrap();
        AccessoryRecord::from_device(device)
    }

    #[tokio::test]
    async fn test_commit_applies_removals_and_upserts() {
        let registry = AccessoryRegistry::new();
        registry
            .insert_if_absent("a".into(), Slot::Unbridged(record("a", "Fan")))
            .await;
        registry
            .insert_if_absent("b".into(), Slot::Unbridged(record("b", "Fan")))
            .await;

        registry
            .commit(Changes {
                upserts: vec![("c".into(), Slot::Unbridged(record("c", "Fan")))],
                removals: vec!["a".into()],
            })
            .await;

        let uuids: Vec<_> = registry.uuids().await.into_iter().collect();
        assert_eq!(uuids, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(registry.bridge_count().await, 0);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let registry = AccessoryRegistry::new();
        assert!(
            registry
                .insert_if_absent("a".into(), Slot::Unbridged(record("a", "Fan")))
                .await
        );
        assert!(
            !registry
                .insert_if_absent("a".into(), Slot::Unbridged(record("a", "Heater")))
                .await
        );

        let rows = registry.summaries().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_type.as_deref(), Some("Fan"));
    }

    #[tokio::test]
    async fn test_restored_slot_summary() {
        let registry = AccessoryRegistry::new();
        let accessory = HostAccessory {
            uuid: "r".into(),
            accessory_id: accessory_id("r"),
            display_name: "Attic".into(),
            context: None,
        };
        registry
            .insert_if_absent("r".into(), Slot::Restored(accessory))
            .await;

        assert!(registry.bridge("r").await.is_none());
        assert_eq!(
            registry.summaries().await,
            vec![SlotSummary {
                id: None,
                uuid: "r".into(),
                display_name: "Attic".into(),
                device_type: None,
                bridged: false,
            }]
        );
    }
}
