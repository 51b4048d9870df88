//! Host accessory registry
//!
//! The bridge host owns accessory persistence. The engine only talks to it
//! through [`HostRegistry`]; [`MemoryHost`] backs the standalone binary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::HostError;
use crate::models::{AccessoryRecord, RemoteDevice};

/// Accessory handle as the host stores it
#[derive(Debug, Clone, PartialEq)]
pub struct HostAccessory {
    pub uuid: String,
    pub accessory_id: Uuid,
    pub display_name: String,
    /// Device snapshot cached with the accessory, if any
    pub context: Option<RemoteDevice>,
}

impl From<&AccessoryRecord> for HostAccessory {
    fn from(record: &AccessoryRecord) -> Self {
        Self {
            uuid: record.uuid.clone(),
            accessory_id: record.accessory_id,
            display_name: record.display_name.clone(),
            context: Some(record.device.clone()),
        }
    }
}

#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Link a new accessory to the host
    async fn register(&self, accessory: &HostAccessory) -> Result<(), HostError>;

    /// Remove an accessory from the host
    async fn unregister(&self, uuid: &str) -> Result<(), HostError>;

    /// Accessories the host restored from its own cache
    async fn restore_cached(&self) -> Result<Vec<HostAccessory>, HostError>;
}

/// In-process host registry
#[derive(Default)]
pub struct MemoryHost {
    accessories: RwLock<BTreeMap<String, HostAccessory>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host pre-populated as if restored from disk
    pub fn with_cached(cached: Vec<HostAccessory>) -> Self {
        let accessories = cached.into_iter().map(|a| (a.uuid.clone(), a)).collect();
        Self {
            accessories: RwLock::new(accessories),
        }
    }

    pub async fn uuids(&self) -> Vec<String> {
        self.accessories.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, uuid: &str) -> Option<HostAccessory> {
        self.accessories.read().await.get(uuid).cloned()
    }
}

#[async_trait]
impl HostRegistry for MemoryHost {
    async fn register(&self, accessory: &HostAccessory) -> Result<(), HostError> {
        let mut map = self.accessories.write().await;
        if map.contains_key(&accessory.uuid) {
            return Err(HostError::AlreadyRegistered(accessory.uuid.clone()));
        }
        map.insert(accessory.uuid.clone(), accessory.clone());
        Ok(())
    }

    async fn unregister(&self, uuid: &str) -> Result<(), HostError> {
        self.accessories
            .write()
            .await
            .remove(uuid)
            .map(|_| ())
            .ok_or_else(|| HostError::NotRegistered(uuid.to_string()))
    }

    async fn restore_cached(&self) -> Result<Vec<HostAccessory>, HostError> {
        Ok(self.accessories.read().await.values().cloned().collect())
    }
}
