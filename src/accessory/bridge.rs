//! AccessoryBridge: one synchronized device
//!
//! Translates host characteristic get/set events into remote directory calls
//! and pushed state into the cached device snapshot. Behaviour is the same
//! for every device type; only the profile table differs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::accessory::profile::{profile, DeviceProfile};
use crate::capability::Capability;
use crate::config::SetAcknowledgement;
use crate::error::RemoteError;
use crate::models::{AccessoryRecord, RemoteDevice};
use crate::remote::RemoteClient;

/// Keys in a push payload that describe the device, not its state
const METADATA_KEYS: [&str; 4] = ["uuid", "id", "name", "type"];

/// Handlers registered for one capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerSet {
    pub get: bool,
    pub set: bool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GetError {
    #[error("No get handler registered for {0}")]
    NotRegistered(Capability),

    #[error("{capability} unavailable: {source}")]
    Unavailable {
        capability: Capability,
        source: RemoteError,
    },

    #[error("{capability} returned out-of-schema value {value}")]
    SchemaViolation { capability: Capability, value: Value },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetError {
    #[error("No set handler registered for {0}")]
    NotRegistered(Capability),

    #[error("Remote rejected {capability}: {source}")]
    Rejected {
        capability: Capability,
        source: RemoteError,
    },
}

/// Why a pushed entry was not applied
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    UnknownCapability,
    Unsupported(Capability),
    Invalid(Capability),
}

#[derive(Debug, Default, PartialEq)]
pub struct PushOutcome {
    pub applied: Vec<Capability>,
    pub rejected: Vec<(String, Rejection)>,
}

struct BridgeState {
    record: AccessoryRecord,
    handlers: BTreeMap<Capability, HandlerSet>,
    pushed_at: HashMap<Capability, Instant>,
}

pub struct AccessoryBridge {
    profile: &'static DeviceProfile,
    uuid: String,
    state: RwLock<BridgeState>,
    client: Arc<RemoteClient>,
    acknowledgement: SetAcknowledgement,
}

/// Register handlers for the profile capabilities present on the device
fn build_handlers(
    profile: &DeviceProfile,
    record: &AccessoryRecord,
) -> BTreeMap<Capability, HandlerSet> {
    let mut handlers = BTreeMap::new();
    for cap in profile.capabilities {
        let rule = cap.rule();
        if cap.find_key(&record.device.characteristics).is_some() {
            handlers.insert(
                *cap,
                HandlerSet {
                    get: rule.supports_get,
                    set: rule.supports_set,
                },
            );
        } else if rule.required {
            tracing::warn!(
                "[Device] ({}) is missing required characteristic {}",
                record.display_name,
                cap
            );
        }
    }

    for key in record.device.characteristics.keys() {
        let exposed = Capability::parse(key)
            .map(|c| profile.capabilities.contains(&c))
            .unwrap_or(false);
        if !exposed {
            tracing::debug!(
                "[Device] ({}) ignoring characteristic {} not exposed by {}",
                record.display_name,
                key,
                profile.device_type.as_str()
            );
        }
    }

    handlers
}

impl AccessoryBridge {
    /// Build the bridge for a record, `None` when its device type has no profile
    pub fn new(
        record: AccessoryRecord,
        client: Arc<RemoteClient>,
        acknowledgement: SetAcknowledgement,
    ) -> Option<Self> {
        let Some(kind) = record.device.kind() else {
            tracing::warn!(
                "[Device] Device Type Not Supported ({} | {})",
                record.display_name,
                record.device.device_type
            );
            return None;
        };
        let profile = profile(kind);
        let handlers = build_handlers(profile, &record);

        tracing::debug!(
            "[Device] ({}) {} {} serial {} with {} characteristics",
            record.display_name,
            profile.manufacturer,
            profile.model,
            record.accessory_id,
            handlers.len()
        );

        Some(Self {
            profile,
            uuid: record.uuid.clone(),
            state: RwLock::new(BridgeState {
                record,
                handlers,
                pushed_at: HashMap::new(),
            }),
            client,
            acknowledgement,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    pub async fn handlers(&self) -> BTreeMap<Capability, HandlerSet> {
        self.state.read().await.handlers.clone()
    }

    pub async fn has_get_handler(&self, capability: Capability) -> bool {
        self.handler(capability).await.get
    }

    pub async fn has_set_handler(&self, capability: Capability) -> bool {
        self.handler(capability).await.set
    }

    async fn handler(&self, capability: Capability) -> HandlerSet {
        self.state
            .read()
            .await
            .handlers
            .get(&capability)
            .copied()
            .unwrap_or_default()
    }

    /// Copy of the cached record
    pub async fn record(&self) -> AccessoryRecord {
        self.state.read().await.record.clone()
    }

    pub async fn cached_value(&self, capability: Capability) -> Option<Value> {
        let state = self.state.read().await;
        let characteristics = &state.record.device.characteristics;
        capability
            .find_key(characteristics)
            .and_then(|k| characteristics.get(k))
            .cloned()
    }

    /// Device id and remote key for a capability, preferring the
    /// snapshot's spelling of the key
    async fn remote_target(&self, capability: Capability) -> (i64, String, String) {
        let state = self.state.read().await;
        let key = capability
            .find_key(&state.record.device.characteristics)
            .cloned()
            .unwrap_or_else(|| capability.wire_name().to_string());
        (state.record.device.id, key, state.record.display_name.clone())
    }

    /// Take a fresher directory snapshot of the same device.
    ///
    /// Values pushed after `fetch_started` are newer than the snapshot and
    /// are kept. Handlers are rebuilt since capability sets can change.
    /// Returns the capabilities whose pushed value was kept.
    pub async fn refresh(
        &self,
        mut device: RemoteDevice,
        fetch_started: Instant,
    ) -> Vec<Capability> {
        let mut state = self.state.write().await;
        let mut kept = Vec::new();

        for (cap, at) in &state.pushed_at {
            if *at <= fetch_started {
                continue;
            }
            let current = &state.record.device.characteristics;
            let Some(value) = cap.find_key(current).and_then(|k| current.get(k)) else {
                continue;
            };
            if let Some(key) = cap.find_key(&device.characteristics).cloned() {
                device.characteristics.insert(key, value.clone());
                kept.push(*cap);
            }
        }

        state.record.refresh(device);
        state.handlers = build_handlers(self.profile, &state.record);
        kept.sort();
        kept
    }

    /// Forward a host-side set to the remote directory.
    ///
    /// The value is not validated here; the remote side decides. With
    /// optimistic acknowledgement the call is dispatched and success is
    /// reported immediately.
    pub async fn handle_set(&self, capability: Capability, value: Value) -> Result<(), SetError> {
        if !self.has_set_handler(capability).await {
            return Err(SetError::NotRegistered(capability));
        }

        let (device_id, key, name) = self.remote_target(capability).await;
        let mut body = Map::new();
        body.insert("id".to_string(), Value::from(device_id));
        body.insert(key, value.clone());
        let body = Value::Object(body);
        let path = device_id.to_string();

        match self.acknowledgement {
            SetAcknowledgement::Optimistic => {
                let client = self.client.clone();
                tokio::spawn(async move {
                    match client.call(Method::PATCH, &path, Some(&body)).await {
                        Ok(_) => tracing::info!(
                            "[Host] [Device Event]: ({} | {}) set to ({})",
                            name,
                            capability,
                            capability.describe(&value)
                        ),
                        Err(e) => tracing::warn!(
                            "[Host] [Device Event]: ({} | {}) set to ({}) not confirmed: {}",
                            name,
                            capability,
                            capability.describe(&value),
                            e
                        ),
                    }
                });
                Ok(())
            }
            SetAcknowledgement::Confirmed => {
                self.client
                    .call(Method::PATCH, &path, Some(&body))
                    .await
                    .map_err(|source| SetError::Rejected { capability, source })?;
                tracing::info!(
                    "[Host] [Device Event]: ({} | {}) set to ({})",
                    name,
                    capability,
                    capability.describe(&value)
                );
                Ok(())
            }
        }
    }

    /// Read a capability from the remote directory
    pub async fn handle_get(&self, capability: Capability) -> Result<Value, GetError> {
        if !self.has_get_handler(capability).await {
            return Err(GetError::NotRegistered(capability));
        }

        let (device_id, key, name) = self.remote_target(capability).await;
        let path = format!("{}/characteristics/{}", device_id, key);

        let response = self
            .client
            .call(Method::GET, &path, None)
            .await
            .map_err(|source| GetError::Unavailable { capability, source })?;

        let value = match response {
            Value::Object(mut map) => map.remove(&key).unwrap_or(Value::Null),
            other => other,
        };

        if !capability.rule().accepts(&value) {
            tracing::warn!(
                "[Host] [Device Info]: ({} | {}) remote value {} violates schema",
                name,
                capability,
                value
            );
            return Err(GetError::SchemaViolation { capability, value });
        }

        tracing::info!(
            "[Host] [Device Info]: ({} | {}) is ({})",
            name,
            capability,
            capability.describe(&value)
        );
        Ok(value)
    }

    /// Apply pushed characteristic values to the cached snapshot.
    ///
    /// Entries are validated one by one; rejected entries leave their
    /// cached value untouched.
    pub async fn push_update(&self, fields: &Map<String, Value>) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        let source = self.client.display_name().to_string();
        let mut state = self.state.write().await;
        let name = state.record.display_name.clone();

        for (field, value) in fields {
            if METADATA_KEYS.contains(&field.as_str()) {
                continue;
            }

            let Some(capability) = Capability::parse(field) else {
                tracing::warn!(
                    "[{}] [Device Event]: ({}) unknown characteristic {}",
                    source,
                    name,
                    field
                );
                outcome.rejected.push((field.clone(), Rejection::UnknownCapability));
                continue;
            };

            if !state.handlers.contains_key(&capability) {
                tracing::warn!(
                    "[{}] [Device Event]: ({}) does not expose {}",
                    source,
                    name,
                    capability
                );
                outcome
                    .rejected
                    .push((field.clone(), Rejection::Unsupported(capability)));
                continue;
            }

            if !capability.rule().accepts(value) {
                tracing::warn!(
                    "[{}] [Device Event]: ({} | {}) rejected invalid value {}",
                    source,
                    name,
                    capability,
                    value
                );
                outcome
                    .rejected
                    .push((field.clone(), Rejection::Invalid(capability)));
                continue;
            }

            let characteristics = &mut state.record.device.characteristics;
            let key = capability
                .find_key(characteristics)
                .cloned()
                .unwrap_or_else(|| capability.wire_name().to_string());
            let previous = characteristics.insert(key, value.clone());

            tracing::info!(
                "[{}] [Device Event]: ({} | {}) is ({}), was ({})",
                source,
                name,
                capability,
                capability.describe(value),
                previous
                    .as_ref()
                    .map(|v| capability.describe(v))
                    .unwrap_or_else(|| "unset".to_string())
            );

            state.pushed_at.insert(capability, Instant::now());
            outcome.applied.push(capability);
        }

        outcome
    }
}
