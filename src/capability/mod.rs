//! Capability table and characteristic validation
//!
//! Every capability the bridge understands is a variant of [`Capability`].
//! Rules live in a fixed table keyed by the variant, so both directions of
//! sync validate values the same way without string-indexed lookups.

use serde_json::{Map, Value};

/// A controllable or observable device attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    On,
    Brightness,
    ColorTemperature,
    Hue,
    Saturation,
    CurrentDoorState,
    TargetDoorState,
    ObstructionDetected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Boolean,
    /// Numeric, inclusive on both ends
    Range { low: f64, high: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityRule {
    pub kind: ValueKind,
    pub required: bool,
    pub supports_get: bool,
    pub supports_set: bool,
}

impl CapabilityRule {
    const fn boolean(required: bool, supports_set: bool) -> Self {
        Self {
            kind: ValueKind::Boolean,
            required,
            supports_get: true,
            supports_set,
        }
    }

    const fn range(low: f64, high: f64, required: bool, supports_set: bool) -> Self {
        Self {
            kind: ValueKind::Range { low, high },
            required,
            supports_get: true,
            supports_set,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self.kind {
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Range { low, high } => value
                .as_f64()
                .map(|v| low <= v && v <= high)
                .unwrap_or(false),
        }
    }
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::On,
        Capability::Brightness,
        Capability::ColorTemperature,
        Capability::Hue,
        Capability::Saturation,
        Capability::CurrentDoorState,
        Capability::TargetDoorState,
        Capability::ObstructionDetected,
    ];

    /// Name used by the remote directory
    pub fn wire_name(&self) -> &'static str {
        match self {
            Capability::On => "on",
            Capability::Brightness => "brightness",
            Capability::ColorTemperature => "colour",
            Capability::Hue => "hue",
            Capability::Saturation => "saturation",
            Capability::CurrentDoorState => "stateActual",
            Capability::TargetDoorState => "stateTarget",
            Capability::ObstructionDetected => "obstruction",
        }
    }

    /// Characteristic name on the accessory side
    pub fn characteristic_name(&self) -> &'static str {
        match self {
            Capability::On => "On",
            Capability::Brightness => "Brightness",
            Capability::ColorTemperature => "ColorTemperature",
            Capability::Hue => "Hue",
            Capability::Saturation => "Saturation",
            Capability::CurrentDoorState => "CurrentDoorState",
            Capability::TargetDoorState => "TargetDoorState",
            Capability::ObstructionDetected => "ObstructionDetected",
        }
    }

    /// Case-insensitive lookup by wire or characteristic name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| {
            name.eq_ignore_ascii_case(c.wire_name())
                || name.eq_ignore_ascii_case(c.characteristic_name())
        })
    }

    pub const fn rule(self) -> CapabilityRule {
        match self {
            Capability::On => CapabilityRule::boolean(true, true),
            Capability::Brightness => CapabilityRule::range(0.0, 100.0, false, true),
            Capability::ColorTemperature => CapabilityRule::range(140.0, 500.0, false, true),
            Capability::Hue => CapabilityRule::range(0.0, 360.0, false, true),
            Capability::Saturation => CapabilityRule::range(0.0, 100.0, false, true),
            Capability::CurrentDoorState => CapabilityRule::range(0.0, 4.0, true, false),
            Capability::TargetDoorState => CapabilityRule::range(0.0, 1.0, true, true),
            Capability::ObstructionDetected => CapabilityRule::boolean(true, false),
        }
    }

    /// Key under which this capability appears in a characteristics map.
    ///
    /// The remote side decides the spelling, so the existing key is reused
    /// when writing back.
    pub fn find_key<'a>(&self, map: &'a Map<String, Value>) -> Option<&'a String> {
        map.keys().find(|k| Capability::parse(k) == Some(*self))
    }

    /// Human readable value for audit logs
    pub fn describe(&self, value: &Value) -> String {
        let door_state = match (self, value.as_u64()) {
            (Capability::CurrentDoorState | Capability::TargetDoorState, Some(0)) => Some("Open"),
            (Capability::CurrentDoorState | Capability::TargetDoorState, Some(1)) => Some("Closed"),
            (Capability::CurrentDoorState, Some(2)) => Some("Opening"),
            (Capability::CurrentDoorState, Some(3)) => Some("Closing"),
            (Capability::CurrentDoorState, Some(4)) => Some("Stopped"),
            _ => None,
        };

        match (door_state, value) {
            (Some(s), _) => s.to_string(),
            (None, Value::Bool(true)) => "True".to_string(),
            (None, Value::Bool(false)) => "False".to_string(),
            (None, other) => other.to_string(),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.characteristic_name())
    }
}

/// Check a value against the rule for the named capability.
/// Unknown capability names are never valid.
pub fn is_valid(name: &str, value: &Value) -> bool {
    Capability::parse(name)
        .map(|c| c.rule().accepts(value))
        .unwrap_or(false)
}
