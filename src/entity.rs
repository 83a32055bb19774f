//! Entity model for published device quantities
//!
//! Each quantity the bridge publishes (sensors, counters, settable numbers,
//! switches, selects) is identified by a compile-time checked [`EntityId`]
//! and described by a static [`EntityDescriptor`]. The decode-rule table
//! maps an entity to the register, hex range and transform that produce
//! its value, with device-variant dependent layouts.

use crate::config::SliderLimits;
use crate::convert::{HolidayMode, Transform};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Device capability variant selecting which registers are relevant.
///
/// The Softwell P lite hardware lacks the battery, salt and softwater
/// proportion sensors as well as the sleep/holiday and leakage-protection
/// registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceVariant {
    /// Full i-soft style softener
    #[default]
    Standard,
    /// Softwell P lite
    SoftwellPLite,
}

/// Identity of one published quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityId {
    NextRevision,
    TotalWater,
    TotalSoftwater,
    TotalHardwater,
    SaltStock,
    SaltRange,
    OutputHardness,
    InputHardness,
    WaterFlow,
    BatteryCapacity,
    Regenerations,
    WaterLock,
    RegenerationStart,
    WaterToday,
    WaterYesterday,
    SleepMode,
    ExtractionTime,
    MaxWaterflow,
    ExtractionQuantity,
    HolidayMode,
    HoursSinceRegeneration,
    AvgRegenerationInterval,
    MixRatio,
}

impl EntityId {
    /// Every entity id; variant scoping happens in the decode-rule table
    /// and the descriptor list
    pub const ALL: [EntityId; 23] = [
        Self::NextRevision,
        Self::TotalWater,
        Self::TotalSoftwater,
        Self::TotalHardwater,
        Self::SaltStock,
        Self::SaltRange,
        Self::OutputHardness,
        Self::InputHardness,
        Self::WaterFlow,
        Self::BatteryCapacity,
        Self::Regenerations,
        Self::WaterLock,
        Self::RegenerationStart,
        Self::WaterToday,
        Self::WaterYesterday,
        Self::SleepMode,
        Self::ExtractionTime,
        Self::MaxWaterflow,
        Self::ExtractionQuantity,
        Self::HolidayMode,
        Self::HoursSinceRegeneration,
        Self::AvgRegenerationInterval,
        Self::MixRatio,
    ];

    /// Stable entity name, used as the JSON key on the state topic and in
    /// incoming command payloads
    pub fn name(self) -> &'static str {
        match self {
            Self::NextRevision => "Next revision",
            Self::TotalWater => "Total water",
            Self::TotalSoftwater => "Total softwater",
            Self::TotalHardwater => "Total hardwater",
            Self::SaltStock => "Salt stock",
            Self::SaltRange => "Salt range",
            Self::OutputHardness => "Output hardness",
            Self::InputHardness => "Input hardness",
            Self::WaterFlow => "Water flow",
            Self::BatteryCapacity => "Battery capacity",
            Self::Regenerations => "Regenerations",
            Self::WaterLock => "Water lock",
            Self::RegenerationStart => "Start regeneration",
            Self::WaterToday => "Water today",
            Self::WaterYesterday => "Water yesterday",
            Self::SleepMode => "Sleep mode",
            Self::ExtractionTime => "Extraction time",
            Self::MaxWaterflow => "Max waterflow",
            Self::ExtractionQuantity => "Extraction quantity",
            Self::HolidayMode => "Holiday mode",
            Self::HoursSinceRegeneration => "Hours since regeneration",
            Self::AvgRegenerationInterval => "Avg regeneration interval",
            Self::MixRatio => "Mix ratio",
        }
    }
}

/// Kind of a published quantity, driving discovery payloads and writability
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// Read-only numeric sensor
    Sensor,
    /// Monotonically increasing counter (water meters)
    TotalIncreasing,
    /// Settable number with slider bounds
    Number { min: u32, max: u32, step: u32 },
    /// Boolean switch
    Switch,
    /// Enumerated select
    Select { options: Vec<&'static str> },
}

/// Static metadata for one published quantity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub id: EntityId,
    pub icon: &'static str,
    pub unit: &'static str,
    pub kind: EntityKind,
}

impl EntityDescriptor {
    pub fn name(&self) -> &'static str {
        self.id.name()
    }
}

/// Decoded or derived runtime value of one entity
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    Uint(u64),
    Float(f64),
    Text(String),
}

impl EntityValue {
    /// Numeric view, if the value is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Uint(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for EntityValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

/// One entry of the decode-rule table
#[derive(Debug, Clone)]
pub struct DecodeRule {
    pub register: u16,
    pub range: Range<usize>,
    pub transform: Transform,
}

/// Decode rule for an entity on a given variant.
///
/// `None` means the entity is derived (computed by the metrics engine) or
/// not present on this variant; the poll pass skips its register entirely.
pub fn decode_rule(id: EntityId, variant: DeviceVariant) -> Option<DecodeRule> {
    use DeviceVariant::{SoftwellPLite, Standard};
    use Transform as T;

    let rule = |register: u16, range: Range<usize>, transform: T| DecodeRule {
        register,
        range,
        transform,
    };

    match (id, variant) {
        (EntityId::NextRevision, _) => Some(rule(7, 0..4, T::HoursToDays)),
        (EntityId::TotalWater, Standard) => Some(rule(8, 0..8, T::LitersToCubicMeters)),
        (EntityId::TotalWater, SoftwellPLite) => Some(rule(9, 0..8, T::LitersToCubicMeters)),
        (EntityId::TotalSoftwater, Standard) => Some(rule(9, 0..8, T::LitersToCubicMeters)),
        (EntityId::SaltStock, Standard) => Some(rule(94, 0..4, T::GramsToKilograms)),
        (EntityId::SaltRange, Standard) => Some(rule(94, 4..8, T::Identity)),
        (EntityId::WaterFlow, Standard) => Some(rule(790, 34..38, T::Identity)),
        (EntityId::BatteryCapacity, Standard) => Some(rule(93, 6..8, T::Identity)),
        (EntityId::WaterLock, Standard) => Some(rule(792, 2..4, T::ClampToBool)),
        (EntityId::SleepMode, Standard) => Some(rule(792, 20..22, T::Identity)),
        (EntityId::MaxWaterflow, Standard) => Some(rule(792, 26..30, T::Identity)),
        (EntityId::ExtractionQuantity, Standard) => Some(rule(792, 30..34, T::Identity)),
        (EntityId::ExtractionTime, Standard) => Some(rule(792, 34..38, T::Identity)),
        (EntityId::HolidayMode, Standard) => Some(rule(792, 38..40, T::HolidayMode)),
        (EntityId::OutputHardness, _) => Some(rule(790, 18..20, T::Identity)),
        (EntityId::InputHardness, _) => Some(rule(790, 54..56, T::Identity)),
        (EntityId::Regenerations, _) => Some(rule(791, 62..66, T::Identity)),
        (EntityId::RegenerationStart, _) => Some(rule(791, 2..4, T::MaskLowNibble)),
        _ => None,
    }
}

/// The full entity set for a device variant, in publish order
pub fn descriptors(variant: DeviceVariant, limits: &SliderLimits) -> Vec<EntityDescriptor> {
    let mut out = vec![
        EntityDescriptor {
            id: EntityId::NextRevision,
            icon: "mdi:account-wrench",
            unit: "d",
            kind: EntityKind::Sensor,
        },
        EntityDescriptor {
            id: EntityId::TotalWater,
            icon: "mdi:water-circle",
            unit: "m³",
            kind: EntityKind::TotalIncreasing,
        },
        EntityDescriptor {
            id: EntityId::OutputHardness,
            icon: "mdi:water-minus",
            unit: "°dH",
            kind: EntityKind::Number {
                min: 1,
                max: 15,
                step: 1,
            },
        },
        EntityDescriptor {
            id: EntityId::InputHardness,
            icon: "mdi:water-plus",
            unit: "°dH",
            kind: EntityKind::Sensor,
        },
        EntityDescriptor {
            id: EntityId::Regenerations,
            icon: "mdi:water-sync",
            unit: "",
            kind: EntityKind::Sensor,
        },
        EntityDescriptor {
            id: EntityId::RegenerationStart,
            icon: "mdi:recycle-variant",
            unit: "",
            kind: EntityKind::Switch,
        },
        EntityDescriptor {
            id: EntityId::WaterToday,
            icon: "mdi:chart-box",
            unit: "L",
            kind: EntityKind::Sensor,
        },
        EntityDescriptor {
            id: EntityId::WaterYesterday,
            icon: "mdi:chart-box-outline",
            unit: "L",
            kind: EntityKind::Sensor,
        },
        EntityDescriptor {
            id: EntityId::HoursSinceRegeneration,
            icon: "mdi:water-sync",
            unit: "h",
            kind: EntityKind::Sensor,
        },
        EntityDescriptor {
            id: EntityId::AvgRegenerationInterval,
            icon: "mdi:water-sync",
            unit: "h",
            kind: EntityKind::Sensor,
        },
    ];

    if variant == DeviceVariant::Standard {
        out.extend([
            EntityDescriptor {
                id: EntityId::SaltStock,
                icon: "mdi:gradient-vertical",
                unit: "kg",
                kind: EntityKind::Number {
                    min: 1,
                    max: 50,
                    step: 1,
                },
            },
            EntityDescriptor {
                id: EntityId::SaltRange,
                icon: "mdi:chevron-triple-right",
                unit: "d",
                kind: EntityKind::Sensor,
            },
            EntityDescriptor {
                id: EntityId::TotalSoftwater,
                icon: "mdi:water-outline",
                unit: "m³",
                kind: EntityKind::TotalIncreasing,
            },
            EntityDescriptor {
                id: EntityId::TotalHardwater,
                icon: "mdi:water",
                unit: "m³",
                kind: EntityKind::TotalIncreasing,
            },
            EntityDescriptor {
                id: EntityId::WaterFlow,
                icon: "mdi:waves-arrow-right",
                unit: "L/h",
                kind: EntityKind::Sensor,
            },
            EntityDescriptor {
                id: EntityId::BatteryCapacity,
                icon: "mdi:battery-50",
                unit: "%",
                kind: EntityKind::Sensor,
            },
            EntityDescriptor {
                id: EntityId::WaterLock,
                icon: "mdi:pipe-valve",
                unit: "",
                kind: EntityKind::Switch,
            },
            EntityDescriptor {
                id: EntityId::SleepMode,
                icon: "mdi:pause-octagon",
                unit: "h",
                kind: EntityKind::Number {
                    min: 0,
                    max: 10,
                    step: 1,
                },
            },
            EntityDescriptor {
                id: EntityId::ExtractionTime,
                icon: "mdi:clock-alert-outline",
                unit: "min",
                kind: EntityKind::Number {
                    min: 10,
                    max: limits.extraction_time_min,
                    step: 10,
                },
            },
            EntityDescriptor {
                id: EntityId::MaxWaterflow,
                icon: "mdi:waves-arrow-up",
                unit: "L/h",
                kind: EntityKind::Number {
                    min: 500,
                    max: limits.max_waterflow_l_h,
                    step: 500,
                },
            },
            EntityDescriptor {
                id: EntityId::ExtractionQuantity,
                icon: "mdi:cup-water",
                unit: "L",
                kind: EntityKind::Number {
                    min: 100,
                    max: limits.extraction_quantity_l,
                    step: 100,
                },
            },
            EntityDescriptor {
                id: EntityId::HolidayMode,
                icon: "mdi:palm-tree",
                unit: "",
                kind: EntityKind::Select {
                    options: HolidayMode::options().to_vec(),
                },
            },
            EntityDescriptor {
                id: EntityId::MixRatio,
                icon: "mdi:tune-vertical",
                unit: "",
                kind: EntityKind::Sensor,
            },
        ]);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SliderLimits {
        SliderLimits::default()
    }

    #[test]
    fn test_all_covers_every_descriptor() {
        // The decode pass iterates ALL; any descriptor id missing from it
        // would silently never be decoded
        for variant in [DeviceVariant::Standard, DeviceVariant::SoftwellPLite] {
            for descriptor in descriptors(variant, &limits()) {
                assert!(
                    EntityId::ALL.contains(&descriptor.id),
                    "{} missing from ALL",
                    descriptor.id.name()
                );
            }
        }
    }

    #[test]
    fn test_lite_variant_drops_unsupported_entities() {
        let lite = descriptors(DeviceVariant::SoftwellPLite, &limits());
        assert!(lite.iter().all(|d| d.id != EntityId::BatteryCapacity));
        assert!(lite.iter().all(|d| d.id != EntityId::SaltStock));
        assert!(lite.iter().all(|d| d.id != EntityId::TotalSoftwater));
        assert!(lite.iter().all(|d| d.id != EntityId::HolidayMode));
        assert!(lite.iter().all(|d| d.id != EntityId::WaterLock));
        assert!(lite.iter().any(|d| d.id == EntityId::TotalWater));
    }

    #[test]
    fn test_total_water_register_depends_on_variant() {
        let std_rule = decode_rule(EntityId::TotalWater, DeviceVariant::Standard).unwrap();
        let lite_rule = decode_rule(EntityId::TotalWater, DeviceVariant::SoftwellPLite).unwrap();
        assert_eq!(std_rule.register, 8);
        assert_eq!(lite_rule.register, 9);
        assert_eq!(std_rule.range, 0..8);
    }

    #[test]
    fn test_variant_gated_rules_absent_on_lite() {
        assert!(decode_rule(EntityId::SaltStock, DeviceVariant::SoftwellPLite).is_none());
        assert!(decode_rule(EntityId::SleepMode, DeviceVariant::SoftwellPLite).is_none());
        assert!(decode_rule(EntityId::BatteryCapacity, DeviceVariant::SoftwellPLite).is_none());
    }

    #[test]
    fn test_derived_entities_have_no_rule() {
        for variant in [DeviceVariant::Standard, DeviceVariant::SoftwellPLite] {
            assert!(decode_rule(EntityId::WaterToday, variant).is_none());
            assert!(decode_rule(EntityId::MixRatio, variant).is_none());
            assert!(decode_rule(EntityId::TotalHardwater, variant).is_none());
            assert!(decode_rule(EntityId::AvgRegenerationInterval, variant).is_none());
        }
    }

    #[test]
    fn test_every_descriptor_is_rule_or_derived() {
        // Entities with a decode rule and derived entities must cover the set
        let derived = [
            EntityId::TotalHardwater,
            EntityId::WaterToday,
            EntityId::WaterYesterday,
            EntityId::HoursSinceRegeneration,
            EntityId::AvgRegenerationInterval,
            EntityId::MixRatio,
        ];
        for d in descriptors(DeviceVariant::Standard, &limits()) {
            let has_rule = decode_rule(d.id, DeviceVariant::Standard).is_some();
            assert!(
                has_rule || derived.contains(&d.id),
                "{} is neither decodable nor derived",
                d.name()
            );
        }
    }

    #[test]
    fn test_value_display_matches_state_payload_format() {
        assert_eq!(EntityValue::Uint(42).to_string(), "42");
        assert_eq!(EntityValue::Float(8.45).to_string(), "8.45");
        assert_eq!(EntityValue::Text("1:4.0".into()).to_string(), "1:4.0");
    }
}
