//! Stateful per-device metrics engine
//!
//! This module owns the derived, time-series-like state of one softener:
//! daily water counters, regeneration interval statistics and the soft/hard
//! mix ratio since the last regeneration. The engine consumes a decoded
//! register snapshot plus the previous persistent state and produces updated
//! entity values, updated persistent state and notification events.

use crate::entity::{DeviceVariant, EntityId, EntityValue, decode_rule};
use crate::error::Result;
use crate::logging::get_logger;
use crate::mqtt::{Notification, NotifyLevel};
use crate::registers::RegisterSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Durable per-device record surviving process restarts.
///
/// Exactly one of these exists per configured serial number; a missing
/// record re-initializes to zero-valued defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentDeviceState {
    /// Baseline subtracted from the total to compute today's consumption
    /// (liters)
    pub offset_total_water: u64,

    /// Yesterday's consumption for day-over-day comparison (liters)
    pub water_yesterday: u64,

    /// Watermark for edge-detecting a new regeneration cycle
    pub regeneration_last_count: u64,

    /// Unix timestamp of the last observed regeneration start (0 = never)
    pub regeneration_last_timestamp: i64,

    /// Running mean of the inter-regeneration interval in hours
    pub regeneration_mean_interval_hours: u64,

    /// Sample counter feeding the running mean
    pub regeneration_mean_counter: u64,

    /// Softwater total at the last regeneration (m³)
    pub softwater_at_last_regeneration: f64,

    /// Hardwater total at the last regeneration (m³)
    pub hardwater_at_last_regeneration: f64,

    /// Cloud session token used for authenticated writes
    pub auth_token: String,

    /// Cloud device session id (`da`)
    pub device_session_id: serde_json::Value,

    /// Cloud device session type (`dt`)
    pub device_session_type: serde_json::Value,
}

impl Default for PersistentDeviceState {
    fn default() -> Self {
        Self {
            offset_total_water: 0,
            water_yesterday: 0,
            regeneration_last_count: 0,
            regeneration_last_timestamp: 0,
            regeneration_mean_interval_hours: 0,
            // The mean counter starts at 1 so the first sample replaces the
            // zero mean instead of averaging with it
            regeneration_mean_counter: 1,
            softwater_at_last_regeneration: 0.0,
            hardwater_at_last_regeneration: 0.0,
            auth_token: String::new(),
            device_session_id: serde_json::Value::Null,
            device_session_type: serde_json::Value::Null,
        }
    }
}

/// Per-device metrics engine
pub struct MetricsEngine {
    variant: DeviceVariant,
    logger: crate::logging::StructuredLogger,
}

impl MetricsEngine {
    /// Create an engine for one device variant
    pub fn new(variant: DeviceVariant) -> Self {
        Self {
            variant,
            logger: get_logger("metrics"),
        }
    }

    /// Run one poll pass.
    ///
    /// Decodes and converts every entity, applies the monotonic-counter
    /// guard, the daily rollover, the regeneration edge detection and the
    /// mix ratio. Entity values mutated before a failure stand (best
    /// effort); persistent state is only trustworthy when the pass returns
    /// `Ok`.
    pub fn run(
        &self,
        snapshot: &RegisterSnapshot,
        values: &mut HashMap<EntityId, EntityValue>,
        state: &mut PersistentDeviceState,
        new_day: bool,
        now: i64,
    ) -> Result<Vec<Notification>> {
        let mut notifications = Vec::new();

        self.decode_entities(snapshot, values, &mut notifications)?;
        self.derive_hardwater(values);
        self.daily_rollover(values, state, new_day);
        self.regeneration_pass(values, state, now);
        self.mix_ratio(values, state);

        Ok(notifications)
    }

    /// Decode every register-backed entity of this variant into `values`.
    ///
    /// An empty register value keeps the prior entity value. The total-water
    /// counter additionally gets the monotonic guard: a decoded value below
    /// the last published one is a transient bad read, corrected back to the
    /// last good value with one notification.
    fn decode_entities(
        &self,
        snapshot: &RegisterSnapshot,
        values: &mut HashMap<EntityId, EntityValue>,
        notifications: &mut Vec<Notification>,
    ) -> Result<()> {
        for id in EntityId::ALL {
            let Some(rule) = decode_rule(id, self.variant) else {
                continue;
            };
            let Some(raw) = snapshot.read(rule.register, rule.range.clone())? else {
                // Register not reported this cycle; keep the prior value
                continue;
            };
            let mut value = rule.transform.apply(raw);

            if id == EntityId::TotalWater {
                let prev_liters = values
                    .get(&EntityId::TotalWater)
                    .and_then(EntityValue::as_f64)
                    .map(|m3| (m3 * 1000.0).round() as u64)
                    .unwrap_or(0);
                if raw < prev_liters {
                    notifications.push(Notification::new(
                        NotifyLevel::Debug,
                        format!(
                            "Correction made - new value = {} - wrong value = {}",
                            prev_liters, raw
                        ),
                    ));
                    value = EntityValue::Float(prev_liters as f64 / 1000.0);
                }
            }

            values.insert(id, value);
        }
        Ok(())
    }

    /// Hardwater proportion is not a register; it is the total minus the
    /// softwater proportion
    fn derive_hardwater(&self, values: &mut HashMap<EntityId, EntityValue>) {
        if self.variant != DeviceVariant::Standard {
            return;
        }
        let total = values
            .get(&EntityId::TotalWater)
            .and_then(EntityValue::as_f64)
            .unwrap_or(0.0);
        let soft = values
            .get(&EntityId::TotalSoftwater)
            .and_then(EntityValue::as_f64)
            .unwrap_or(0.0);
        let hard = ((total - soft) * 1000.0).round() / 1000.0;
        values.insert(EntityId::TotalHardwater, EntityValue::Float(hard));
    }

    /// Daily rollover and today's running total
    fn daily_rollover(
        &self,
        values: &mut HashMap<EntityId, EntityValue>,
        state: &mut PersistentDeviceState,
        new_day: bool,
    ) {
        let total_liters = values
            .get(&EntityId::TotalWater)
            .and_then(EntityValue::as_f64)
            .map(|m3| (m3 * 1000.0).round() as u64)
            .unwrap_or(0);

        if new_day {
            let today = values
                .get(&EntityId::WaterToday)
                .and_then(EntityValue::as_f64)
                .map(|v| v.round() as u64)
                .unwrap_or(0);
            state.offset_total_water = total_liters;
            state.water_yesterday = today;
            values.insert(EntityId::WaterYesterday, EntityValue::Uint(today));
            self.logger
                .debug(&format!("New day: water offset snapshot {} L", total_liters));
        }

        let today = total_liters.saturating_sub(state.offset_total_water);
        values.insert(EntityId::WaterToday, EntityValue::Uint(today));
    }

    /// Regeneration-cycle edge detection and interval statistics.
    ///
    /// A +1 transition of the hardware counter marks the start of exactly
    /// one cycle: sample the elapsed interval (ceil, skipped on the very
    /// first observed cycle), fold it into the running mean, snapshot the
    /// soft/hard baselines and advance the watermark. A jump of more than
    /// +1 is a missed-poll gap: watermark only, no mean update.
    ///
    /// The displayed hours-since value is recomputed every cycle with floor
    /// rounding; the ceil/floor split between the two computations is
    /// deliberate.
    fn regeneration_pass(
        &self,
        values: &mut HashMap<EntityId, EntityValue>,
        state: &mut PersistentDeviceState,
        now: i64,
    ) {
        let counter = values
            .get(&EntityId::Regenerations)
            .and_then(EntityValue::as_f64)
            .map(|v| v as u64)
            .unwrap_or(0);

        if counter > state.regeneration_last_count {
            if counter - state.regeneration_last_count == 1 {
                if state.regeneration_last_timestamp != 0 {
                    let elapsed = (now - state.regeneration_last_timestamp).max(0) as u64;
                    let hours = elapsed.div_ceil(3600);
                    values.insert(EntityId::HoursSinceRegeneration, EntityValue::Uint(hours));

                    let n = state.regeneration_mean_counter.max(1);
                    let mean =
                        ((n - 1) * state.regeneration_mean_interval_hours + hours).div_ceil(n);
                    values.insert(EntityId::AvgRegenerationInterval, EntityValue::Uint(mean));
                    state.regeneration_mean_interval_hours = mean;
                    state.regeneration_mean_counter += 1;
                    self.logger.debug(&format!(
                        "Regeneration started after {} h, mean now {} h over {} samples",
                        hours, mean, state.regeneration_mean_counter
                    ));
                }
                state.regeneration_last_timestamp = now;
                state.regeneration_last_count = counter;
                if self.variant == DeviceVariant::Standard {
                    state.softwater_at_last_regeneration = values
                        .get(&EntityId::TotalSoftwater)
                        .and_then(EntityValue::as_f64)
                        .unwrap_or(0.0);
                    state.hardwater_at_last_regeneration = values
                        .get(&EntityId::TotalHardwater)
                        .and_then(EntityValue::as_f64)
                        .unwrap_or(0.0);
                }
            } else {
                // Missed-poll gap, not a statistically valid sample
                state.regeneration_last_count = counter;
            }
        }

        if state.regeneration_last_timestamp != 0 {
            let hours = ((now - state.regeneration_last_timestamp).max(0) / 3600) as u64;
            values.insert(EntityId::HoursSinceRegeneration, EntityValue::Uint(hours));
        }
    }

    /// Soft:hard mix ratio since the last regeneration, normalized so the
    /// smaller side reads 1. Reported as "unknown" until both sides have
    /// accumulated volume.
    fn mix_ratio(&self, values: &mut HashMap<EntityId, EntityValue>, state: &PersistentDeviceState) {
        if self.variant != DeviceVariant::Standard {
            return;
        }

        let soft = values
            .get(&EntityId::TotalSoftwater)
            .and_then(EntityValue::as_f64)
            .unwrap_or(0.0)
            - state.softwater_at_last_regeneration;
        let hard = values
            .get(&EntityId::TotalHardwater)
            .and_then(EntityValue::as_f64)
            .unwrap_or(0.0)
            - state.hardwater_at_last_regeneration;

        let ratio = if soft == 0.0 || hard == 0.0 {
            "unknown".to_string()
        } else if hard < soft {
            format!("{}:1", format_ratio(soft / hard))
        } else {
            format!("1:{}", format_ratio(hard / soft))
        };
        values.insert(EntityId::MixRatio, EntityValue::Text(ratio));
    }
}

/// Round to two decimals, keeping at least one decimal place in the output
/// ("3.0", "2.25")
fn format_ratio(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if (rounded * 10.0).fract().abs() < f64::EPSILON {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_zero_valued() {
        let state = PersistentDeviceState::default();
        assert_eq!(state.offset_total_water, 0);
        assert_eq!(state.regeneration_last_timestamp, 0);
        assert_eq!(state.regeneration_mean_counter, 1);
        assert!(state.auth_token.is_empty());
    }

    #[test]
    fn test_format_ratio() {
        assert_eq!(format_ratio(3.0), "3.0");
        assert_eq!(format_ratio(2.25), "2.25");
        assert_eq!(format_ratio(2.5), "2.5");
        assert_eq!(format_ratio(1.3333), "1.33");
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let mut state = PersistentDeviceState::default();
        state.offset_total_water = 8000;
        state.regeneration_mean_interval_hours = 12;
        let json = serde_json::to_string(&state).unwrap();
        let back: PersistentDeviceState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.offset_total_water, 8000);
        assert_eq!(back.regeneration_mean_interval_hours, 12);
    }

    #[test]
    fn test_partial_state_json_fills_defaults() {
        // A record written by an older build lacks newer keys
        let back: PersistentDeviceState =
            serde_json::from_str(r#"{"offset_total_water": 1234}"#).unwrap();
        assert_eq!(back.offset_total_water, 1234);
        assert_eq!(back.regeneration_mean_counter, 1);
    }
}
