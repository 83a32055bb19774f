use naiad::entity::{DeviceVariant, EntityId, EntityValue};
use naiad::metrics::{MetricsEngine, PersistentDeviceState};
use naiad::registers::RegisterSnapshot;
use std::collections::HashMap;

fn le_hex(value: u64, bytes: usize) -> String {
    (0..bytes)
        .map(|i| format!("{:02X}", (value >> (8 * i)) & 0xFF))
        .collect()
}

/// Hex string of `len` chars, zero filled, with fields placed at given
/// char offsets
fn padded(len: usize, fields: &[(usize, String)]) -> String {
    let mut chars: Vec<char> = std::iter::repeat_n('0', len).collect();
    for (offset, field) in fields {
        for (i, c) in field.chars().enumerate() {
            chars[offset + i] = c;
        }
    }
    chars.into_iter().collect()
}

/// Full register set of a standard device; registers not under test are
/// reported empty so prior values are kept
fn standard_snapshot(total_l: u64, soft_l: u64, regenerations: u64) -> RegisterSnapshot {
    let mut map: HashMap<u16, String> = [7u16, 93, 94, 790, 792]
        .into_iter()
        .map(|r| (r, String::new()))
        .collect();
    map.insert(8, le_hex(total_l, 4));
    map.insert(9, le_hex(soft_l, 4));
    map.insert(791, padded(66, &[(62, le_hex(regenerations, 2))]));
    RegisterSnapshot::new(map)
}

fn uint(values: &HashMap<EntityId, EntityValue>, id: EntityId) -> u64 {
    match values.get(&id) {
        Some(EntityValue::Uint(v)) => *v,
        other => panic!("expected uint for {:?}, got {:?}", id, other),
    }
}

fn float(values: &HashMap<EntityId, EntityValue>, id: EntityId) -> f64 {
    values.get(&id).and_then(EntityValue::as_f64).unwrap()
}

fn text(values: &HashMap<EntityId, EntityValue>, id: EntityId) -> String {
    match values.get(&id) {
        Some(EntityValue::Text(s)) => s.clone(),
        other => panic!("expected text for {:?}, got {:?}", id, other),
    }
}

const NOW: i64 = 1_700_000_000;

#[test]
fn decode_converts_liters_to_cubic_meters() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();

    engine
        .run(
            &standard_snapshot(123_456, 100_000, 5),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();

    assert!((float(&values, EntityId::TotalWater) - 123.456).abs() < 1e-9);
    assert!((float(&values, EntityId::TotalSoftwater) - 100.0).abs() < 1e-9);
    assert!((float(&values, EntityId::TotalHardwater) - 23.456).abs() < 1e-9);
}

#[test]
fn monotonic_guard_retains_last_value_and_notifies_once() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();

    engine
        .run(
            &standard_snapshot(100_000, 50_000, 1),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();
    assert!((float(&values, EntityId::TotalWater) - 100.0).abs() < 1e-9);

    let notifications = engine
        .run(
            &standard_snapshot(99_000, 50_000, 1),
            &mut values,
            &mut state,
            false,
            NOW + 60,
        )
        .unwrap();

    assert!((float(&values, EntityId::TotalWater) - 100.0).abs() < 1e-9);
    let corrections: Vec<_> = notifications
        .iter()
        .filter(|n| n.message.contains("Correction made"))
        .collect();
    assert_eq!(corrections.len(), 1);
}

#[test]
fn daily_rollover_snapshots_offset_and_moves_today_to_yesterday() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState {
        offset_total_water: 5000,
        ..Default::default()
    };

    // Same day: today's water keeps accumulating against the old offset
    engine
        .run(
            &standard_snapshot(8000, 4000, 1),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();
    assert_eq!(uint(&values, EntityId::WaterToday), 3000);

    // Midnight: offset jumps to the current total, today resets to zero
    engine
        .run(
            &standard_snapshot(8000, 4000, 1),
            &mut values,
            &mut state,
            true,
            NOW + 60,
        )
        .unwrap();
    assert_eq!(state.offset_total_water, 8000);
    assert_eq!(uint(&values, EntityId::WaterToday), 0);
    assert_eq!(uint(&values, EntityId::WaterYesterday), 3000);
    assert_eq!(state.water_yesterday, 3000);
}

#[test]
fn regeneration_edge_updates_running_mean_with_ceil() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState {
        regeneration_last_count: 10,
        regeneration_last_timestamp: NOW - 16 * 3600,
        regeneration_mean_interval_hours: 10,
        regeneration_mean_counter: 3,
        ..Default::default()
    };

    engine
        .run(
            &standard_snapshot(100_000, 60_000, 11),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();

    // mean = ceil((2 * 10 + 16) / 3) = 12
    assert_eq!(state.regeneration_mean_interval_hours, 12);
    assert_eq!(state.regeneration_mean_counter, 4);
    assert_eq!(uint(&values, EntityId::AvgRegenerationInterval), 12);
    assert_eq!(state.regeneration_last_count, 11);
    assert_eq!(state.regeneration_last_timestamp, NOW);
    // Display value recomputed with floor from the fresh baseline
    assert_eq!(uint(&values, EntityId::HoursSinceRegeneration), 0);
    // Soft/hard baselines snapshotted at the cycle start
    assert!((state.softwater_at_last_regeneration - 60.0).abs() < 1e-9);
    assert!((state.hardwater_at_last_regeneration - 40.0).abs() < 1e-9);
}

#[test]
fn regeneration_jump_moves_watermark_without_mean_update() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState {
        regeneration_last_count: 10,
        regeneration_last_timestamp: NOW - 5 * 3600,
        regeneration_mean_interval_hours: 7,
        regeneration_mean_counter: 4,
        ..Default::default()
    };

    engine
        .run(
            &standard_snapshot(100_000, 60_000, 13),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();

    assert_eq!(state.regeneration_last_count, 13);
    assert_eq!(state.regeneration_mean_interval_hours, 7);
    assert_eq!(state.regeneration_mean_counter, 4);
    // Timestamp untouched, so the display keeps counting from the old one
    assert_eq!(uint(&values, EntityId::HoursSinceRegeneration), 5);
}

#[test]
fn first_observed_regeneration_takes_no_interval_sample() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();

    engine
        .run(
            &standard_snapshot(100_000, 60_000, 1),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();

    assert_eq!(state.regeneration_last_count, 1);
    assert_eq!(state.regeneration_last_timestamp, NOW);
    assert_eq!(state.regeneration_mean_interval_hours, 0);
    assert_eq!(state.regeneration_mean_counter, 1);
}

#[test]
fn hours_since_regeneration_displays_with_floor() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState {
        regeneration_last_count: 4,
        regeneration_last_timestamp: NOW - 90 * 60,
        ..Default::default()
    };

    engine
        .run(
            &standard_snapshot(100_000, 60_000, 4),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();

    assert_eq!(uint(&values, EntityId::HoursSinceRegeneration), 1);
}

#[test]
fn mix_ratio_normalizes_smaller_side_to_one() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut state = PersistentDeviceState::default();

    // soft 300, hard 100 since the (zero) baseline
    let mut values = HashMap::new();
    engine
        .run(
            &standard_snapshot(400_000, 300_000, 0),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();
    assert_eq!(text(&values, EntityId::MixRatio), "3.0:1");

    // Reversed proportions flip the normalized side
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();
    engine
        .run(
            &standard_snapshot(400_000, 100_000, 0),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();
    assert_eq!(text(&values, EntityId::MixRatio), "1:3.0");
}

#[test]
fn mix_ratio_is_unknown_until_both_sides_moved() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    // All consumption since the baseline was softened
    let mut state = PersistentDeviceState {
        softwater_at_last_regeneration: 0.0,
        hardwater_at_last_regeneration: 10.0,
        ..Default::default()
    };

    engine
        .run(
            &standard_snapshot(110_000, 100_000, 0),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();
    assert_eq!(text(&values, EntityId::MixRatio), "unknown");
}

#[test]
fn empty_registers_keep_prior_values() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();

    engine
        .run(
            &standard_snapshot(100_000, 50_000, 2),
            &mut values,
            &mut state,
            false,
            NOW,
        )
        .unwrap();

    // Everything empty this cycle
    let silent: HashMap<u16, String> = [7u16, 8, 9, 93, 94, 790, 791, 792]
        .into_iter()
        .map(|r| (r, String::new()))
        .collect();
    engine
        .run(
            &RegisterSnapshot::new(silent),
            &mut values,
            &mut state,
            false,
            NOW + 60,
        )
        .unwrap();

    assert!((float(&values, EntityId::TotalWater) - 100.0).abs() < 1e-9);
    assert!((float(&values, EntityId::TotalSoftwater) - 50.0).abs() < 1e-9);
}

#[test]
fn missing_register_aborts_the_pass() {
    let engine = MetricsEngine::new(DeviceVariant::Standard);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();

    // Register 791 absent entirely
    let map: HashMap<u16, String> = [7u16, 8, 9, 93, 94, 790, 792]
        .into_iter()
        .map(|r| (r, String::new()))
        .collect();
    let err = engine
        .run(&RegisterSnapshot::new(map), &mut values, &mut state, false, NOW)
        .unwrap_err();
    assert!(err.to_string().contains("791"));
}

#[test]
fn lite_variant_reads_total_from_its_own_register() {
    let engine = MetricsEngine::new(DeviceVariant::SoftwellPLite);
    let mut values = HashMap::new();
    let mut state = PersistentDeviceState::default();

    // Lite layout: total on register 9, controls carried on 790/791
    let mut map: HashMap<u16, String> = HashMap::new();
    map.insert(7, String::new());
    map.insert(9, le_hex(42_000, 4));
    map.insert(790, String::new());
    map.insert(791, padded(66, &[(62, le_hex(3, 2))]));
    engine
        .run(&RegisterSnapshot::new(map), &mut values, &mut state, false, NOW)
        .unwrap();

    assert!((float(&values, EntityId::TotalWater) - 42.0).abs() < 1e-9);
    assert!(!values.contains_key(&EntityId::TotalSoftwater));
    assert!(!values.contains_key(&EntityId::MixRatio));
}
