use naiad::cloud::DeviceData;
use naiad::config::DeviceConfig;
use naiad::entity::{EntityId, EntityValue};
use naiad::metrics::PersistentDeviceState;
use naiad::session::DeviceSession;
use serde_json::json;

fn le_hex(value: u64, bytes: usize) -> String {
    (0..bytes)
        .map(|i| format!("{:02X}", (value >> (8 * i)) & 0xFF))
        .collect()
}

fn padded(len: usize, fields: &[(usize, String)]) -> String {
    let mut chars: Vec<char> = std::iter::repeat_n('0', len).collect();
    for (offset, field) in fields {
        for (i, c) in field.chars().enumerate() {
            chars[offset + i] = c;
        }
    }
    chars.into_iter().collect()
}

/// One device block as the cloud delivers it
fn device_data(serial: &str, total_l: u64, soft_l: u64, regenerations: u64) -> DeviceData {
    let registers = json!({
        "1": {"data": "000208"},
        "2": {"data": "0502"},
        "3": {"data": le_hex(1234567, 4)},
        "7": {"data": le_hex(31 * 24, 2)},
        "8": {"data": le_hex(total_l, 4)},
        "9": {"data": le_hex(soft_l, 4)},
        "93": {"data": padded(8, &[(6, "32".to_string())])},
        "94": {"data": padded(8, &[(0, le_hex(12_500, 2)), (4, le_hex(90, 2))])},
        "790": {"data": padded(56, &[(18, "08".to_string()), (54, "14".to_string())])},
        "791": {"data": padded(66, &[(62, le_hex(regenerations, 2))])},
        "792": {"data": padded(40, &[(38, "03".to_string())])},
        "wd": {"data": "bookkeeping, not a register"}
    });
    let value = json!({
        "serialnumber": serial,
        "data": [{"da": 7, "dt": "0x33", "data": registers}]
    });
    serde_json::from_value(value).unwrap()
}

fn session() -> DeviceSession {
    DeviceSession::new(DeviceConfig {
        name: "Softener".to_string(),
        location: "Cellar".to_string(),
        ..Default::default()
    })
}

const NOW: i64 = 1_700_000_000;

#[test]
fn full_poll_pass_renders_the_state_document() {
    let mut session = session();
    let mut state = PersistentDeviceState::default();

    let notifications = session
        .apply(&device_data("0123456", 123_456, 100_000, 5), &mut state, false, NOW)
        .unwrap();
    assert!(notifications.is_empty());

    let payload = session.state_payload();
    let doc = payload.as_object().unwrap();
    assert_eq!(doc["Total water"], "123.456");
    assert_eq!(doc["Total softwater"], "100");
    assert_eq!(doc["Total hardwater"], "23.456");
    assert_eq!(doc["Next revision"], "31");
    assert_eq!(doc["Salt stock"], "12.5");
    assert_eq!(doc["Salt range"], "90");
    assert_eq!(doc["Battery capacity"], "50");
    assert_eq!(doc["Output hardness"], "8");
    assert_eq!(doc["Input hardness"], "20");
    assert_eq!(doc["Regenerations"], "5");
    assert_eq!(doc["Holiday mode"], "mode1");
    assert_eq!(doc["Water today"], "123456");
}

#[test]
fn session_handles_refresh_from_the_cloud_block() {
    let mut session = session();
    let mut state = PersistentDeviceState::default();

    session
        .apply(&device_data("0123456", 1000, 500, 0), &mut state, false, NOW)
        .unwrap();

    assert_eq!(state.device_session_id, json!(7));
    assert_eq!(state.device_session_type, json!("0x33"));
}

#[test]
fn consecutive_polls_accumulate_derived_state() {
    let mut session = session();
    let mut state = PersistentDeviceState {
        regeneration_last_count: 3,
        regeneration_last_timestamp: NOW,
        ..Default::default()
    };

    session
        .apply(&device_data("0123456", 5000, 2000, 3), &mut state, true, NOW)
        .unwrap();
    assert_eq!(state.offset_total_water, 5000);

    session
        .apply(&device_data("0123456", 8000, 4000, 3), &mut state, false, NOW + 3600)
        .unwrap();
    assert_eq!(
        session.value(EntityId::WaterToday),
        Some(&EntityValue::Uint(3000))
    );

    // Next regeneration takes an interval sample from this baseline
    session
        .apply(&device_data("0123456", 8000, 4000, 4), &mut state, false, NOW + 3600)
        .unwrap();
    assert_eq!(state.regeneration_mean_counter, 2);
    assert_eq!(state.regeneration_mean_interval_hours, 1);
}

#[test]
fn command_payload_round_trip_against_live_values() {
    let mut session = session();
    let mut state = PersistentDeviceState::default();
    session
        .apply(&device_data("0123456", 1000, 500, 0), &mut state, false, NOW)
        .unwrap();

    // Output hardness consults the decoded input hardness (20 °dH)
    let plan = session.handle_command(br#"{"Output hardness": 8}"#).unwrap();
    assert_eq!(plan.writes.len(), 1);
    assert_eq!(plan.writes[0].index, 60);
    assert_eq!(plan.writes[0].data, "08");
}
