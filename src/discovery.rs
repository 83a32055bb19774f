//! Home Assistant MQTT discovery
//!
//! Builds the retained per-entity autoconfiguration documents. Topic
//! format is `<prefix>/<component>/<node_id>/<object_id>/config` with both
//! ids sanitized to the character set Home Assistant accepts.

use crate::config::DeviceConfig;
use crate::entity::{EntityDescriptor, EntityKind};
use serde_json::{Value, json};

/// Replace spaces with underscores, then strip everything outside
/// `[A-Za-z0-9_-]`
pub fn sanitize_topic_id(id: &str) -> String {
    id.replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Discovery topic for one entity
pub fn discovery_topic(prefix: &str, component: &str, node_id: &str, object_id: &str) -> String {
    format!(
        "{}/{}/{}/{}/config",
        prefix,
        component,
        sanitize_topic_id(node_id),
        sanitize_topic_id(object_id)
    )
}

/// Home Assistant component a given entity kind registers under
fn component(kind: &EntityKind) -> &'static str {
    match kind {
        EntityKind::Sensor | EntityKind::TotalIncreasing => "sensor",
        EntityKind::Number { .. } => "number",
        EntityKind::Switch => "switch",
        EntityKind::Select { .. } => "select",
    }
}

/// Shared document skeleton: device block, availability and identity
fn base_config(
    device: &DeviceConfig,
    availability_topic: &str,
    online: &str,
    offline: &str,
    sw_version: &str,
    entity_name: &str,
    icon: &str,
) -> serde_json::Map<String, Value> {
    let client_id = device.client_id();
    let mut config = serde_json::Map::new();
    config.insert(
        "device".into(),
        json!({
            "identifiers": format!("[{}]", client_id),
            "manufacturer": device.manufacturer,
            "model": device.name,
            "name": client_id,
            "sw_version": sw_version,
        }),
    );
    config.insert("availability_topic".into(), json!(availability_topic));
    config.insert("payload_available".into(), json!(online));
    config.insert("payload_not_available".into(), json!(offline));
    config.insert("name".into(), json!(format!("{} {}", client_id, entity_name)));
    config.insert("unique_id".into(), json!(format!("{}_{}", client_id, entity_name)));
    config.insert("icon".into(), json!(icon));
    config
}

/// Build the discovery topic and retained config payload for one entity
pub fn entity_config(
    device: &DeviceConfig,
    descriptor: &EntityDescriptor,
    availability_topic: &str,
    online: &str,
    offline: &str,
    sw_version: &str,
    prefix: &str,
) -> (String, Value) {
    let name = descriptor.name();
    let mut config = base_config(
        device,
        availability_topic,
        online,
        offline,
        sw_version,
        name,
        descriptor.icon,
    );
    config.insert(
        "value_template".into(),
        json!(format!("{{{{ value_json['{}'] }}}}", name)),
    );
    config.insert("state_topic".into(), json!(device.state_topic()));

    match &descriptor.kind {
        EntityKind::Sensor => {
            config.insert("unit_of_measurement".into(), json!(descriptor.unit));
        }
        EntityKind::TotalIncreasing => {
            config.insert("device_class".into(), json!("water"));
            config.insert("state_class".into(), json!("total_increasing"));
            config.insert("unit_of_measurement".into(), json!(descriptor.unit));
        }
        EntityKind::Number { min, max, step } => {
            config.insert("command_topic".into(), json!(device.command_topic()));
            config.insert("unit_of_measurement".into(), json!(descriptor.unit));
            config.insert("min".into(), json!(min));
            config.insert("max".into(), json!(max));
            config.insert("step".into(), json!(step));
            config.insert(
                "command_template".into(),
                json!(format!("{{\"{}\": {{{{ value }}}}}}", name)),
            );
        }
        EntityKind::Switch => {
            config.insert("command_topic".into(), json!(device.command_topic()));
            config.insert("payload_on".into(), json!(format!("{{\"{}\": 1}}", name)));
            config.insert("payload_off".into(), json!(format!("{{\"{}\": 0}}", name)));
            config.insert("state_on".into(), json!("1"));
            config.insert("state_off".into(), json!("0"));
        }
        EntityKind::Select { options } => {
            config.insert("command_topic".into(), json!(device.command_topic()));
            config.insert(
                "command_template".into(),
                json!(format!("{{\"{}\": \"{{{{ value }}}}\"}}", name)),
            );
            config.insert("options".into(), json!(options));
        }
    }

    let topic = discovery_topic(
        prefix,
        component(&descriptor.kind),
        &device.location,
        &format!("{}_{}", device.name, name),
    );
    (topic, Value::Object(config))
}

/// Build the discovery document for the per-device notification sensor,
/// which reads the notify topic as plain text
pub fn notification_config(
    device: &DeviceConfig,
    availability_topic: &str,
    online: &str,
    offline: &str,
    sw_version: &str,
    prefix: &str,
) -> (String, Value) {
    let name = "Notification";
    let mut config = base_config(
        device,
        availability_topic,
        online,
        offline,
        sw_version,
        name,
        "mdi:alert-outline",
    );
    config.insert("state_topic".into(), json!(device.notification_topic()));

    let topic = discovery_topic(
        prefix,
        "sensor",
        &device.location,
        &format!("{}_{}", device.name, name),
    );
    (topic, Value::Object(config))
}
