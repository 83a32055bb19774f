//! Per-device session
//!
//! One `DeviceSession` per configured softener. It owns the live entity
//! values, feeds register snapshots through the metrics engine, renders
//! the retained state document and turns inbound command payloads into
//! register write plans.

use crate::cloud::DeviceData;
use crate::commands::{self, CommandPlan};
use crate::config::DeviceConfig;
use crate::convert::HolidayMode;
use crate::entity::{DeviceVariant, EntityId, EntityValue, descriptors};
use crate::error::{NaiadError, Result};
use crate::logging::{LogContext, get_logger_with_context};
use crate::metrics::{MetricsEngine, PersistentDeviceState};
use crate::mqtt::{Notification, NotifyLevel};
use crate::registers::RegisterSnapshot;
use serde_json::Value;
use std::collections::HashMap;

pub struct DeviceSession {
    pub config: DeviceConfig,
    /// Serial number in use, either configured or resolved positionally
    /// from the first cloud response
    pub serial_number: String,
    engine: MetricsEngine,
    values: HashMap<EntityId, EntityValue>,
    logger: crate::logging::StructuredLogger,
}

impl DeviceSession {
    pub fn new(config: DeviceConfig) -> Self {
        let mut values = HashMap::new();
        for descriptor in descriptors(config.variant, &config.limits) {
            values.insert(descriptor.id, EntityValue::Uint(0));
        }
        let serial_number = config.serial_number.clone();
        let engine = MetricsEngine::new(config.variant);
        let logger = get_logger_with_context(
            LogContext::new("session").with_serial(serial_number.clone()),
        );
        Self {
            config,
            serial_number,
            engine,
            values,
            logger,
        }
    }

    /// Restore entity values that are durable rather than derivable
    pub fn restore(&mut self, state: &PersistentDeviceState) {
        self.values.insert(
            EntityId::WaterYesterday,
            EntityValue::Uint(state.water_yesterday),
        );
    }

    pub fn value(&self, id: EntityId) -> Option<&EntityValue> {
        self.values.get(&id)
    }

    /// Apply one cloud response block for this device: refresh the session
    /// handles, log the device metadata and run the metrics engine.
    pub fn apply(
        &mut self,
        data: &DeviceData,
        state: &mut PersistentDeviceState,
        new_day: bool,
        now: i64,
    ) -> Result<Vec<Notification>> {
        if let Some(block) = data.data.first() {
            state.device_session_id = block.da.clone();
            state.device_session_type = block.dt.clone();
        }

        let snapshot = data.snapshot();
        self.log_metadata(&snapshot);
        self.engine
            .run(&snapshot, &mut self.values, state, new_day, now)
    }

    /// Log software version, hardware version and the device number
    /// reported in the metadata registers
    fn log_metadata(&self, snapshot: &RegisterSnapshot) {
        if let (Ok(Some(minor)), Ok(Some(major))) =
            (snapshot.read(1, 2..4), snapshot.read(1, 4..6))
        {
            self.logger
                .debug(&format!("Software version: {}.{:02}", major, minor));
        }
        if let (Ok(Some(minor)), Ok(Some(major))) =
            (snapshot.read(2, 0..2), snapshot.read(2, 2..4))
        {
            self.logger
                .debug(&format!("Hardware version: {}.{:02}", major, minor));
        }
        if let Ok(Some(number)) = snapshot.read(3, 0..8) {
            self.logger.debug(&format!("Device number: {}", number));
        }
    }

    /// Render the retained state document: one JSON object keyed by entity
    /// name, every value stringified, in stable publish order
    pub fn state_payload(&self) -> Value {
        let mut out = serde_json::Map::new();
        for descriptor in descriptors(self.config.variant, &self.config.limits) {
            if let Some(value) = self.values.get(&descriptor.id) {
                out.insert(descriptor.name().to_string(), Value::String(value.to_string()));
            }
        }
        Value::Object(out)
    }

    /// Turn an inbound command payload into a write plan.
    ///
    /// Payloads are single-key JSON objects keyed by entity name, as
    /// emitted by the discovery command templates. An unknown key is
    /// logged and produces an empty plan.
    pub fn handle_command(&self, payload: &[u8]) -> Result<CommandPlan> {
        let command: Value = serde_json::from_slice(payload).map_err(|e| {
            NaiadError::validation("command", format!("payload is not JSON: {}", e))
        })?;
        let Some(object) = command.as_object() else {
            return Err(NaiadError::validation(
                "command",
                "payload is not a JSON object",
            ));
        };

        for (key, value) in object {
            if let Some(plan) = self.dispatch(key, value)? {
                return Ok(plan);
            }
        }

        self.logger
            .warn(&format!("Ignoring unknown command payload: {}", command));
        Ok(CommandPlan::default())
    }

    fn dispatch(&self, key: &str, value: &Value) -> Result<Option<CommandPlan>> {
        let uint = |value: &Value, field: &str| -> Result<u32> {
            value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    NaiadError::validation(field, format!("{} is not an integer", value))
                })
        };

        let mut plan = if key == EntityId::OutputHardness.name() {
            let requested = uint(value, "output_hardness")?;
            let input = self
                .values
                .get(&EntityId::InputHardness)
                .and_then(EntityValue::as_f64)
                .unwrap_or(0.0) as u32;
            let mut plan = commands::set_output_hardness(requested, input, &self.config.sodium)?;
            if plan.notifications.is_empty() {
                plan.notifications.push(confirmation(key, requested));
            }
            plan
        } else if key == EntityId::SaltStock.name() {
            let kilograms = uint(value, "salt_stock")?;
            let mut plan = commands::set_salt_stock(kilograms)?;
            plan.notifications.push(confirmation(key, kilograms));
            plan
        } else if key == EntityId::WaterLock.name() {
            let position = uint(value, "water_lock")?;
            let mut plan = commands::set_water_lock(position)?;
            plan.notifications.push(Notification::new(
                NotifyLevel::Warning,
                format!("Water lock was set to position {}", position),
            ));
            plan
        } else if key == EntityId::SleepMode.name() {
            let hours = uint(value, "sleep_mode")?;
            let mut plan = commands::set_sleep_hours(hours)?;
            plan.notifications.push(Notification::new(
                NotifyLevel::Warning,
                if hours == 0 {
                    "Sleep mode was cancelled".to_string()
                } else {
                    format!("Sleep mode was started for {} hours", hours)
                },
            ));
            plan
        } else if key == EntityId::MaxWaterflow.name() {
            let flow = uint(value, "max_waterflow")?;
            let mut plan = commands::set_max_waterflow(flow, &self.config.limits)?;
            plan.notifications.push(confirmation(key, flow));
            plan
        } else if key == EntityId::ExtractionTime.name() {
            let minutes = uint(value, "extraction_time")?;
            let mut plan = commands::set_extraction_time(minutes, &self.config.limits)?;
            plan.notifications.push(confirmation(key, minutes));
            plan
        } else if key == EntityId::ExtractionQuantity.name() {
            let liters = uint(value, "extraction_quantity")?;
            let mut plan = commands::set_extraction_quantity(liters, &self.config.limits)?;
            plan.notifications.push(confirmation(key, liters));
            plan
        } else if key == EntityId::HolidayMode.name() {
            let Some(mode) = value.as_str().and_then(HolidayMode::parse) else {
                return Err(NaiadError::validation(
                    "holiday_mode",
                    format!("unknown mode {}", value),
                ));
            };
            let mut plan = commands::set_holiday_mode(mode)?;
            plan.notifications.push(Notification::new(
                NotifyLevel::Warning,
                format!("Holiday mode was set to {}", mode.as_str()),
            ));
            plan
        } else if key == EntityId::RegenerationStart.name() {
            if uint(value, "start_regeneration")? == 0 {
                // The switch-off payload; a running cycle cannot be stopped
                return Ok(Some(CommandPlan::default()));
            }
            let mut plan = commands::start_regeneration();
            plan.notifications.push(Notification::new(
                NotifyLevel::Warning,
                "Regeneration was started",
            ));
            plan
        } else {
            return Ok(None);
        };

        // Lite devices expose a subset; reject what the variant lacks
        if self.config.variant == DeviceVariant::SoftwellPLite
            && key != EntityId::OutputHardness.name()
            && key != EntityId::RegenerationStart.name()
        {
            return Err(NaiadError::validation(
                "command",
                format!("{} is not available on this device variant", key),
            ));
        }

        plan.writes.iter().for_each(|write| {
            self.logger.debug(&format!(
                "Command {} -> index {} data {:?}",
                key, write.index, write.data
            ));
        });
        Ok(Some(plan))
    }
}

fn confirmation(name: &str, value: u32) -> Notification {
    Notification::new(
        NotifyLevel::Warning,
        format!("{} was set to {}", name, value),
    )
}
