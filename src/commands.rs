//! Command encoding for the vendor write endpoint
//!
//! Every actuation the bridge supports boils down to one or two writes of
//! `(index, payload)` pairs against the cloud API. This module validates
//! the operator's value, applies the sodium policy where it gates the
//! output hardness, and encodes the payload bytes. It never talks to the
//! network; the session layer carries the writes out.

use crate::config::{SliderLimits, SodiumConfig};
use crate::convert::HolidayMode;
use crate::error::{NaiadError, Result};
use crate::mqtt::{Notification, NotifyLevel};
use crate::registers::{HexWidth, encode_le_hex};

/// Fixed write indices of the vendor command endpoint
mod index {
    pub const OUTPUT_HARDNESS: u16 = 60;
    pub const START_REGENERATION: u16 = 65;
    pub const WATER_LOCK_FIRST: u16 = 73;
    pub const EXTRACTION_TIME: u16 = 74;
    pub const MAX_WATERFLOW: u16 = 75;
    pub const EXTRACTION_QUANTITY: u16 = 76;
    pub const HOLIDAY_MODE: u16 = 77;
    pub const SALT_STOCK: u16 = 94;
    pub const SLEEP_HOURS: u16 = 171;
}

/// One write against the vendor command endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWrite {
    pub index: u16,
    /// Hex or decimal payload string, may be empty for parameterless
    /// commands
    pub data: String,
}

impl RegisterWrite {
    fn new(index: u16, data: impl Into<String>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }

    fn bare(index: u16) -> Self {
        Self {
            index,
            data: String::new(),
        }
    }
}

/// Outcome of encoding one operator command: the writes to perform plus any
/// notifications to publish (the sodium clamp announces itself)
#[derive(Debug, Default)]
pub struct CommandPlan {
    pub writes: Vec<RegisterWrite>,
    pub notifications: Vec<Notification>,
}

impl CommandPlan {
    fn single(write: RegisterWrite) -> Self {
        Self {
            writes: vec![write],
            notifications: Vec::new(),
        }
    }
}

/// Set the output hardness in °dH, subject to the sodium policy.
///
/// When the sodium check is enabled the requested value is accepted only if
/// the resulting sodium concentration stays strictly below the configured
/// limit; otherwise the hardness is clamped to the highest compliant value
/// and the substitution is announced.
pub fn set_output_hardness(
    requested_dh: u32,
    input_hardness_dh: u32,
    sodium: &SodiumConfig,
) -> Result<CommandPlan> {
    if !(1..=15).contains(&requested_dh) {
        return Err(NaiadError::validation(
            "output_hardness",
            format!("{} °dH outside 1..=15", requested_dh),
        ));
    }

    let mut plan = CommandPlan::default();
    let mut hardness = requested_dh;

    if sodium.check_enabled {
        let sodium_mg_l =
            (input_hardness_dh.saturating_sub(requested_dh)) as f64 * 8.2 + sodium.input_mg_l;
        if sodium_mg_l >= sodium.limit_mg_l {
            let clamped = (input_hardness_dh as f64
                - (sodium.limit_mg_l - sodium.input_mg_l) / 8.2)
                .ceil() as u32;
            plan.notifications.push(Notification::new(
                NotifyLevel::Warning,
                format!(
                    "Output hardness of {}°dH would exceed the sodium limit of {} mg/l. Setting output hardness to {}°dH",
                    requested_dh, sodium.limit_mg_l, clamped
                ),
            ));
            hardness = clamped;
        }
    }

    plan.writes.push(RegisterWrite::new(
        index::OUTPUT_HARDNESS,
        encode_le_hex(u64::from(hardness), HexWidth::OneByte),
    ));
    Ok(plan)
}

/// Set the salt stock in kilograms (written as grams, two bytes LE)
pub fn set_salt_stock(kilograms: u32) -> Result<CommandPlan> {
    if kilograms > 50 {
        return Err(NaiadError::validation(
            "salt_stock",
            format!("{} kg outside 0..=50", kilograms),
        ));
    }
    Ok(CommandPlan::single(RegisterWrite::new(
        index::SALT_STOCK,
        encode_le_hex(u64::from(kilograms) * 1000, HexWidth::TwoBytes),
    )))
}

/// Engage or release the water lock.
///
/// Position 0 releases, position 1 engages; the vendor endpoint addresses
/// the two as adjacent parameterless indices counted downward from the
/// lock-release index.
pub fn set_water_lock(position: u32) -> Result<CommandPlan> {
    if position >= 2 {
        return Err(NaiadError::validation(
            "water_lock",
            format!("position {} outside 0..=1", position),
        ));
    }
    Ok(CommandPlan::single(RegisterWrite::bare(
        index::WATER_LOCK_FIRST - position as u16,
    )))
}

/// Set the sleep-mode duration in hours.
///
/// Zero cancels sleep mode outright. A positive duration is written as a
/// decimal string followed by a bare start trigger on the same index.
pub fn set_sleep_hours(hours: u32) -> Result<CommandPlan> {
    if hours > 10 {
        return Err(NaiadError::validation(
            "sleep_mode",
            format!("{} h outside 0..=10", hours),
        ));
    }
    if hours == 0 {
        return Ok(CommandPlan::single(RegisterWrite::bare(
            index::WATER_LOCK_FIRST,
        )));
    }
    Ok(CommandPlan {
        writes: vec![
            RegisterWrite::new(index::SLEEP_HOURS, hours.to_string()),
            RegisterWrite::bare(index::SLEEP_HOURS),
        ],
        notifications: Vec::new(),
    })
}

/// Set the maximum emergency-supply water flow in l/h
pub fn set_max_waterflow(liters_per_hour: u32, limits: &SliderLimits) -> Result<CommandPlan> {
    if liters_per_hour == 0 || liters_per_hour > limits.max_waterflow_l_h {
        return Err(NaiadError::validation(
            "max_waterflow",
            format!(
                "{} l/h outside 1..={}",
                liters_per_hour, limits.max_waterflow_l_h
            ),
        ));
    }
    Ok(CommandPlan::single(RegisterWrite::new(
        index::MAX_WATERFLOW,
        encode_le_hex(u64::from(liters_per_hour), HexWidth::TwoBytes),
    )))
}

/// Set the leakage-protection extraction time in minutes
pub fn set_extraction_time(minutes: u32, limits: &SliderLimits) -> Result<CommandPlan> {
    if minutes == 0 || minutes > limits.extraction_time_min {
        return Err(NaiadError::validation(
            "extraction_time",
            format!("{} min outside 1..={}", minutes, limits.extraction_time_min),
        ));
    }
    Ok(CommandPlan::single(RegisterWrite::new(
        index::EXTRACTION_TIME,
        encode_le_hex(u64::from(minutes), HexWidth::TwoBytes),
    )))
}

/// Set the leakage-protection extraction quantity in liters
pub fn set_extraction_quantity(liters: u32, limits: &SliderLimits) -> Result<CommandPlan> {
    if liters == 0 || liters > limits.extraction_quantity_l {
        return Err(NaiadError::validation(
            "extraction_quantity",
            format!("{} l outside 1..={}", liters, limits.extraction_quantity_l),
        ));
    }
    Ok(CommandPlan::single(RegisterWrite::new(
        index::EXTRACTION_QUANTITY,
        encode_le_hex(u64::from(liters), HexWidth::TwoBytes),
    )))
}

/// Select a holiday mode.
///
/// Turning the mode off additionally releases the water lock first, since
/// the lock variant of holiday mode leaves it engaged.
pub fn set_holiday_mode(mode: HolidayMode) -> Result<CommandPlan> {
    let mut writes = Vec::new();
    if mode == HolidayMode::Off {
        writes.push(RegisterWrite::bare(index::WATER_LOCK_FIRST));
    }
    writes.push(RegisterWrite::new(
        index::HOLIDAY_MODE,
        mode.code().to_string(),
    ));
    Ok(CommandPlan {
        writes,
        notifications: Vec::new(),
    })
}

/// Trigger an immediate regeneration cycle
pub fn start_regeneration() -> CommandPlan {
    CommandPlan::single(RegisterWrite::bare(index::START_REGENERATION))
}
