//! Unit conversion rules for decoded registers
//!
//! Raw register integers become domain quantities here: liters to cubic
//! meters, hours to days, bit masks to booleans, and the enumerated holiday
//! mode remap. Every transform is total over the integer domain - the
//! hardware occasionally reports implausible raw values, so out-of-range
//! input is clamped or defaulted, never rejected.

use crate::entity::EntityValue;

/// Per-field scaling/encoding rule applied after the register decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Raw integer passed through unchanged
    Identity,
    /// Liters to cubic meters: divide by 1000, round to 3 decimals
    LitersToCubicMeters,
    /// Grams to kilograms
    GramsToKilograms,
    /// Hours to whole days (floor)
    HoursToDays,
    /// Mask the low nibble; any nonzero bit becomes 1
    MaskLowNibble,
    /// Values above 1 are forced to 1 (lock-state sensors sometimes report
    /// multi-bit garbage)
    ClampToBool,
    /// Enumerated holiday mode remap
    HolidayMode,
}

impl Transform {
    /// Apply the transform to a raw register value
    pub fn apply(self, raw: u64) -> EntityValue {
        match self {
            Transform::Identity => EntityValue::Uint(raw),
            Transform::LitersToCubicMeters => {
                EntityValue::Float((raw as f64 / 1000.0 * 1000.0).round() / 1000.0)
            }
            Transform::GramsToKilograms => EntityValue::Float(raw as f64 / 1000.0),
            Transform::HoursToDays => EntityValue::Uint(raw / 24),
            Transform::MaskLowNibble => EntityValue::Uint(u64::from(raw & 0x0F != 0)),
            Transform::ClampToBool => EntityValue::Uint(raw.min(1)),
            Transform::HolidayMode => {
                EntityValue::Text(HolidayMode::from_code(raw).as_str().to_string())
            }
        }
    }
}

/// Holiday mode positions of the mode-select register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayMode {
    Off,
    Lock,
    Mode1,
    Mode2,
}

impl HolidayMode {
    /// Map a raw register code to a mode; unrecognized codes mean off
    pub fn from_code(code: u64) -> Self {
        match code {
            9 => Self::Lock,
            3 => Self::Mode1,
            5 => Self::Mode2,
            _ => Self::Off,
        }
    }

    /// The wire code written to the mode-select register
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Lock => 9,
            Self::Mode1 => 3,
            Self::Mode2 => 5,
        }
    }

    /// Display/select-option label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Lock => "lock",
            Self::Mode1 => "mode1",
            Self::Mode2 => "mode2",
        }
    }

    /// Parse a select-option label back into a mode
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "off" => Some(Self::Off),
            "lock" => Some(Self::Lock),
            "mode1" => Some(Self::Mode1),
            "mode2" => Some(Self::Mode2),
            _ => None,
        }
    }

    /// All select options in display order
    pub fn options() -> [&'static str; 4] {
        ["off", "lock", "mode1", "mode2"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liters_to_cubic_meters() {
        assert_eq!(
            Transform::LitersToCubicMeters.apply(8450),
            EntityValue::Float(8.45)
        );
        assert_eq!(
            Transform::LitersToCubicMeters.apply(123_456),
            EntityValue::Float(123.456)
        );
    }

    #[test]
    fn test_hours_to_days_floors() {
        assert_eq!(Transform::HoursToDays.apply(47), EntityValue::Uint(1));
        assert_eq!(Transform::HoursToDays.apply(48), EntityValue::Uint(2));
    }

    #[test]
    fn test_mask_low_nibble() {
        assert_eq!(Transform::MaskLowNibble.apply(0xF0), EntityValue::Uint(0));
        assert_eq!(Transform::MaskLowNibble.apply(0x03), EntityValue::Uint(1));
        assert_eq!(Transform::MaskLowNibble.apply(0), EntityValue::Uint(0));
    }

    #[test]
    fn test_clamp_to_bool() {
        assert_eq!(Transform::ClampToBool.apply(0), EntityValue::Uint(0));
        assert_eq!(Transform::ClampToBool.apply(1), EntityValue::Uint(1));
        assert_eq!(Transform::ClampToBool.apply(37), EntityValue::Uint(1));
    }

    #[test]
    fn test_holiday_mode_codes() {
        assert_eq!(HolidayMode::from_code(0), HolidayMode::Off);
        assert_eq!(HolidayMode::from_code(9), HolidayMode::Lock);
        assert_eq!(HolidayMode::from_code(3), HolidayMode::Mode1);
        assert_eq!(HolidayMode::from_code(5), HolidayMode::Mode2);
        // Unrecognized codes map to off
        assert_eq!(HolidayMode::from_code(250), HolidayMode::Off);
    }

    #[test]
    fn test_holiday_mode_round_trip() {
        for mode in [
            HolidayMode::Off,
            HolidayMode::Lock,
            HolidayMode::Mode1,
            HolidayMode::Mode2,
        ] {
            assert_eq!(HolidayMode::from_code(mode.code() as u64), mode);
            assert_eq!(HolidayMode::parse(mode.as_str()), Some(mode));
        }
    }
}
