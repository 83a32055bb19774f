//! Register snapshot decoding for the vendor cloud protocol
//!
//! The cloud API reports device state as a map from numeric register index
//! to a hexadecimal byte string. This module provides the pure decoding
//! primitives: little-endian integer reads over half-open character ranges
//! of those hex strings, and the inverse encoding used by register writes.

use crate::error::{NaiadError, Result};
use std::collections::HashMap;
use std::ops::Range;

/// Immutable view of one poll response for one physical device.
///
/// Produced fresh on every poll and discarded after decoding.
#[derive(Debug, Clone, Default)]
pub struct RegisterSnapshot {
    registers: HashMap<u16, String>,
}

impl RegisterSnapshot {
    /// Create a snapshot from raw register index/hex-string pairs
    pub fn new(registers: HashMap<u16, String>) -> Self {
        Self { registers }
    }

    /// Number of registers present in this snapshot
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the snapshot carries no registers at all
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Raw hex string for a register, if reported
    pub fn raw(&self, register: u16) -> Option<&str> {
        self.registers.get(&register).map(String::as_str)
    }

    /// Read hex characters `range` of `register` as a little-endian unsigned
    /// integer.
    ///
    /// Returns `Ok(None)` when the register's value string is empty: the
    /// device did not report it this cycle and the caller keeps its prior
    /// value. A register missing from the snapshot entirely, or a malformed
    /// hex substring, is a `DecodeError` - the caller must not substitute
    /// zero.
    pub fn read(&self, register: u16, range: Range<usize>) -> Result<Option<u64>> {
        let value = self
            .registers
            .get(&register)
            .ok_or_else(|| NaiadError::decode(register, range.clone(), "register not in response"))?;

        if value.is_empty() {
            return Ok(None);
        }

        decode_le_hex(value, register, range).map(Some)
    }
}

/// Decode hex characters `[range.start, range.end)` of `hex` as a
/// little-endian unsigned integer.
pub fn decode_le_hex(hex: &str, register: u16, range: Range<usize>) -> Result<u64> {
    if range.start >= range.end {
        return Err(NaiadError::decode(register, range, "empty byte range"));
    }
    if range.end > hex.len() {
        return Err(NaiadError::decode(
            register,
            range.clone(),
            format!("range exceeds value length {}", hex.len()),
        ));
    }
    // Byte slicing avoids a panic on non-ASCII input at a char boundary;
    // non-ASCII pairs fail the radix parse below.
    let slice = &hex.as_bytes()[range.start..range.end];
    if slice.len() % 2 != 0 {
        return Err(NaiadError::decode(
            register,
            range,
            "odd number of hex characters",
        ));
    }
    if slice.len() > 16 {
        return Err(NaiadError::decode(register, range, "range wider than 8 bytes"));
    }

    let mut value: u64 = 0;
    // Little-endian: the last byte pair is the most significant
    for (i, chunk) in slice.chunks_exact(2).enumerate() {
        let pair = std::str::from_utf8(chunk)
            .map_err(|_| NaiadError::decode(register, range.clone(), "non-ASCII hex"))?;
        let byte = u8::from_str_radix(pair, 16).map_err(|_| {
            NaiadError::decode(register, range.clone(), format!("invalid hex pair '{}'", pair))
        })?;
        value |= (byte as u64) << (8 * i);
    }
    Ok(value)
}

/// Encode an integer as a little-endian hex payload of `width` bits.
///
/// The vendor write endpoint accepts 1- and 2-byte payloads only.
pub fn encode_le_hex(value: u64, width: HexWidth) -> String {
    match width {
        HexWidth::OneByte => format!("{:02X}", value & 0xFF),
        HexWidth::TwoBytes => {
            let v = value & 0xFFFF;
            format!("{:02X}{:02X}", v & 0xFF, (v >> 8) & 0xFF)
        }
    }
}

/// Payload width for register writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexWidth {
    /// Single byte payload
    OneByte,
    /// Two byte little-endian payload
    TwoBytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(u16, &str)]) -> RegisterSnapshot {
        RegisterSnapshot::new(
            pairs
                .iter()
                .map(|(k, v)| (*k, v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_read_little_endian() {
        let snap = snapshot(&[(8, "E8030000")]);
        // E8 03 little-endian -> 0x03E8 = 1000
        assert_eq!(snap.read(8, 0..8).unwrap(), Some(1000));
    }

    #[test]
    fn test_read_sub_range() {
        let snap = snapshot(&[(94, "10270500")]);
        assert_eq!(snap.read(94, 0..4).unwrap(), Some(10000));
        assert_eq!(snap.read(94, 4..8).unwrap(), Some(5));
    }

    #[test]
    fn test_read_is_deterministic() {
        let snap = snapshot(&[(791, "0100deadbeef12345678")]);
        let a = snap.read(791, 4..12).unwrap();
        let b = snap.read(791, 4..12).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_value_is_not_an_error() {
        let snap = snapshot(&[(790, "")]);
        assert_eq!(snap.read(790, 18..20).unwrap(), None);
    }

    #[test]
    fn test_missing_register_is_error() {
        let snap = snapshot(&[]);
        let err = snap.read(8, 0..8).unwrap_err();
        assert!(matches!(err, NaiadError::Decode { register: 8, .. }));
    }

    #[test]
    fn test_malformed_hex_is_error() {
        let snap = snapshot(&[(8, "zz030000")]);
        assert!(snap.read(8, 0..8).is_err());
    }

    #[test]
    fn test_range_beyond_value_is_error() {
        let snap = snapshot(&[(792, "0001")]);
        assert!(snap.read(792, 2..6).is_err());
    }

    #[test]
    fn test_odd_range_is_error() {
        let snap = snapshot(&[(792, "000102")]);
        assert!(snap.read(792, 0..3).is_err());
    }

    #[test]
    fn test_encode_one_byte() {
        assert_eq!(encode_le_hex(7, HexWidth::OneByte), "07");
        assert_eq!(encode_le_hex(0xAB, HexWidth::OneByte), "AB");
    }

    #[test]
    fn test_encode_two_bytes_little_endian() {
        assert_eq!(encode_le_hex(1000, HexWidth::TwoBytes), "E803");
        assert_eq!(encode_le_hex(0x1234, HexWidth::TwoBytes), "3412");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = encode_le_hex(2500, HexWidth::TwoBytes);
        assert_eq!(decode_le_hex(&payload, 75, 0..4).unwrap(), 2500);
    }
}
