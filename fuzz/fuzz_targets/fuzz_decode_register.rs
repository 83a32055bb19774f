#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Interpret the input as an arbitrary register value string
    let Ok(hex) = std::str::from_utf8(data) else {
        return;
    };

    // Exercise the decoder under varying ranges
    let len = hex.len();
    let _ = naiad::registers::decode_le_hex(hex, 790, 0..len.min(16));
    let _ = naiad::registers::decode_le_hex(hex, 8, 0..8);
    if len >= 4 {
        let _ = naiad::registers::decode_le_hex(hex, 791, 2..4);
    }
});
