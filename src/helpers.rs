//! Small formatting and decoding helpers shared by the diagnostic code

use std::time::Duration;

/// Formats a list of bus addresses for logging, EG: `[0x500, 0x501]`
pub(crate) fn hex_addresses<'a, I: IntoIterator<Item = &'a u32>>(addrs: I) -> String {
    let list: Vec<String> = addrs.into_iter().map(|a| format!("0x{a:X}")).collect();
    format!("[{}]", list.join(", "))
}

/// Decodes the separation time byte of an ISO-TP flow control frame.
///
/// * 0x00-0x7F - Milliseconds
/// * 0xF1-0xF9 - 100-900 microseconds
/// * Anything else is reserved, and must be treated as the maximum (127ms)
pub(crate) fn st_min_to_duration(st_min: u8) -> Duration {
    match st_min {
        0x00..=0x7F => Duration::from_millis(st_min as u64),
        0xF1..=0xF9 => Duration::from_micros((st_min - 0xF0) as u64 * 100),
        _ => Duration::from_millis(0x7F),
    }
}
