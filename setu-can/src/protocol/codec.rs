//! SLCAN ASCII frame codec
//!
//! Data frame grammar: `t<3 hex id><1 hex dlc><2*dlc hex bytes>`
//!
//! Only standard 11-bit data frames are produced. Decoding accepts a leading
//! `t` or `T` and ignores anything after the declared payload.

use crate::core::types::{CanFrame, MAX_DLC, MAX_STANDARD_ID};
use crate::error::{Error, Result};
use std::fmt::Write;

/// Header length: marker + 3 id digits + 1 DLC digit
const HEADER_LEN: usize = 5;

/// Encode a frame into an SLCAN line (without terminator).
///
/// The DLC is `min(8, data.len())`; extra bytes are ignored.
pub fn encode_frame(id: u16, data: &[u8]) -> Result<String> {
    if id > MAX_STANDARD_ID {
        return Err(Error::InvalidCanId(id as u32));
    }
    let dlc = data.len().min(MAX_DLC);
    let mut line = String::with_capacity(HEADER_LEN + dlc * 2);
    // Writing into a String cannot fail
    let _ = write!(line, "t{:03X}{:X}", id, dlc);
    for byte in &data[..dlc] {
        let _ = write!(line, "{:02X}", byte);
    }
    Ok(line)
}

/// Parse an SLCAN data frame line.
///
/// Returns `None` for anything malformed; the receive path drops those
/// silently since garbled lines are expected on a noisy link.
pub fn decode_frame(line: &str) -> Option<CanFrame> {
    let bytes = line.as_bytes();
    if bytes.len() < HEADER_LEN || !matches!(bytes[0], b't' | b'T') {
        return None;
    }

    let id = parse_hex(&bytes[1..4])?;
    let dlc = parse_hex(&bytes[4..5])? as usize;
    if dlc > MAX_DLC {
        return None;
    }
    if bytes.len() < HEADER_LEN + dlc * 2 {
        return None;
    }

    let mut data = Vec::with_capacity(dlc);
    for i in 0..dlc {
        let offset = HEADER_LEN + i * 2;
        data.push(parse_hex(&bytes[offset..offset + 2])? as u8);
    }

    CanFrame::new(id, &data)
}

/// Find the first decodable frame marker at any offset in a line.
///
/// Adapters occasionally prefix frames with ack residue (`zt123...`).
pub fn find_frame(line: &str) -> Option<CanFrame> {
    line.char_indices()
        .filter(|(_, c)| matches!(c, 't' | 'T'))
        .find_map(|(offset, _)| decode_frame(&line[offset..]))
}

/// Parse a CAN id written as `0x510`, `0X510` or `510`
pub fn parse_can_id(text: &str) -> Result<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 3 {
        return Err(Error::ConfigValidation(format!("invalid CAN id '{}'", text)));
    }
    let id = parse_hex(digits.as_bytes())
        .ok_or_else(|| Error::ConfigValidation(format!("invalid CAN id '{}'", text)))?;
    if id > MAX_STANDARD_ID {
        return Err(Error::InvalidCanId(id as u32));
    }
    Ok(id)
}

/// Strict hex parse: ASCII hex digits only (no sign, no whitespace)
fn parse_hex(digits: &[u8]) -> Option<u16> {
    if digits.is_empty() || digits.len() > 4 {
        return None;
    }
    digits.iter().try_fold(0u16, |acc, &c| {
        let nibble = (c as char).to_digit(16)?;
        Some((acc << 4) | nibble as u16)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_status_frame() {
        let line = encode_frame(0x510, &[0x01, 0x91, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(line, "t51080191000000000000");
    }

    #[test]
    fn test_encode_pads_id_and_truncates() {
        assert_eq!(encode_frame(0x5, &[]).unwrap(), "t0050");
        let line = encode_frame(0x7FF, &[0xAB; 10]).unwrap();
        assert_eq!(line, "t7FF8ABABABABABABABAB");
    }

    #[test]
    fn test_encode_rejects_extended_id() {
        assert!(matches!(
            encode_frame(0x800, &[]),
            Err(Error::InvalidCanId(0x800))
        ));
    }

    #[test]
    fn test_round_trip_every_id() {
        for id in 0..=MAX_STANDARD_ID {
            let len = (id as usize) % 9;
            let data: Vec<u8> = (0..len).map(|i| (id as usize * 7 + i * 31) as u8).collect();
            let line = encode_frame(id, &data).unwrap();
            let frame = decode_frame(&line).unwrap();
            assert_eq!(frame.id, id);
            assert_eq!(frame.data, data);
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode_frame("").is_none());
        assert!(decode_frame("r1230").is_none());
        assert!(decode_frame("x5203010823").is_none());
        assert!(decode_frame("t520").is_none());
        // DLC above 8
        assert!(decode_frame("t5209010203040506070809").is_none());
        // Non-hex DLC
        assert!(decode_frame("t52G3010823").is_none());
        assert!(decode_frame("t520Z010823").is_none());
        // Shorter than declared
        assert!(decode_frame("t520301082").is_none());
        // Signs are not hex digits
        assert!(decode_frame("t+203010823").is_none());
        // Multi-byte characters never panic
        assert!(decode_frame("t5é03010823").is_none());
    }

    #[test]
    fn test_decode_upper_marker_and_trailing_data() {
        let frame = decode_frame("T52030108231234").unwrap();
        assert_eq!(frame.id, 0x520);
        assert_eq!(frame.data, vec![0x01, 0x08, 0x23]);
    }

    #[test]
    fn test_find_frame_at_offset() {
        let frame = find_frame("zzt5203010823").unwrap();
        assert_eq!(frame.id, 0x520);
        assert!(find_frame("OK").is_none());
        // A stray 't' before the real frame is skipped
        let frame = find_frame("xtt1001AA").unwrap();
        assert_eq!(frame.id, 0x100);
        assert_eq!(frame.data, vec![0xAA]);
    }

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("0x520").unwrap(), 0x520);
        assert_eq!(parse_can_id("0X7ff").unwrap(), 0x7FF);
        assert_eq!(parse_can_id(" 510 ").unwrap(), 0x510);
        assert!(parse_can_id("0x800").is_err());
        assert!(parse_can_id("0x").is_err());
        assert!(parse_can_id("1234").is_err());
        assert!(parse_can_id("zz").is_err());
    }
}
