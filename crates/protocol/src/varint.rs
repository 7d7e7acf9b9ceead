//! Variable-length integer and delta-coded index primitives (§4.2).
//!
//! Both codecs are a direct reading of the wire layout `spec.md` describes:
//! a leading byte whose run of high set bits counts the little-endian
//! extension bytes that follow, and (for indices) a small-delta shortcut
//! against the last index seen on the same sign channel.

use crate::ProtocolError;

/// Number of carry bits the lead byte contributes for a given extension count.
/// `ext` 1-3 reserve a unary prefix of `ext` one-bits plus a zero terminator;
/// `ext == 4` uses every bit of the lead byte as prefix (no carry, the value
/// is carried in full by the four extension bytes).
fn carry_bits(ext: u32) -> u32 {
    match ext {
        1..=3 => 7 - ext,
        4 => 0,
        _ => unreachable!("ext out of range"),
    }
}

/// Smallest extension count whose carry bits plus extension bytes can hold `value`.
fn extension_len_for(value: u32) -> u32 {
    for ext in 1u32..=3 {
        let bits = carry_bits(ext) + 8 * ext;
        if value < (1u32 << bits) {
            return ext;
        }
    }
    4
}

/// Encodes a 32-bit integer using a unary-prefix leading byte: `ext` leading
/// one-bits (capped at 3) mark how many little-endian extension bytes
/// follow, a zero bit terminates the prefix, and any remaining low bits of
/// the lead byte carry the value's high bits. `ext == 4` is the escape case:
/// the lead byte is `0xf0` and the full value follows as 4 raw
/// little-endian bytes.
///
/// Values below `0x80` need no extension at all; the lead byte is the value.
#[must_use]
pub fn encode_varint32(value: i32) -> Vec<u8> {
    let value = value as u32;
    if value < 0x80 {
        return vec![value as u8];
    }

    let ext = extension_len_for(value);
    let le = value.to_le_bytes();
    let bits = carry_bits(ext);
    let carry = if bits == 0 {
        0
    } else {
        (value >> (8 * ext)) & ((1 << bits) - 1)
    };
    let prefix = (0xffu32 << (8 - ext)) & 0xff;
    let lead = (prefix | carry) as u8;

    let mut out = Vec::with_capacity(1 + ext as usize);
    out.push(lead);
    out.extend_from_slice(&le[..ext as usize]);
    out
}

/// Decodes a variable-length 32-bit integer given the lead byte and the
/// extension bytes that followed it (already read by the caller).
///
/// # Errors
///
/// Returns [`ProtocolError::FramingError`] if `ext_bytes.len()` does not
/// match the extension-byte count implied by `lead`.
pub fn decode_varint32(lead: u8, ext_bytes: &[u8]) -> Result<i32, ProtocolError> {
    let ext = varint32_extension_len(lead);
    if ext == 0 {
        if !ext_bytes.is_empty() {
            return Err(ProtocolError::FramingError {
                reason: "unexpected extension bytes for single-byte varint32".into(),
            });
        }
        return Ok(i32::from(lead));
    }
    if ext_bytes.len() != ext as usize {
        return Err(ProtocolError::FramingError {
            reason: format!(
                "varint32 extension count mismatch: lead implies {ext} bytes, got {}",
                ext_bytes.len()
            ),
        });
    }

    let bits = carry_bits(ext);
    let carry = if bits == 0 {
        0
    } else {
        u32::from(lead) & ((1u32 << bits) - 1)
    };

    let mut value = carry << (8 * ext);
    for (i, &b) in ext_bytes.iter().enumerate() {
        value |= u32::from(b) << (8 * i as u32);
    }
    Ok(value as i32)
}

/// Number of extension bytes implied by a varint32 lead byte (0-4).
#[must_use]
pub fn varint32_extension_len(lead: u8) -> u32 {
    if lead < 0x80 {
        return 0;
    }
    if lead == 0xf0 {
        return 4;
    }
    lead.leading_ones().min(3)
}

/// Number of extension bytes (beyond `min_bytes`) implied by a varint64
/// lead byte, capped at 6; `7` signals the fixed 9-byte escape form.
#[must_use]
pub fn varint64_extension_len(lead: u8) -> u32 {
    if lead == 0xff {
        return 7;
    }
    lead.leading_ones().min(6)
}

fn varint64_carry_bits(ext: u32) -> u32 {
    if ext == 0 {
        7
    } else {
        7 - ext
    }
}

/// Encodes a 64-bit integer with at least `min_bytes` little-endian data
/// bytes, using the same unary-prefix-plus-terminator scheme as
/// [`encode_varint32`] generalized to 64 bits: the lead byte doubles as the
/// first data byte, its top bits forming an extension-count marker. Values
/// too large for any `ext <= 6` fall back to a fixed 9-byte escape (lead
/// byte `0xff` followed by the full 8-byte value).
///
/// # Panics
///
/// Panics if `min_bytes` is 0 or greater than 8.
#[must_use]
pub fn encode_varint64(value: i64, min_bytes: u8) -> Vec<u8> {
    assert!((1..=8).contains(&min_bytes), "min_bytes must be in 1..=8");
    let v = value as u64;
    let min_bytes = u32::from(min_bytes);
    let max_ext = 8u32.saturating_sub(min_bytes).min(6);

    for ext in 0..=max_ext {
        let total_bytes = min_bytes + ext;
        let carry_bits = varint64_carry_bits(ext);
        let bits = carry_bits + 8 * (total_bytes - 1);
        if bits >= 64 || v < (1u64 << bits) {
            let carry = if carry_bits == 0 {
                0
            } else {
                (v >> (8 * (total_bytes - 1))) & ((1u64 << carry_bits) - 1)
            };
            let prefix: u8 = if ext == 0 {
                0
            } else {
                (0xffu32 << (8 - ext)) as u8
            };
            let lead = prefix | carry as u8;
            let le = v.to_le_bytes();
            let mut out = Vec::with_capacity(total_bytes as usize);
            out.push(lead);
            out.extend_from_slice(&le[..(total_bytes - 1) as usize]);
            return out;
        }
    }

    let mut out = Vec::with_capacity(9);
    out.push(0xff);
    out.extend_from_slice(&v.to_le_bytes());
    out
}

/// Decodes a varint64 given its already-read lead byte, the configured
/// `min_bytes` floor, and the remaining bytes that followed it.
///
/// # Errors
///
/// Returns [`ProtocolError::FramingError`] if `rest.len()` doesn't match
/// the length implied by `lead`.
pub fn decode_varint64(min_bytes: u8, lead: u8, rest: &[u8]) -> Result<i64, ProtocolError> {
    let ext = varint64_extension_len(lead);
    if ext == 7 {
        if rest.len() != 8 {
            return Err(ProtocolError::FramingError {
                reason: format!("varint64 escape form expected 8 trailing bytes, got {}", rest.len()),
            });
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(rest);
        return Ok(u64::from_le_bytes(buf) as i64);
    }

    let total_bytes = u32::from(min_bytes) + ext;
    if rest.len() != (total_bytes - 1) as usize {
        return Err(ProtocolError::FramingError {
            reason: format!(
                "varint64 length mismatch: lead implies {} trailing bytes, got {}",
                total_bytes - 1,
                rest.len()
            ),
        });
    }

    let carry_bits = varint64_carry_bits(ext);
    let carry = if carry_bits == 0 {
        0
    } else {
        u64::from(lead) & ((1u64 << carry_bits) - 1)
    };
    let mut value = carry << (8 * (total_bytes - 1));
    for (i, &b) in rest.iter().enumerate() {
        value |= u64::from(b) << (8 * i as u32);
    }
    Ok(value as i64)
}

/// Index sentinel meaning "no more indices to process" (`INDEX_DONE`).
pub const INDEX_DONE: i32 = -1;

/// Sentinel byte introducing a delta- or absolute-coded index.
const INDEX_DELTA_MARKER: u8 = 0xfe;

/// Tracks the last index seen on each sign channel so `encode`/`decode` can
/// apply the small-delta shortcut the wire format uses.
#[derive(Clone, Copy, Debug)]
pub struct IndexCursor {
    last_positive: i32,
    last_negative: i32,
}

impl Default for IndexCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexCursor {
    /// Creates a cursor with both channels at their initial "nothing seen yet" state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_positive: 0,
            last_negative: 0,
        }
    }

    /// Encodes `index` (or [`INDEX_DONE`]), updating internal state.
    pub fn encode(&mut self, index: i32) -> Vec<u8> {
        if index == INDEX_DONE {
            return vec![0];
        }

        let is_positive = index >= 0;
        let magnitude = index.unsigned_abs();
        let last = if is_positive {
            &mut self.last_positive
        } else {
            &mut self.last_negative
        };
        let last_magnitude = last.unsigned_abs();
        let delta = magnitude as i64 - last_magnitude as i64;
        *last = index;

        if (1..0x100).contains(&delta) {
            vec![INDEX_DELTA_MARKER, delta as u8]
        } else if (0x100..0x1_0000).contains(&delta) {
            let b = (delta as u16).to_le_bytes();
            vec![INDEX_DELTA_MARKER, 0x80, b[0], b[1]]
        } else {
            let b = magnitude.to_le_bytes();
            vec![INDEX_DELTA_MARKER, 0x80, 0x80, 0x80, b[0], b[1], b[2], b[3]]
        }
    }

    /// Decodes an index from its marker byte plus the raw payload bytes that
    /// followed it (the caller has already read the right number of bytes
    /// based on the marker; see [`Self::payload_len`]).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FramingError`] on a malformed payload length.
    pub fn decode(&mut self, marker: u8, sign_is_positive: bool, payload: &[u8]) -> Result<i32, ProtocolError> {
        if marker == 0 {
            return Ok(INDEX_DONE);
        }
        if marker != INDEX_DELTA_MARKER {
            return Err(ProtocolError::FramingError {
                reason: format!("unexpected index marker byte {marker:#04x}"),
            });
        }

        let last = if sign_is_positive {
            &mut self.last_positive
        } else {
            &mut self.last_negative
        };
        let last_magnitude = last.unsigned_abs();

        let magnitude = match payload {
            [delta] => last_magnitude as i64 + i64::from(*delta),
            [0x80, d0, d1] => last_magnitude as i64 + i64::from(u16::from_le_bytes([*d0, *d1])),
            [0x80, 0x80, 0x80, b0, b1, b2, b3] => {
                i64::from(u32::from_le_bytes([*b0, *b1, *b2, *b3]))
            }
            _ => {
                return Err(ProtocolError::FramingError {
                    reason: "malformed index delta payload".into(),
                })
            }
        };

        let magnitude = u32::try_from(magnitude).map_err(|_| ProtocolError::FramingError {
            reason: "index magnitude overflowed u32".into(),
        })?;
        let index = if sign_is_positive {
            magnitude as i32
        } else {
            -(magnitude as i32)
        };
        *last = index;
        Ok(index)
    }

    /// Number of payload bytes following `marker` that [`Self::decode`] needs,
    /// given the first payload byte already peeked (`None` if not yet known).
    #[must_use]
    pub fn payload_len(first_payload_byte: Option<u8>) -> usize {
        match first_payload_byte {
            None => 1,
            Some(0x80) => 3,
            Some(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint32_round_trips_small_values() {
        for value in [0i32, 1, 42, 127] {
            let bytes = encode_varint32(value);
            assert_eq!(bytes.len(), 1);
            let decoded = decode_varint32(bytes[0], &[]).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn varint32_round_trips_multi_byte_values() {
        for value in [128i32, 0xff, 0xffff, 0x00ff_ffff, 0x7fff_ffff] {
            let bytes = encode_varint32(value);
            let ext = varint32_extension_len(bytes[0]);
            let decoded = decode_varint32(bytes[0], &bytes[1..=ext as usize]).unwrap();
            assert_eq!(decoded, value, "roundtrip failed for {value:#x}");
        }
    }

    #[test]
    fn index_cursor_marks_terminator() {
        let mut cursor = IndexCursor::new();
        assert_eq!(cursor.encode(INDEX_DONE), vec![0]);
        assert_eq!(cursor.decode(0, true, &[]).unwrap(), INDEX_DONE);
    }

    #[test]
    fn index_cursor_round_trips_sequential_positive_indices() {
        let mut enc = IndexCursor::new();
        let mut dec = IndexCursor::new();
        for index in [0i32, 1, 2, 300, 70_000, 5] {
            let bytes = enc.encode(index);
            let marker = bytes[0];
            let decoded = dec.decode(marker, true, &bytes[1..]).unwrap();
            assert_eq!(decoded, index);
        }
    }

    #[test]
    fn index_cursor_round_trips_negative_indices_independently_of_positive() {
        let mut enc = IndexCursor::new();
        let mut dec = IndexCursor::new();
        for index in [-1i32, -5, 10, -2, 100] {
            if index == INDEX_DONE {
                continue;
            }
            let bytes = enc.encode(index);
            let marker = bytes[0];
            let decoded = dec.decode(marker, index >= 0, &bytes[1..]).unwrap();
            assert_eq!(decoded, index);
        }
    }

    proptest! {
        #[test]
        fn varint32_roundtrips_over_full_range(value in any::<i32>().prop_filter("non-negative", |v| *v >= 0)) {
            let bytes = encode_varint32(value);
            let ext = varint32_extension_len(bytes[0]);
            let decoded = decode_varint32(bytes[0], &bytes[1..=ext as usize]).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }

    fn varint64_round_trip(value: i64, min_bytes: u8) -> i64 {
        let bytes = encode_varint64(value, min_bytes);
        let ext = varint64_extension_len(bytes[0]);
        decode_varint64(min_bytes, bytes[0], &bytes[1..]).unwrap_or_else(|e| {
            panic!("decode failed for {value:#x} (min_bytes={min_bytes}, ext={ext}): {e}")
        })
    }

    #[test]
    fn varint64_round_trips_small_values_at_min_bytes_one() {
        for value in [0i64, 1, 42, 127] {
            let bytes = encode_varint64(value, 1);
            assert_eq!(bytes.len(), 1, "value {value:#x} should fit in the lead byte alone");
            assert_eq!(varint64_round_trip(value, 1), value);
        }
    }

    #[test]
    fn varint64_round_trips_multi_byte_values_at_min_bytes_three() {
        for value in [0i64, 1, 0xff, 0xffff, 0x00ff_ffff, 0xffff_ffff, 0x00ff_ffff_ffffi64] {
            assert_eq!(varint64_round_trip(value, 3), value, "roundtrip failed for {value:#x}");
        }
    }

    #[test]
    fn varint64_round_trips_multi_byte_values_at_min_bytes_four() {
        for value in [0i64, 1, 0xff, 0xffff, 0x7fff_ffffi64, i32::MAX as i64] {
            assert_eq!(varint64_round_trip(value, 4), value, "roundtrip failed for {value:#x}");
        }
    }

    #[test]
    fn varint64_falls_back_to_the_nine_byte_escape_for_values_too_large_for_extension_bytes() {
        let value = i64::MAX;
        let bytes = encode_varint64(value, 1);
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0xff);
        assert_eq!(varint64_extension_len(bytes[0]), 7);
        assert_eq!(varint64_round_trip(value, 1), value);
    }

    #[test]
    fn varint64_escape_form_round_trips_regardless_of_min_bytes() {
        for min_bytes in [1u8, 3, 4, 8] {
            let value = 0x00ff_ffff_ffff_ffffi64;
            assert_eq!(varint64_round_trip(value, min_bytes), value);
        }
    }

    proptest! {
        #[test]
        fn varint64_roundtrips_over_full_range_at_min_bytes_three(
            value in any::<i64>().prop_filter("non-negative", |v| *v >= 0)
        ) {
            prop_assert_eq!(varint64_round_trip(value, 3), value);
        }

        #[test]
        fn varint64_roundtrips_over_full_range_at_min_bytes_four(
            value in any::<i64>().prop_filter("non-negative", |v| *v >= 0)
        ) {
            prop_assert_eq!(varint64_round_trip(value, 4), value);
        }
    }
}
