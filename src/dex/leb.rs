// LEB128 codecs used throughout the class data, debug info and hidden api streams.
// Decoders return None for a truncated stream or a value that does not fit 32 bits.

pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::with_capacity(uleb128_size(value));
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);

        if remaining == 0 {
            break;
        }
    }

    result
}

pub(crate) fn decode_uleb128(encoded: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        let low = (byte & 0x7F) as u32;
        if count == 4 && low > 0x0F {
            // fifth byte may only carry the top 4 bits
            return None;
        }
        value |= low << (7 * count as u32);

        if (byte & 0x80) == 0 {
            return Some((value, count + 1));
        }
        if count == 4 {
            return None;
        }
    }

    None
}

/// Number of bytes `encode_uleb128(value)` produces.
pub(crate) fn uleb128_size(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

pub(crate) fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Option<(i32, usize)> {
    let mut value: i32 = 0;
    let mut shift: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        value |= ((byte & 0x7F) as i32).wrapping_shl(shift);
        shift += 7;

        if (byte & 0x80) == 0 {
            if (byte & 0x40) != 0 && shift < 32 {
                value |= (-1i32).wrapping_shl(shift);
            }
            return Some((value, count + 1));
        }
        if count == 4 {
            return None;
        }
    }

    None
}

pub(crate) fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128(value.wrapping_add(1) as u32)
}

pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Option<(i32, usize)> {
    decode_uleb128(encoded).map(|(v, c)| ((v as i32).wrapping_sub(1), c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (u32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            assert_eq!(uleb128_size(value), expected.len());
            assert_eq!(encode_uleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], 127),
            (vec![0x80, 0x01], 128),
            (vec![0x80, 0x7F], 16256),
            (vec![0xE5, 0x8E, 0x26, 0xAA], 624485),
        ];

        for (encoded, expected) in cases {
            let (v, _) = decode_uleb128(&encoded).expect("valid uleb128");
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn test_decode_uleb128_rejects_overflow_and_truncation() {
        assert_eq!(decode_uleb128(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]), None);
        assert_eq!(decode_uleb128(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]), None);
        assert_eq!(decode_uleb128(&[0x80, 0x80]), None);
        assert_eq!(decode_uleb128(&[]), None);
    }

    #[test]
    fn test_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (127, vec![0xFF, 0x00]),
            (-128, vec![0x80, 0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
        ];

        for (value, encoded) in cases {
            assert_eq!(encode_sleb128(value), encoded);
            assert_eq!(decode_sleb128(&encoded), Some((value, encoded.len())));
        }
        assert_eq!(decode_sleb128(&encode_sleb128(i32::MIN)), Some((i32::MIN, 5)));
    }

    #[test]
    fn test_uleb128p1() {
        assert_eq!(encode_uleb128p1(-1), vec![0x00]);
        assert_eq!(decode_uleb128p1(&[0x00]), Some((-1, 1)));
        assert_eq!(decode_uleb128p1(&[0x05]), Some((4, 1)));
    }
}
