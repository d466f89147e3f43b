//! Utility functions for decoding attribute values.
//!
//! Attribute payloads carry no type information. Both ends have to agree on
//! the layout; these helpers only refuse buffers that are too short.

/// Decode bytes as a UTF-8 string.
///
/// # Arguments
///
/// * `data` - Raw attribute bytes
///
/// # Returns
///
/// The string, or `None` if the bytes are not valid UTF-8.
///
/// # Example
///
/// ```
/// use ble_orchestra::utils::decode_string;
///
/// assert_eq!(decode_string(b"hello").as_deref(), Some("hello"));
/// assert_eq!(decode_string(&[0xFF, 0xFE]), None);
/// ```
pub fn decode_string(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(str::to_owned)
}

/// Decode the first eight bytes as a native-endian `i64`.
///
/// # Arguments
///
/// * `data` - Raw attribute bytes
///
/// # Returns
///
/// The integer, or `None` if fewer than eight bytes are present.
///
/// # Example
///
/// ```
/// use ble_orchestra::utils::decode_i64;
///
/// assert_eq!(decode_i64(&42i64.to_ne_bytes()), Some(42));
/// assert_eq!(decode_i64(&[1, 2, 3]), None);
/// ```
pub fn decode_i64(data: &[u8]) -> Option<i64> {
    first_eight(data).map(i64::from_ne_bytes)
}

/// Decode the first eight bytes as a native-endian `f64`.
///
/// # Arguments
///
/// * `data` - Raw attribute bytes
///
/// # Returns
///
/// The floating point value, or `None` if fewer than eight bytes are present.
///
/// # Example
///
/// ```
/// use ble_orchestra::utils::decode_f64;
///
/// assert_eq!(decode_f64(&1.5f64.to_ne_bytes()), Some(1.5));
/// ```
pub fn decode_f64(data: &[u8]) -> Option<f64> {
    first_eight(data).map(f64::from_ne_bytes)
}

#[inline]
fn first_eight(data: &[u8]) -> Option<[u8; 8]> {
    data.get(..8)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_string() {
        assert_eq!(decode_string("héllo".as_bytes()).as_deref(), Some("héllo"));
        assert_eq!(decode_string(b"").as_deref(), Some(""));
        assert_eq!(decode_string(&[0xC3]), None);
    }

    #[test]
    fn test_decode_i64_reads_prefix() {
        let mut data = (-7i64).to_ne_bytes().to_vec();
        data.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode_i64(&data), Some(-7));
    }

    #[test]
    fn test_short_buffers_fail() {
        assert_eq!(decode_i64(&[0; 7]), None);
        assert_eq!(decode_f64(&[]), None);
    }

    #[test]
    fn test_decode_f64_bit_exact() {
        let value = f64::from_bits(0x7FF0_0000_0000_0001);
        let decoded = decode_f64(&value.to_ne_bytes()).unwrap();
        assert_eq!(decoded.to_bits(), value.to_bits());
    }
}
