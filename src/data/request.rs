//! Request and response payloads.
//!
//! [`ReadRequest`] and [`WriteRequest`] are handed to the application when a
//! remote central touches a local characteristic. [`ResponseData`] is what a
//! remote peripheral sent back after a read or as a notification. All of them
//! expose their bytes through [`AttributeValue`].

use bytes::Bytes;
use uuid::Uuid;

use crate::utils::{decode_f64, decode_i64, decode_string};

/// Typed views over raw attribute bytes.
///
/// Decoding reinterprets the buffer without consulting any declared format.
/// Every view returns `None` when there is no value or it is too short.
pub trait AttributeValue {
    /// Get the raw bytes.
    fn value(&self) -> Option<&[u8]>;

    /// Decode the value as a UTF-8 string.
    fn string_value(&self) -> Option<String> {
        self.value().and_then(decode_string)
    }

    /// Decode the value as a native-endian `i64`.
    fn int_value(&self) -> Option<i64> {
        self.value().and_then(decode_i64)
    }

    /// Decode the value as a native-endian `f64`.
    fn double_value(&self) -> Option<f64> {
        self.value().and_then(decode_f64)
    }
}

/// A read request for a local characteristic.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    /// Service containing the characteristic.
    pub service_id: Uuid,
    /// The characteristic being read.
    pub characteristic_id: Uuid,
    /// Value the characteristic currently holds.
    pub current_value: Option<Bytes>,
    /// Offset requested by the central.
    pub offset: u16,
}

impl AttributeValue for ReadRequest {
    fn value(&self) -> Option<&[u8]> {
        self.current_value.as_deref()
    }
}

/// A write request for a local characteristic.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Service containing the characteristic.
    pub service_id: Uuid,
    /// The characteristic being written.
    pub characteristic_id: Uuid,
    /// Bytes sent by the central.
    pub value: Option<Bytes>,
    /// Offset requested by the central.
    pub offset: u16,
}

impl AttributeValue for WriteRequest {
    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

/// Either kind of incoming request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    /// A read request.
    Read(ReadRequest),
    /// A write request.
    Write(WriteRequest),
}

impl RequestData {
    /// Get the service identifier.
    pub fn service_id(&self) -> Uuid {
        match self {
            Self::Read(request) => request.service_id,
            Self::Write(request) => request.service_id,
        }
    }

    /// Get the characteristic identifier.
    pub fn characteristic_id(&self) -> Uuid {
        match self {
            Self::Read(request) => request.characteristic_id,
            Self::Write(request) => request.characteristic_id,
        }
    }

    /// Check if this is a write request.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

impl AttributeValue for RequestData {
    fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Read(request) => request.value(),
            Self::Write(request) => request.value(),
        }
    }
}

/// A value received from a remote peripheral.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseData {
    /// Service published by the remote peripheral.
    pub service_id: Uuid,
    /// Characteristic within that service.
    pub characteristic_id: Uuid,
    /// Received bytes.
    pub payload: Option<Bytes>,
}

impl ResponseData {
    /// Create response data.
    pub fn new(service_id: Uuid, characteristic_id: Uuid, payload: Option<Bytes>) -> Self {
        Self {
            service_id,
            characteristic_id,
            payload,
        }
    }
}

impl AttributeValue for ResponseData {
    fn value(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::from_short;
    use proptest::prelude::*;

    fn write_request(value: Option<Bytes>) -> WriteRequest {
        WriteRequest {
            service_id: from_short(0xFFF0),
            characteristic_id: from_short(0xFFF1),
            value,
            offset: 0,
        }
    }

    #[test]
    fn test_missing_value_decodes_to_none() {
        let request = write_request(None);
        assert_eq!(request.string_value(), None);
        assert_eq!(request.int_value(), None);
        assert_eq!(request.double_value(), None);
    }

    #[test]
    fn test_undersized_numeric_decode_fails() {
        let response = ResponseData::new(
            from_short(0xFFF0),
            from_short(0xFFF1),
            Some(Bytes::from_static(&[1, 2, 3, 4])),
        );
        assert_eq!(response.int_value(), None);
        assert_eq!(response.double_value(), None);
        assert!(response.string_value().is_some());
    }

    #[test]
    fn test_request_data_accessors() {
        let read = RequestData::Read(ReadRequest {
            service_id: from_short(0xFFF0),
            characteristic_id: from_short(0xFFF2),
            current_value: Some(Bytes::from_static(b"cached")),
            offset: 0,
        });
        assert!(!read.is_write());
        assert_eq!(read.characteristic_id(), from_short(0xFFF2));
        assert_eq!(read.string_value().as_deref(), Some("cached"));

        let write = RequestData::Write(write_request(Some(Bytes::from_static(b"new"))));
        assert!(write.is_write());
        assert_eq!(write.service_id(), from_short(0xFFF0));
        assert_eq!(write.value(), Some(&b"new"[..]));
    }

    proptest! {
        #[test]
        fn string_payload_roundtrip(text in ".*") {
            let request = write_request(Some(Bytes::from(text.clone().into_bytes())));
            prop_assert_eq!(request.string_value(), Some(text));
        }

        #[test]
        fn int_payload_roundtrip(number in any::<i64>()) {
            let request = write_request(Some(Bytes::copy_from_slice(&number.to_ne_bytes())));
            prop_assert_eq!(request.int_value(), Some(number));
        }

        #[test]
        fn double_payload_roundtrip(number in any::<f64>()) {
            let response = ResponseData::new(
                from_short(0xFFF0),
                from_short(0xFFF1),
                Some(Bytes::copy_from_slice(&number.to_ne_bytes())),
            );
            prop_assert_eq!(response.double_value().map(f64::to_bits), Some(number.to_bits()));
        }
    }
}
