//! Response codes for incoming ATT requests.
//!
//! The application answers a read or write request with a [`ResponseCode`];
//! the peripheral orchestrator converts it into the [`AttErrorCode`] the
//! radio stack sends back to the remote central.

/// ATT protocol error codes (Bluetooth Core, Vol 3, Part F, 3.4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AttErrorCode {
    /// The request completed successfully.
    Success = 0x00,
    /// The attribute handle was not valid on this server.
    InvalidHandle = 0x01,
    /// The attribute cannot be read.
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    WriteNotPermitted = 0x03,
    /// The attribute PDU was invalid.
    InvalidPdu = 0x04,
    /// The attribute requires authentication before it can be read or written.
    InsufficientAuthentication = 0x05,
    /// The server does not support the request.
    RequestNotSupported = 0x06,
    /// The offset was past the end of the attribute.
    InvalidOffset = 0x07,
    /// The attribute requires authorization before it can be read or written.
    InsufficientAuthorization = 0x08,
    /// Too many prepare writes have been queued.
    PrepareQueueFull = 0x09,
    /// No attribute found within the given handle range.
    AttributeNotFound = 0x0A,
    /// The attribute cannot be read using a blob request.
    AttributeNotLong = 0x0B,
    /// The encryption key size is insufficient.
    InsufficientEncryptionKeySize = 0x0C,
    /// The attribute value length is invalid for the operation.
    InvalidAttributeValueLength = 0x0D,
    /// The request hit an unlikely error.
    UnlikelyError = 0x0E,
    /// The attribute requires encryption before it can be read or written.
    InsufficientEncryption = 0x0F,
    /// The attribute type is not a supported grouping attribute.
    UnsupportedGroupType = 0x10,
    /// Insufficient resources to complete the request.
    InsufficientResources = 0x11,
}

impl AttErrorCode {
    /// Get the raw protocol value.
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Create from a raw protocol value.
    ///
    /// Returns `None` for values outside the core error range.
    pub fn from_u8(value: u8) -> Option<Self> {
        let code = match value {
            0x00 => Self::Success,
            0x01 => Self::InvalidHandle,
            0x02 => Self::ReadNotPermitted,
            0x03 => Self::WriteNotPermitted,
            0x04 => Self::InvalidPdu,
            0x05 => Self::InsufficientAuthentication,
            0x06 => Self::RequestNotSupported,
            0x07 => Self::InvalidOffset,
            0x08 => Self::InsufficientAuthorization,
            0x09 => Self::PrepareQueueFull,
            0x0A => Self::AttributeNotFound,
            0x0B => Self::AttributeNotLong,
            0x0C => Self::InsufficientEncryptionKeySize,
            0x0D => Self::InvalidAttributeValueLength,
            0x0E => Self::UnlikelyError,
            0x0F => Self::InsufficientEncryption,
            0x10 => Self::UnsupportedGroupType,
            0x11 => Self::InsufficientResources,
            _ => return None,
        };
        Some(code)
    }

    /// Check if this code reports success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.as_u8())
    }
}

/// Application-level outcome of an incoming read or write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResponseCode {
    /// The request completed successfully.
    #[default]
    Success,
    /// The attribute handle is invalid.
    InvalidHandle,
    /// Reading the attribute value is not permitted.
    ReadNotPermitted,
    /// Writing the attribute value is not permitted.
    WriteNotPermitted,
    /// The protocol data unit is invalid.
    InvalidPdu,
    /// Authentication is required.
    InsufficientAuthentication,
    /// The request is not supported.
    RequestNotSupported,
    /// The offset is past the end of the value.
    InvalidOffset,
    /// Authorization is required.
    InsufficientAuthorization,
    /// Too many queued writes.
    PrepareQueueFull,
    /// No attribute in the requested range.
    AttributeNotFound,
    /// The attribute cannot be read with a blob request.
    AttributeNotLong,
    /// The encryption key is too short.
    InsufficientEncryptionKeySize,
    /// The value length is invalid for the operation.
    InvalidAttributeValueLength,
    /// An unlikely error occurred.
    UnlikelyError,
    /// Encryption is required.
    InsufficientEncryption,
    /// Unsupported grouping attribute type.
    UnsupportedGroupType,
    /// Not enough resources to complete the request.
    InsufficientResources,
}

impl ResponseCode {
    /// Every response code, in declaration order.
    pub const ALL: [ResponseCode; 18] = [
        Self::Success,
        Self::InvalidHandle,
        Self::ReadNotPermitted,
        Self::WriteNotPermitted,
        Self::InvalidPdu,
        Self::InsufficientAuthentication,
        Self::RequestNotSupported,
        Self::InvalidOffset,
        Self::InsufficientAuthorization,
        Self::PrepareQueueFull,
        Self::AttributeNotFound,
        Self::AttributeNotLong,
        Self::InsufficientEncryptionKeySize,
        Self::InvalidAttributeValueLength,
        Self::UnlikelyError,
        Self::InsufficientEncryption,
        Self::UnsupportedGroupType,
        Self::InsufficientResources,
    ];

    /// Convert to the ATT error code sent to the remote central.
    ///
    /// `ReadNotPermitted` and `WriteNotPermitted` are answered with
    /// `InvalidHandle`.
    pub fn to_att_error(&self) -> AttErrorCode {
        match self {
            Self::Success => AttErrorCode::Success,
            Self::InvalidHandle => AttErrorCode::InvalidHandle,
            Self::ReadNotPermitted => AttErrorCode::InvalidHandle,
            Self::WriteNotPermitted => AttErrorCode::InvalidHandle,
            Self::InvalidPdu => AttErrorCode::InvalidPdu,
            Self::InsufficientAuthentication => AttErrorCode::InsufficientAuthentication,
            Self::RequestNotSupported => AttErrorCode::RequestNotSupported,
            Self::InvalidOffset => AttErrorCode::InvalidOffset,
            Self::InsufficientAuthorization => AttErrorCode::InsufficientAuthorization,
            Self::PrepareQueueFull => AttErrorCode::PrepareQueueFull,
            Self::AttributeNotFound => AttErrorCode::AttributeNotFound,
            Self::AttributeNotLong => AttErrorCode::AttributeNotLong,
            Self::InsufficientEncryptionKeySize => AttErrorCode::InsufficientEncryptionKeySize,
            Self::InvalidAttributeValueLength => AttErrorCode::InvalidAttributeValueLength,
            Self::UnlikelyError => AttErrorCode::UnlikelyError,
            Self::InsufficientEncryption => AttErrorCode::InsufficientEncryption,
            Self::UnsupportedGroupType => AttErrorCode::UnsupportedGroupType,
            Self::InsufficientResources => AttErrorCode::InsufficientResources,
        }
    }
}

impl From<ResponseCode> for AttErrorCode {
    fn from(code: ResponseCode) -> Self {
        code.to_att_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_permission_codes_map_to_invalid_handle() {
        assert_eq!(
            ResponseCode::ReadNotPermitted.to_att_error(),
            AttErrorCode::InvalidHandle
        );
        assert_eq!(
            ResponseCode::WriteNotPermitted.to_att_error(),
            AttErrorCode::InvalidHandle
        );
    }

    #[test]
    fn test_success_maps_to_zero() {
        let code: AttErrorCode = ResponseCode::Success.into();
        assert_eq!(code.as_u8(), 0x00);
        assert!(code.is_success());
    }

    #[test]
    fn test_numeric_values() {
        assert_eq!(ResponseCode::AttributeNotFound.to_att_error().as_u8(), 0x0A);
        assert_eq!(ResponseCode::InsufficientResources.to_att_error().as_u8(), 0x11);
        assert_eq!(ResponseCode::UnlikelyError.to_att_error().as_u8(), 0x0E);
    }

    #[test]
    fn test_att_error_code_raw_roundtrip() {
        for raw in 0x00..=0x11u8 {
            let code = AttErrorCode::from_u8(raw).unwrap();
            assert_eq!(code.as_u8(), raw);
        }
        assert_eq!(AttErrorCode::from_u8(0x12), None);
        assert_eq!(AttErrorCode::from_u8(0xFF), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AttErrorCode::AttributeNotFound.to_string(),
            "AttributeNotFound (0x0A)"
        );
    }

    proptest! {
        #[test]
        fn mapping_is_total_and_pure(index in 0usize..ResponseCode::ALL.len()) {
            let code = ResponseCode::ALL[index];
            let first = code.to_att_error();
            let second = code.to_att_error();
            prop_assert_eq!(first, second);
            prop_assert!(AttErrorCode::from_u8(first.as_u8()).is_some());
        }
    }
}
