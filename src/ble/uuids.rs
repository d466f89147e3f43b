//! Bluetooth UUID helpers and well-known service UUIDs.
//!
//! Identifiers cross the adapter boundary as [`Uuid`] values. Parsing is
//! case-insensitive, so two spellings of the same UUID always compare equal.

use uuid::Uuid;

use crate::error::{Error, Result};

/// The Bluetooth Base UUID (`00000000-0000-1000-8000-00805F9B34FB`).
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Battery Service UUID (`180F`).
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
/// Current Time Service UUID (`1805`).
pub const CURRENT_TIME_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1805_0000_1000_8000_00805f9b34fb);
/// Device Information Service UUID (`180A`).
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);

/// Expand a 16-bit assigned number onto the Bluetooth Base UUID.
pub const fn from_short(short: u16) -> Uuid {
    from_u32(short as u32)
}

/// Expand a 32-bit assigned number onto the Bluetooth Base UUID.
pub const fn from_u32(value: u32) -> Uuid {
    Uuid::from_u128(((value as u128) << 96) | BLUETOOTH_BASE_UUID.as_u128())
}

/// Parse a Bluetooth UUID string.
///
/// Accepts the full 128-bit form in any case, plus 16-bit (`"180F"`) and
/// 32-bit (`"0000180F"`) short forms which are expanded onto the Bluetooth
/// Base UUID.
///
/// # Errors
///
/// Returns [`Error::InvalidUuid`] if the string is none of these forms.
///
/// # Example
///
/// ```
/// use ble_orchestra::ble::uuids::{parse, BATTERY_SERVICE_UUID};
///
/// assert_eq!(parse("180f").unwrap(), BATTERY_SERVICE_UUID);
/// assert_eq!(parse("0000180F-0000-1000-8000-00805F9B34FB").unwrap(), BATTERY_SERVICE_UUID);
/// ```
pub fn parse(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    let invalid = || Error::InvalidUuid {
        value: value.to_string(),
    };

    match trimmed.len() {
        4 => u16::from_str_radix(trimmed, 16)
            .map(from_short)
            .map_err(|_| invalid()),
        8 => u32::from_str_radix(trimmed, 16)
            .map(from_u32)
            .map_err(|_| invalid()),
        _ => Uuid::parse_str(trimmed).map_err(|_| invalid()),
    }
}

/// Return the 16-bit assigned number if `uuid` sits on the Bluetooth Base UUID.
pub fn to_short(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let base_mask = (1u128 << 96) - 1;
    if value & base_mask != BLUETOOTH_BASE_UUID.as_u128() {
        return None;
    }
    u16::try_from(value >> 96).ok()
}
