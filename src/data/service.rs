//! Local GATT service definitions published in the Peripheral role.

use bytes::Bytes;
use uuid::Uuid;

/// What a remote central may do with a local characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicAccess {
    /// Readable only.
    ReadOnly,
    /// Writable only.
    WriteOnly,
    /// Readable and writable.
    ReadWrite,
}

/// A characteristic in a local service.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCharacteristic {
    /// Characteristic UUID.
    pub id: Uuid,
    /// Read/write capabilities.
    pub access: CharacteristicAccess,
    /// Value currently held, if any.
    pub value: Option<Bytes>,
}

impl LocalCharacteristic {
    /// Create a characteristic with no initial value.
    pub fn new(id: Uuid, access: CharacteristicAccess) -> Self {
        Self {
            id,
            access,
            value: None,
        }
    }
}

/// A primary service with its characteristics in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalService {
    /// Service UUID.
    pub id: Uuid,
    /// Characteristics, unique by UUID.
    pub characteristics: Vec<LocalCharacteristic>,
}

impl LocalService {
    /// Create a service with no characteristics.
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            characteristics: Vec::new(),
        }
    }

    /// Find a characteristic by UUID.
    pub fn characteristic(&self, id: &Uuid) -> Option<&LocalCharacteristic> {
        self.characteristics.iter().find(|c| c.id == *id)
    }

    /// Find a characteristic by UUID for mutation.
    pub fn characteristic_mut(&mut self, id: &Uuid) -> Option<&mut LocalCharacteristic> {
        self.characteristics.iter_mut().find(|c| c.id == *id)
    }

    /// Check if a characteristic with this UUID exists.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.characteristic(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::from_short;

    #[test]
    fn test_characteristic_lookup() {
        let mut service = LocalService::new(from_short(0xFFF0));
        service.characteristics.push(LocalCharacteristic::new(
            from_short(0xFFF1),
            CharacteristicAccess::ReadWrite,
        ));

        assert!(service.contains(&from_short(0xFFF1)));
        assert!(!service.contains(&from_short(0xFFF2)));

        service.characteristic_mut(&from_short(0xFFF1)).unwrap().value =
            Some(Bytes::from_static(b"v"));
        assert_eq!(
            service.characteristic(&from_short(0xFFF1)).unwrap().value,
            Some(Bytes::from_static(b"v"))
        );
    }
}
