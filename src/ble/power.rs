//! Radio power state.

/// Power state as reported by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterState {
    /// The stack has not reported a state yet, or reported one it cannot name.
    #[default]
    Unknown,
    /// The connection to the system Bluetooth service was lost and is being re-established.
    Resetting,
    /// The platform has no Bluetooth Low Energy support.
    Unsupported,
    /// The application is not allowed to use Bluetooth Low Energy.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Bluetooth is on and available.
    PoweredOn,
}

/// Power state as delivered to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BluetoothState {
    /// Bluetooth is on and available.
    PoweredOn,
    /// Bluetooth is switched off.
    PoweredOff,
    /// The Bluetooth service is resetting.
    Resetting,
    /// Bluetooth Low Energy is not supported.
    Unsupported,
    /// Bluetooth Low Energy use is not authorized.
    Unauthorized,
    /// The stack is in an unknown or unrecognised state.
    ServiceError,
}

impl BluetoothState {
    /// Check if the radio can be used.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl From<AdapterState> for BluetoothState {
    fn from(state: AdapterState) -> Self {
        match state {
            AdapterState::PoweredOn => Self::PoweredOn,
            AdapterState::PoweredOff => Self::PoweredOff,
            AdapterState::Resetting => Self::Resetting,
            AdapterState::Unsupported => Self::Unsupported,
            AdapterState::Unauthorized => Self::Unauthorized,
            AdapterState::Unknown => Self::ServiceError,
        }
    }
}

impl std::fmt::Display for BluetoothState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PoweredOn => write!(f, "Powered on"),
            Self::PoweredOff => write!(f, "Powered off"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::ServiceError => write!(f, "Service error"),
        }
    }
}
