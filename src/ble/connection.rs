//! Connection state and connect options.
//!
//! A [`ConnectedPeripheral`](crate::ConnectedPeripheral) moves through
//! `Connecting -> Connected -> Disconnecting -> Disconnected`, or
//! `Connecting -> Disconnected` when the connection attempt fails. Only adapter
//! callbacks move a session forward; commands only ever move it into a
//! transitional state.

/// Connection state for a remote peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the peripheral.
    #[default]
    Disconnected,
    /// A connect command has been issued and has not completed yet.
    Connecting,
    /// Connected to the peripheral.
    Connected,
    /// A cancel command has been issued and has not completed yet.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection exists or is being established.
    ///
    /// A new connection attempt is refused while this is true.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Check if the link is gone or going away.
    pub fn is_closing_or_closed(&self) -> bool {
        matches!(self, Self::Disconnecting | Self::Disconnected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Options passed to the adapter with every connect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectOptions {
    /// Ask the stack to alert on connection while the app is suspended.
    pub notify_on_connection: bool,
    /// Ask the stack to alert on disconnection while the app is suspended.
    pub notify_on_disconnection: bool,
    /// Ask the stack to alert on notifications while the app is suspended.
    pub notify_on_notification: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            notify_on_connection: true,
            notify_on_disconnection: true,
            notify_on_notification: true,
        }
    }
}
