//! Orchestrator configuration.

/// Configuration for [`CentralService`](crate::CentralService).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CentralConfig {
    /// Capacity of the central event broadcast channel.
    pub event_capacity: usize,
    /// Capacity of each session's event broadcast channel.
    pub session_event_capacity: usize,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            session_event_capacity: 64,
        }
    }
}

impl CentralConfig {
    /// Set the central event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the per-session event channel capacity.
    pub fn with_session_event_capacity(mut self, capacity: usize) -> Self {
        self.session_event_capacity = capacity.max(1);
        self
    }
}

/// What to do with a request for a characteristic that is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnresolvedRequestPolicy {
    /// Answer with `AttributeNotFound`.
    #[default]
    RespondAttributeNotFound,
    /// Send no answer; the remote central eventually times out.
    Ignore,
}

/// Configuration for [`PeripheralService`](crate::PeripheralService).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralConfig {
    /// Capacity of the peripheral event broadcast channel.
    pub event_capacity: usize,
    /// Local name advertised when neither the caller nor the delegate gives one.
    pub default_local_name: String,
    /// Handling of requests for unknown characteristics.
    pub unresolved_requests: UnresolvedRequestPolicy,
}

impl PeripheralConfig {
    /// Local name used when nothing else is configured.
    pub const DEFAULT_LOCAL_NAME: &'static str = "PeripheralDevice";

    /// Set the peripheral event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set the fallback advertised name.
    pub fn with_default_local_name(mut self, name: impl Into<String>) -> Self {
        self.default_local_name = name.into();
        self
    }

    /// Set the policy for requests targeting unknown characteristics.
    pub fn with_unresolved_requests(mut self, policy: UnresolvedRequestPolicy) -> Self {
        self.unresolved_requests = policy;
        self
    }
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            default_local_name: Self::DEFAULT_LOCAL_NAME.to_string(),
            unresolved_requests: UnresolvedRequestPolicy::default(),
        }
    }
}
