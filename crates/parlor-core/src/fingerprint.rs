use serde::{Deserialize, Serialize};

/// Network/device descriptor reported by a connection. Captured once at
/// session creation as the session's fingerprint; later messages for that
/// session must arrive from a connection with a matching descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub ip_address: String,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl ConnectionContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            device: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Hijack guard: ip and user agent must both match. The device string is
    /// informational only (clients update it freely) and excluded from the
    /// check.
    pub fn matches(&self, other: &ConnectionContext) -> bool {
        self.ip_address == other.ip_address && self.user_agent == other.user_agent
    }
}
