use std::fmt;

use crate::error::{CaptureError, ConfigError};

/// Prefix Docker uses for the host-side interface of a bridge network.
const BRIDGE_PREFIX: &str = "br-";
const SHORT_ID_LEN: usize = 12;
const FULL_ID_LEN: usize = 64;

/// ID of the Docker network to capture, either the full 64-character ID or
/// its 12-character truncation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkId(String);

impl NetworkId {
    /// Validates a raw network ID, typically read from the environment.
    pub fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        let raw = match raw {
            Some(s) if !s.is_empty() => s,
            _ => return Err(ConfigError::MissingNetworkId),
        };
        let len = raw.chars().count();
        if len != SHORT_ID_LEN && len != FULL_ID_LEN {
            return Err(ConfigError::InvalidNetworkId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host interface of the bridge network: `br-` followed by the short ID.
    pub fn interface_name(&self) -> InterfaceName {
        let short: String = self.0.chars().take(SHORT_ID_LEN).collect();
        InterfaceName(format!("{BRIDGE_PREFIX}{short}"))
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a host network interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterfaceName(String);

impl InterfaceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks that `interface` is one of the `available` interfaces, ignoring case.
pub fn assert_interface_exists(
    interface: &InterfaceName,
    available: &[String],
) -> Result<(), CaptureError> {
    let wanted = interface.as_str().to_lowercase();
    let available: Vec<String> = available.iter().map(|i| i.to_lowercase()).collect();
    if available.contains(&wanted) {
        return Ok(());
    }
    Err(CaptureError::InterfaceNotFound {
        interface: interface.to_string(),
        available,
    })
}
