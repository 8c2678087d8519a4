use pnet_datalink::NetworkInterface;

use crate::{error::ConfigError, surface::SurfaceKind};

/// Settings of `kac-net run` after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub surface: SurfaceKind,
    pub interfaces: Vec<String>,
    pub trace_drops: bool,
}

impl DaemonConfig {
    /// Resolves the interface selection against the host's interfaces.
    pub fn resolve(
        surface: SurfaceKind,
        requested: &[String],
        trace_drops: bool,
    ) -> Result<Self, ConfigError> {
        let available = host_interfaces(&pnet_datalink::interfaces());
        Ok(Self {
            surface,
            interfaces: select_interfaces(requested, &available)?,
            trace_drops,
        })
    }
}

/// Names of every interface of the host, loopback included. Links that are
/// down get hooked too: clsact attaches to them fine, and a link brought up
/// later must not carry traffic past the switch.
pub fn host_interfaces(all: &[NetworkInterface]) -> Vec<String> {
    all.iter().map(|iface| iface.name.clone()).collect()
}

/// An empty request means every available interface.
pub fn select_interfaces(
    requested: &[String],
    available: &[String],
) -> Result<Vec<String>, ConfigError> {
    if requested.is_empty() {
        if available.is_empty() {
            return Err(ConfigError::NoInterfaces);
        }
        return Ok(available.to_vec());
    }

    let mut selected: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        if !available.contains(name) {
            return Err(ConfigError::UnknownInterface(name.clone()));
        }
        if !selected.contains(name) {
            selected.push(name.clone());
        }
    }
    Ok(selected)
}
