//! # Interface Binder
//!
//! ## Purpose
//!
//! Takes an interface away from its kernel configuration for the lifetime of the router
//! and gives it back afterwards: records the driver, hardware address and first IP
//! address, rebinds the device to the selected driver and, on shutdown, rebinds the
//! original driver, brings the link up and reassigns the address.
//!
//! ## How it works
//!
//! All OS access goes through the `NetOps` capability trait. `prepare` and `restore`
//! only sequence the calls and decide which steps apply. Interfaces without a bus
//! device (veth, bridges) have nothing to rebind, so only their IP configuration is
//! recorded. The restore steps are independent: every failure is logged and collected
//! into a `RestoreError` while the remaining steps still run.
//!
//! ## Main components
//!
//! - `NetOps`: OS capability surface; `SysfsNetOps` on Linux, `UnsupportedNetOps`
//!   elsewhere, `PlatformNetOps` selects one at build time.
//! - `BindingInfo`: what `restore` needs to undo `prepare`.

#[cfg(feature = "sysfs")]
mod sysfs;
mod unsupported;

#[cfg(feature = "sysfs")]
pub use sysfs::SysfsNetOps;
pub use unsupported::UnsupportedNetOps;

/// The `NetOps` implementation used by default on this build.
#[cfg(feature = "sysfs")]
pub type PlatformNetOps = SysfsNetOps;
/// The `NetOps` implementation used by default on this build.
#[cfg(not(feature = "sysfs"))]
pub type PlatformNetOps = UnsupportedNetOps;

use std::io;

use ipnet::IpNet;

use crate::config::RouterConfig;
use crate::error::{RestoreError, RestoreStep, RouterError};

/// A network interface as seen by the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub if_index: u32,
    pub mac: Option<[u8; 6]>,
}

/// The bus device behind an interface and the driver it is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bus address, e.g. `0000:00:04.0`.
    pub address: String,
    pub driver: Option<String>,
}

/// OS networking calls the binder depends on.
pub trait NetOps {
    /// Looks an interface up by name; `Ok(None)` when it does not exist.
    fn interface(&self, name: &str) -> io::Result<Option<InterfaceInfo>>;

    /// Addresses assigned to the interface, first one first.
    fn addresses(&self, if_index: u32) -> io::Result<Vec<IpNet>>;

    /// The bus device behind the interface; `Ok(None)` for virtual interfaces.
    fn device(&self, name: &str) -> io::Result<Option<DeviceInfo>>;

    /// Driver to bind when the configuration does not name one.
    fn default_driver(&self, iface: &InterfaceInfo, device: &DeviceInfo) -> io::Result<String>;

    /// Binds the device at `address` to `driver`, unbinding its current driver first.
    fn bind_driver(&self, address: &str, driver: &str) -> io::Result<()>;

    /// Sets the link administratively up.
    fn link_up(&self, if_index: u32) -> io::Result<()>;

    /// Assigns `net` to the interface with replace semantics.
    fn replace_address(&self, if_index: u32, net: IpNet) -> io::Result<()>;
}

/// Everything `restore` needs to give the interface back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingInfo {
    /// The interface as it was found by `prepare` (index refreshed after a rebind).
    pub interface: InterfaceInfo,
    /// First address of the interface, reassigned on restore.
    pub address: IpNet,
    /// Bus device, `None` for virtual interfaces.
    pub device: Option<DeviceInfo>,
    /// Driver the device was moved to; `None` when no rebind happened.
    pub bound_driver: Option<String>,
}

impl BindingInfo {
    /// Driver the device had before `prepare`.
    pub fn original_driver(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.driver.as_deref())
    }
}

/// Records the interface configuration and binds it to the target driver.
pub fn prepare<N: NetOps + ?Sized>(net: &N, config: &RouterConfig) -> Result<BindingInfo, RouterError> {
    let name = config.interface.as_str();
    let mut interface = net
        .interface(name)?
        .ok_or_else(|| RouterError::InterfaceNotFound(name.to_string()))?;
    let address = net
        .addresses(interface.if_index)?
        .into_iter()
        .next()
        .ok_or_else(|| RouterError::NoAddressBound(name.to_string()))?;
    log::info!(
        "interface {name} (index {}) has address {address}",
        interface.if_index
    );

    let device = net.device(name)?;
    let Some(dev) = device.as_ref() else {
        log::info!("interface {name} has no bus device, driver binding skipped");
        return Ok(BindingInfo {
            interface,
            address,
            device,
            bound_driver: None,
        });
    };

    let target = match &config.driver {
        Some(driver) => driver.clone(),
        None => net.default_driver(&interface, dev)?,
    };
    if dev.driver.as_deref() == Some(target.as_str()) {
        log::info!("interface {name} already uses driver {target}");
        return Ok(BindingInfo {
            interface,
            address,
            device,
            bound_driver: None,
        });
    }

    log::info!(
        "binding driver {target} to {name} ({}, was {})",
        dev.address,
        dev.driver.as_deref().unwrap_or("unbound")
    );
    net.bind_driver(&dev.address, &target)
        .map_err(|source| RouterError::BindFailed {
            interface: name.to_string(),
            driver: target.clone(),
            source,
        })?;

    // The engine needs a netdev; a driver that creates its own gives it a new index.
    let missing = match net.interface(name) {
        Ok(Some(rebound)) => {
            interface.if_index = rebound.if_index;
            None
        }
        Ok(None) => Some(io::Error::new(
            io::ErrorKind::NotFound,
            format!("driver {target} leaves no network interface {name} for AF_XDP"),
        )),
        Err(e) => Some(e),
    };
    if let Some(source) = missing {
        if let Some(original) = dev.driver.as_deref() {
            log::warn!("binding {name} back to {original}");
            if let Err(e) = net.bind_driver(&dev.address, original) {
                log::error!("failed to bind driver {original} to {name}: {e}");
            }
        }
        return Err(RouterError::BindFailed {
            interface: name.to_string(),
            driver: target,
            source,
        });
    }
    Ok(BindingInfo {
        interface,
        address,
        device,
        bound_driver: Some(target),
    })
}

/// Gives the interface back to its original driver and configuration.
///
/// Every applicable step is attempted; the failed ones are returned together.
pub fn restore<N: NetOps + ?Sized>(net: &N, binding: &BindingInfo) -> Result<(), RestoreError> {
    let name = binding.interface.name.as_str();
    let mut failed = RestoreError {
        interface: name.to_string(),
        failures: Vec::new(),
    };

    if let (Some(dev), Some(original), Some(bound)) = (
        binding.device.as_ref(),
        binding.original_driver(),
        binding.bound_driver.as_deref(),
    ) {
        log::info!("binding original driver {original} to {name} (was {bound})");
        if let Err(e) = net.bind_driver(&dev.address, original) {
            log::error!("failed to bind driver {original} to {name}: {e}");
            failed.failures.push((RestoreStep::Rebind, e));
        }
    }

    let if_index = match net.interface(name) {
        Ok(Some(iface)) => iface.if_index,
        _ => binding.interface.if_index,
    };

    if let Err(e) = net.link_up(if_index) {
        log::error!("failed to bring interface {name} up: {e}");
        failed.failures.push((RestoreStep::LinkUp, e));
    }

    log::info!("restoring address {} on {name}", binding.address);
    if let Err(e) = net.replace_address(if_index, binding.address) {
        log::error!("failed to restore address {} on {name}: {e}", binding.address);
        failed.failures.push((RestoreStep::Address, e));
    }

    if failed.is_empty() { Ok(()) } else { Err(failed) }
}
