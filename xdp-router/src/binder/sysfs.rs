//! Linux `NetOps`: PCI driver rebinding through sysfs, links and addresses through
//! rtnetlink.
//!
//! Rebinding follows the usual `driver_override` dance: unbind the current driver,
//! pin the device to the target with `driver_override`, ask the target to bind it,
//! then clear the override so later probes behave normally.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ipnet::IpNet;

use crate::binder::{DeviceInfo, InterfaceInfo, NetOps};
use crate::engine::xdp_prog::xdp_features;
use crate::netlink;

const NETDEV_XDP_ACT_BASIC: u32 = 1 << 0;
const NETDEV_XDP_ACT_XSK_ZEROCOPY: u32 = 1 << 3;
const VFIO_PCI: &str = "vfio-pci";
const UIO_PCI_GENERIC: &str = "uio_pci_generic";

#[derive(Clone, Debug)]
pub struct SysfsNetOps {
    root: PathBuf,
}

impl Default for SysfsNetOps {
    fn default() -> Self {
        SysfsNetOps::new("/sys")
    }
}

impl SysfsNetOps {
    /// Uses `root` in place of `/sys`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SysfsNetOps { root: root.into() }
    }

    fn pci_device(&self, address: &str) -> PathBuf {
        self.root.join("bus/pci/devices").join(address)
    }

    fn pci_driver(&self, driver: &str) -> PathBuf {
        self.root.join("bus/pci/drivers").join(driver)
    }

    fn current_driver(&self, address: &str) -> io::Result<Option<String>> {
        link_name(&self.pci_device(address).join("driver"))
    }
}

/// File name of the symlink target at `path`, `None` if there is no such link.
fn link_name(path: &Path) -> io::Result<Option<String>> {
    match fs::read_link(path) {
        Ok(target) => Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_attr(path: &Path, value: &str) -> io::Result<()> {
    fs::write(path, value)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

impl NetOps for SysfsNetOps {
    fn interface(&self, name: &str) -> io::Result<Option<InterfaceInfo>> {
        Ok(netlink::link_by_name(name)?.map(|link| InterfaceInfo {
            name: link.name,
            if_index: link.if_index,
            mac: link.mac,
        }))
    }

    fn addresses(&self, if_index: u32) -> io::Result<Vec<IpNet>> {
        netlink::get_addresses(if_index)
    }

    fn device(&self, name: &str) -> io::Result<Option<DeviceInfo>> {
        let Some(address) = link_name(&self.root.join("class/net").join(name).join("device"))?
        else {
            return Ok(None);
        };
        let driver = self.current_driver(&address)?;
        Ok(Some(DeviceInfo { address, driver }))
    }

    fn default_driver(&self, iface: &InterfaceInfo, device: &DeviceInfo) -> io::Result<String> {
        // AF_XDP needs the kernel netdev, so a bound kernel driver is always kept.
        if let Some(current) = &device.driver {
            match xdp_features(iface.if_index) {
                Ok(features) if features & NETDEV_XDP_ACT_BASIC != 0 => log::info!(
                    "driver {current} supports native XDP (zero-copy: {})",
                    features & NETDEV_XDP_ACT_XSK_ZEROCOPY != 0
                ),
                Ok(_) => log::warn!(
                    "driver {current} has no native XDP support, generic mode will be used"
                ),
                Err(e) => log::warn!("cannot query XDP features of {}: {e}", iface.name),
            }
            return Ok(current.clone());
        }
        if self.pci_driver(VFIO_PCI).is_dir() {
            Ok(VFIO_PCI.to_string())
        } else {
            Ok(UIO_PCI_GENERIC.to_string())
        }
    }

    fn bind_driver(&self, address: &str, driver: &str) -> io::Result<()> {
        let device = self.pci_device(address);
        if !device.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no PCI device {address}"),
            ));
        }
        let current = self.current_driver(address)?;
        if current.as_deref() == Some(driver) {
            return Ok(());
        }
        let target = self.pci_driver(driver);
        if !target.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("driver {driver} is not loaded"),
            ));
        }

        if let Some(current) = current {
            log::debug!("unbinding {address} from {current}");
            write_attr(&device.join("driver/unbind"), address)?;
        }
        write_attr(&device.join("driver_override"), driver)?;
        let bound = write_attr(&target.join("bind"), address);
        // Cleared even when the bind failed so the next probe is not pinned.
        write_attr(&device.join("driver_override"), "\n")?;
        bound
    }

    fn link_up(&self, if_index: u32) -> io::Result<()> {
        netlink::set_link_up(if_index)
    }

    fn replace_address(&self, if_index: u32, net: IpNet) -> io::Result<()> {
        netlink::replace_address(if_index, net)
    }
}
