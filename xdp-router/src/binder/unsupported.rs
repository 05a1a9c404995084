//! Stand-in `NetOps` for builds without sysfs support. Every call fails with
//! `ErrorKind::Unsupported`, so `Router::start` stops at the interface lookup.

use std::io;

use ipnet::IpNet;

use crate::binder::{DeviceInfo, InterfaceInfo, NetOps};

#[derive(Clone, Copy, Debug, Default)]
pub struct UnsupportedNetOps;

fn unsupported<T>(what: &str) -> io::Result<T> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{what} is not supported on this build"),
    ))
}

impl NetOps for UnsupportedNetOps {
    fn interface(&self, _name: &str) -> io::Result<Option<InterfaceInfo>> {
        unsupported("interface lookup")
    }

    fn addresses(&self, _if_index: u32) -> io::Result<Vec<IpNet>> {
        unsupported("address enumeration")
    }

    fn device(&self, _name: &str) -> io::Result<Option<DeviceInfo>> {
        unsupported("device lookup")
    }

    fn default_driver(&self, _iface: &InterfaceInfo, _device: &DeviceInfo) -> io::Result<String> {
        unsupported("driver selection")
    }

    fn bind_driver(&self, _address: &str, _driver: &str) -> io::Result<()> {
        unsupported("driver binding")
    }

    fn link_up(&self, _if_index: u32) -> io::Result<()> {
        unsupported("link configuration")
    }

    fn replace_address(&self, _if_index: u32, _net: IpNet) -> io::Result<()> {
        unsupported("address configuration")
    }
}
