use std::future::Future;
use std::io::{ErrorKind, Result};

use crate::veth;

pub const DEV_PREFIX: &str = "xdpRtr";
pub const IP_PREFIX: &str = "192.168.78.";

#[derive(Clone, Debug)]
pub struct Host {
    pub if_dev: String,
    pub ip: String,
    pub mac: [u8; 6],
}

#[derive(Clone, Debug)]
pub struct HostPair {
    pub host0: Host,
    pub host1: Host,
}

impl HostPair {
    pub fn from_prefixes(dev_prefix: &str, ip_prefix: &str) -> Result<Self> {
        let host = |i: u8| -> Result<Host> {
            let if_dev = format!("{dev_prefix}{i}");
            Ok(Host {
                mac: veth::mac_of(&if_dev)?,
                ip: format!("{ip_prefix}{}", 100 + i),
                if_dev,
            })
        };
        Ok(HostPair {
            host0: host(0)?,
            host1: host(1)?,
        })
    }
}

/// Creates the veth pair if needed, runs `test` against it and tears it down.
pub async fn run_test_with_pair<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(HostPair) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if let Err(e) = veth::check_pair(DEV_PREFIX) {
        if e.kind() != ErrorKind::NotFound {
            return Err(e);
        }
        veth::setup_pair(DEV_PREFIX, IP_PREFIX)?;
    }
    let pair = HostPair::from_prefixes(DEV_PREFIX, IP_PREFIX)?;
    let result = test(pair).await;
    veth::teardown_pair(DEV_PREFIX)?;
    result
}
