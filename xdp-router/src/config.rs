//! # Router Configuration
//!
//! `RouterConfig` is built once before `Router::start` and never re-read from the
//! environment afterwards. The binary fills it from `Args`, whose options can all be
//! given as environment variables (`NIC`, `DRIVER`, `DPDK_DRIVER`, `CLIENT`, `SERVER`,
//! `CLIENT_MAC`, `SERVER_MAC`, ...).

use std::net::IpAddr;

use clap::Parser;
use eui48::MacAddress;

use crate::engine::XskConfig;
use crate::engine::xdp_prog::AttachMode;
use crate::error::RouterError;

/// Name of the AF_XDP engine, the only one this build ships.
pub const XDP_ENGINE: &str = "xdp";

#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Interface to intercept.
    pub interface: String,
    /// Polling engine to run on the interface.
    pub engine: String,
    /// Driver to bind instead of the platform default.
    pub driver: Option<String>,
    /// AF_XDP socket options, including the queue to drive.
    pub xsk: XskConfig,
    pub client: Option<IpAddr>,
    pub server: Option<IpAddr>,
    pub client_mac: Option<[u8; 6]>,
    pub server_mac: Option<[u8; 6]>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            interface: "eth0".into(),
            engine: XDP_ENGINE.into(),
            driver: None,
            xsk: XskConfig::default(),
            client: None,
            server: None,
            client_mac: None,
            server_mac: None,
        }
    }
}

impl RouterConfig {
    /// Rejects values `Router::start` cannot work with.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.interface.is_empty() {
            return Err(RouterError::InvalidConfig("interface name is empty".into()));
        }
        if self.engine != XDP_ENGINE {
            return Err(RouterError::InvalidConfig(format!(
                "unknown engine {:?}, expected {XDP_ENGINE:?}",
                self.engine
            )));
        }
        if self.driver.as_deref().is_some_and(str::is_empty) {
            return Err(RouterError::InvalidConfig("driver override is empty".into()));
        }
        Ok(())
    }
}

fn parse_mac(s: &str) -> Result<MacAddress, String> {
    MacAddress::parse_str(s).map_err(|e| format!("invalid MAC address {s:?}: {e}"))
}

/// In-line AF_XDP packet router.
#[derive(Parser, Debug, Clone)]
#[command(name = "xdp-router", version, about)]
pub struct Args {
    /// Network interface to intercept
    #[arg(long, env = "NIC", default_value = "eth0")]
    pub nic: String,

    /// Polling engine
    #[arg(long, env = "DRIVER", default_value = XDP_ENGINE)]
    pub driver: String,

    /// Kernel driver to bind the device to, instead of the default choice
    #[arg(long, env = "DPDK_DRIVER")]
    pub dpdk_driver: Option<String>,

    /// Hardware queue to drive
    #[arg(long, env = "QUEUE", default_value_t = 0)]
    pub queue: u32,

    /// Client IP address
    #[arg(long, env = "CLIENT")]
    pub client: IpAddr,

    /// Server IP address
    #[arg(long, env = "SERVER")]
    pub server: IpAddr,

    /// Client MAC address
    #[arg(long, env = "CLIENT_MAC", value_parser = parse_mac)]
    pub client_mac: Option<MacAddress>,

    /// Server MAC address
    #[arg(long, env = "SERVER_MAC", value_parser = parse_mac)]
    pub server_mac: Option<MacAddress>,

    /// Force (true) or forbid (false) zero-copy mode
    #[arg(long, env = "ZERO_COPY")]
    pub zero_copy: Option<bool>,

    /// Back the UMEM with huge pages (true/false); detected when omitted
    #[arg(long, env = "HUGE_PAGES")]
    pub huge_pages: Option<bool>,

    /// Do not set XDP_USE_NEED_WAKEUP on the socket
    #[arg(long)]
    pub no_need_wakeup: bool,

    /// Attach the redirect program in generic (SKB) mode
    #[arg(long, env = "SKB_MODE")]
    pub skb_mode: bool,
}

impl From<Args> for RouterConfig {
    fn from(args: Args) -> Self {
        RouterConfig {
            interface: args.nic,
            engine: args.driver,
            driver: args.dpdk_driver,
            xsk: XskConfig {
                queue_id: args.queue,
                zero_copy: args.zero_copy,
                huge_page: args.huge_pages,
                need_wakeup: Some(!args.no_need_wakeup),
                attach_mode: if args.skb_mode {
                    AttachMode::Generic
                } else {
                    AttachMode::Driver
                },
            },
            client: Some(args.client),
            server: Some(args.server),
            client_mac: args.client_mac.map(|mac| mac.to_array()),
            server_mac: args.server_mac.map(|mac| mac.to_array()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_map_onto_config() {
        let args = Args::try_parse_from([
            "xdp-router",
            "--nic",
            "ens4",
            "--client",
            "10.0.0.1",
            "--server",
            "10.0.0.2",
            "--server-mac",
            "aa:bb:cc:dd:ee:ff",
            "--skb-mode",
        ])
        .unwrap();
        let config = RouterConfig::from(args);
        assert_eq!(config.interface, "ens4");
        assert_eq!(config.engine, "xdp");
        assert_eq!(config.server_mac, Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
        assert_eq!(config.client_mac, None);
        assert_eq!(config.xsk.attach_mode, AttachMode::Generic);
        assert_eq!(config.xsk.need_wakeup, Some(true));
        config.validate().unwrap();
    }

    #[test]
    fn malformed_mac_is_rejected() {
        let res = Args::try_parse_from([
            "xdp-router",
            "--client",
            "10.0.0.1",
            "--server",
            "10.0.0.2",
            "--client-mac",
            "not-a-mac",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn unknown_engine_is_invalid() {
        let config = RouterConfig {
            engine: "pcap".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RouterError::InvalidConfig(_))
        ));
    }
}
