//! End-to-end run on a veth pair: a frame sent from the peer towards the server MAC
//! comes back rewritten to the client MAC.
//!
//! Needs CAP_NET_ADMIN, CAP_NET_RAW and CAP_BPF; run with `--ignored` as root.

use std::time::Duration;

use nettest::{RawSocket, run_test_with_pair};
use xdp_router::engine::xdp_prog::AttachMode;
use xdp_router::{DriverState, Rewriter, Router, RouterConfig, XskConfig};

const SERVER_MAC: [u8; 6] = [0x02, 0x5e, 0x00, 0x00, 0x00, 0x02];
const MARKER: &[u8] = b"xdp-router end-to-end";

#[tokio::test]
#[ignore = "needs root and a kernel with AF_XDP"]
async fn frames_to_server_are_rewritten_on_the_wire() -> std::io::Result<()> {
    nettest::setup(&[
        caps::Capability::CAP_NET_ADMIN,
        caps::Capability::CAP_NET_RAW,
        caps::Capability::CAP_BPF,
    ])?;
    run_test_with_pair(|pair| async move {
        let config = RouterConfig {
            interface: pair.host0.if_dev.clone(),
            xsk: XskConfig {
                zero_copy: Some(false),
                huge_page: Some(false),
                attach_mode: AttachMode::Generic,
                ..Default::default()
            },
            client_mac: Some(pair.host1.mac),
            server_mac: Some(SERVER_MAC),
            ..Default::default()
        };
        let rewriter = Rewriter::new(config.client_mac, config.server_mac);
        let mut router = Router::new(config);
        router.start(rewriter).map_err(std::io::Error::other)?;
        assert_eq!(router.state(), DriverState::Running);

        let peer = RawSocket::open(&pair.host1.if_dev)?;
        let mut frame = Vec::new();
        frame.extend_from_slice(&SERVER_MAC);
        frame.extend_from_slice(&pair.host1.mac);
        frame.extend_from_slice(&[0x88, 0xb5]); // local experimental ethertype
        frame.extend_from_slice(MARKER);
        peer.send(&frame)?;

        let host1_mac = pair.host1.mac;
        let received = peer.recv_matching(Duration::from_secs(2), |f| {
            f.len() >= 14 && f[..6] == host1_mac && f.ends_with(MARKER)
        })?;
        assert_eq!(&received[6..], &frame[6..]);

        router.close().map_err(std::io::Error::other)?;
        assert!(router.stats().rewritten >= 1);
        Ok(())
    })
    .await
}
