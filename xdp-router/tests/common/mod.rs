#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ipnet::IpNet;
use xdp_router::{
    Action, DeviceInfo, Disposition, HandlerError, InterfaceInfo, Metadata, NetOps, PacketEngine,
    RouterConfig, RxFrame,
};

pub const ETH0_MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
pub const CLIENT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const SERVER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];

/// What the engine did with one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Dropped,
    /// Sent from the buffer the frame was received into.
    InPlace(Vec<u8>),
    /// Original released, these bytes sent from a fresh buffer.
    Reallocated(Vec<u8>),
}

/// Engine fed by the test through a `Feeder`.
pub struct ScriptedEngine {
    frames: Receiver<(Vec<u8>, usize)>,
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

pub struct Feeder {
    frames: Sender<(Vec<u8>, usize)>,
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

pub fn scripted() -> (ScriptedEngine, Feeder) {
    let (tx, rx) = mpsc::channel();
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    (
        ScriptedEngine {
            frames: rx,
            outcomes: outcomes.clone(),
        },
        Feeder {
            frames: tx,
            outcomes,
        },
    )
}

impl Feeder {
    /// Queues `bytes` as received into a buffer of `capacity` bytes.
    pub fn push(&self, bytes: &[u8], capacity: usize) {
        self.frames.send((bytes.to_vec(), capacity)).unwrap();
    }

    /// Waits until the engine has disposed of `n` frames and returns all outcomes.
    pub fn wait_for(&self, n: usize) -> Vec<Outcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let outcomes = self.outcomes.lock().unwrap().clone();
            if outcomes.len() >= n {
                return outcomes;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {n} outcomes, got {outcomes:?}"
            );
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl PacketEngine for ScriptedEngine {
    fn if_index(&self) -> u32 {
        2
    }

    fn queue_id(&self) -> u32 {
        0
    }

    fn run(
        &mut self,
        stop: &AtomicBool,
        on_frame: &mut dyn FnMut(&mut RxFrame<'_>) -> Disposition,
    ) -> io::Result<()> {
        while !stop.load(Ordering::Acquire) {
            let (bytes, capacity) = match self.frames.recv_timeout(Duration::from_millis(5)) {
                Ok(next) => next,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            };
            let len = bytes.len();
            let mut buffer = vec![0u8; capacity.max(len)];
            buffer[..len].copy_from_slice(&bytes);
            let mut frame = RxFrame::new(&mut buffer, len);
            let outcome = match on_frame(&mut frame) {
                Disposition::Drop => Outcome::Dropped,
                Disposition::Transmit => Outcome::InPlace(frame.bytes().to_vec()),
                Disposition::Replace(bytes) => Outcome::Reallocated(bytes),
            };
            self.outcomes.lock().unwrap().push(outcome);
        }
        Ok(())
    }
}

/// `NetOps` over a pretend `eth0` backed by a PCI device, recording every change.
#[derive(Clone, Default)]
pub struct RecordingNetOps {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_link_up: bool,
}

impl RecordingNetOps {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl NetOps for RecordingNetOps {
    fn interface(&self, name: &str) -> io::Result<Option<InterfaceInfo>> {
        Ok((name == "eth0").then(|| InterfaceInfo {
            name: "eth0".into(),
            if_index: 2,
            mac: Some(ETH0_MAC),
        }))
    }

    fn addresses(&self, _if_index: u32) -> io::Result<Vec<IpNet>> {
        Ok(vec!["10.0.0.2/24".parse().unwrap()])
    }

    fn device(&self, _name: &str) -> io::Result<Option<DeviceInfo>> {
        Ok(Some(DeviceInfo {
            address: "0000:00:04.0".into(),
            driver: Some("virtio-pci".into()),
        }))
    }

    fn default_driver(&self, _iface: &InterfaceInfo, _device: &DeviceInfo) -> io::Result<String> {
        Ok("vfio-pci".into())
    }

    fn bind_driver(&self, address: &str, driver: &str) -> io::Result<()> {
        self.record(format!("bind {address} {driver}"));
        Ok(())
    }

    fn link_up(&self, if_index: u32) -> io::Result<()> {
        self.record(format!("up {if_index}"));
        if self.fail_link_up {
            return Err(io::Error::other("link refused"));
        }
        Ok(())
    }

    fn replace_address(&self, if_index: u32, net: IpNet) -> io::Result<()> {
        self.record(format!("addr {if_index} {net}"));
        Ok(())
    }
}

pub fn eth0_config() -> RouterConfig {
    RouterConfig {
        interface: "eth0".into(),
        client_mac: Some(CLIENT_MAC),
        server_mac: Some(SERVER_MAC),
        ..Default::default()
    }
}

/// A minimal IPv4 Ethernet frame addressed to `dst`.
pub fn frame_to(dst: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&ETH0_MAC);
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(payload);
    frame
}

/// Pins a closure to the handler signature so its types can be inferred.
pub fn decide<F>(f: F) -> F
where
    F: FnMut(&mut Metadata) -> Result<Action, HandlerError> + Send + 'static,
{
    f
}
