//! # AF_XDP Engine
//!
//! ## Purpose
//!
//! The production `PacketEngine`: one AF_XDP socket bound to a single queue of the
//! interface, receiving every frame the redirect program steers into it and
//! transmitting verdicts back out of the same queue.
//!
//! ## How it works
//!
//! `XskEngine::open` creates the socket, registers a UMEM of `FRAME_COUNT` chunks,
//! sizes and maps the four rings, binds to the queue and finally attaches the redirect
//! program. Half of the chunks are posted to the Fill ring up front; the other half
//! stays on a free list for replacement frames.
//!
//! The receive loop drains the Rx ring in batches. Each descriptor is handed to the
//! callback as an `RxFrame` spanning the rest of its chunk, so in-place rewrites need no
//! copy. `Transmit` posts the same chunk to the Tx ring; `Replace` copies the new bytes
//! into a free chunk and posts that one instead. Chunks come back through the Completion
//! ring and are recycled into the Fill ring. When the Rx ring is empty the loop waits in
//! `poll` with a short timeout so the stop flag is observed promptly.
//!
//! ## Main components
//!
//! - `XskConfig`: socket options.
//! - `XskEngine`: socket, UMEM, rings and redirect program, all released on drop.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::mmap::MappedRegion;
use crate::engine::ring::{FRAME_COUNT, FRAME_SIZE, RING_SIZE, Ring, RingKind, XdpDesc};
use crate::engine::xdp_prog::{AttachMode, XskRedirect};
use crate::engine::{Disposition, PacketEngine, RxFrame};

const POLL_TIMEOUT_MS: libc::c_int = 100;
// Chunks the Fill ring never takes, so a replacement frame can always be built.
const TX_RESERVE: usize = 64;

/// Options of the AF_XDP socket.
#[derive(Debug, Copy, Clone, Default)]
pub struct XskConfig {
    /// Queue of the interface to bind to.
    pub queue_id: u32,
    /// `Some(true)` forces `XDP_ZEROCOPY`, `Some(false)` forces `XDP_COPY`, `None`
    /// lets the kernel choose.
    pub zero_copy: Option<bool>,
    /// Back the UMEM with huge pages; `None` uses them when some are free.
    pub huge_page: Option<bool>,
    /// Sets `XDP_USE_NEED_WAKEUP`; defaults to `true`.
    pub need_wakeup: Option<bool>,
    /// How the redirect program is attached.
    pub attach_mode: AttachMode,
}

/// AF_XDP socket driving one hardware queue.
pub struct XskEngine {
    if_index: u32,
    queue_id: u32,
    // Fields drop in declaration order: the program is detached before the socket goes.
    _redirect: XskRedirect,
    fill: Ring<u64>,
    completion: Ring<u64>,
    rx: Ring<XdpDesc>,
    tx: Ring<XdpDesc>,
    fd: OwnedFd,
    umem: MappedRegion,
    free: Vec<u64>,
    need_wakeup: bool,
    tx_pending: bool,
}

impl XskEngine {
    /// Opens a socket on `config.queue_id` of `if_index` and starts redirecting
    /// that queue into it.
    pub fn open(if_index: u32, config: &XskConfig) -> io::Result<Self> {
        let fd = unsafe {
            let fd = libc::socket(libc::AF_XDP, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            OwnedFd::from_raw_fd(fd)
        };
        let raw_fd = fd.as_raw_fd();
        let umem = register_umem(raw_fd, config.huge_page)?;

        for kind in [
            RingKind::Fill,
            RingKind::Completion,
            RingKind::Rx,
            RingKind::Tx,
        ] {
            kind.set_size(raw_fd, RING_SIZE)?;
        }
        let offsets = crate::engine::ring::mmap_offsets(raw_fd)?;
        let mut fill = Ring::<u64>::map(raw_fd, RingKind::Fill, &offsets, RING_SIZE)?;
        let completion = Ring::<u64>::map(raw_fd, RingKind::Completion, &offsets, RING_SIZE)?;
        let rx = Ring::<XdpDesc>::map(raw_fd, RingKind::Rx, &offsets, RING_SIZE)?;
        let tx = Ring::<XdpDesc>::map(raw_fd, RingKind::Tx, &offsets, RING_SIZE)?;

        // Highest addresses first so `pop` hands out chunk 0 first.
        let mut free: Vec<u64> = (0..FRAME_COUNT)
            .rev()
            .map(|i| (i * FRAME_SIZE) as u64)
            .collect();
        for _ in 0..RING_SIZE {
            if let Some(addr) = free.pop() {
                fill.push(addr);
            }
        }
        fill.publish();

        let zero_copy = match config.zero_copy {
            Some(true) => libc::XDP_ZEROCOPY,
            Some(false) => libc::XDP_COPY,
            None => 0,
        };
        let need_wakeup = config.need_wakeup.unwrap_or(true);
        let sxdp = libc::sockaddr_xdp {
            sxdp_family: libc::AF_XDP as libc::sa_family_t,
            sxdp_flags: zero_copy | if need_wakeup { libc::XDP_USE_NEED_WAKEUP } else { 0 },
            sxdp_ifindex: if_index,
            sxdp_queue_id: config.queue_id,
            sxdp_shared_umem_fd: 0,
        };
        if unsafe {
            libc::bind(
                raw_fd,
                &sxdp as *const _ as *const libc::sockaddr,
                size_of::<libc::sockaddr_xdp>() as libc::socklen_t,
            )
        } < 0
        {
            return Err(io::Error::other(format!(
                "Failed to bind AF_XDP socket to interface {if_index} queue {}: {}",
                config.queue_id,
                io::Error::last_os_error()
            )));
        }

        let redirect = XskRedirect::attach(if_index, config.attach_mode)?;
        redirect.register(config.queue_id, raw_fd)?;

        log::info!(
            "AF_XDP socket bound to interface {if_index} queue {} ({} chunks of {} bytes, {:?} mode)",
            config.queue_id,
            FRAME_COUNT,
            FRAME_SIZE,
            redirect.mode()
        );
        Ok(XskEngine {
            if_index,
            queue_id: config.queue_id,
            _redirect: redirect,
            fill,
            completion,
            rx,
            tx,
            fd,
            umem,
            free,
            need_wakeup,
            tx_pending: false,
        })
    }

    /// Returns chunks whose transmission completed to the free list.
    fn reclaim(&mut self) {
        let done = self.completion.available();
        for i in 0..done {
            self.free.push(chunk_base(self.completion.peek(i)));
        }
        if done > 0 {
            self.completion.release(done);
        }
    }

    /// Posts free chunks to the Fill ring, keeping `TX_RESERVE` back.
    fn refill(&mut self) {
        let spare = self.free.len().saturating_sub(TX_RESERVE);
        let count = spare.min(self.fill.free_slots() as usize);
        for _ in 0..count {
            if let Some(addr) = self.free.pop() {
                self.fill.push(addr);
            }
        }
        if count > 0 {
            self.fill.publish();
        }
    }

    fn transmit(&mut self, addr: u64, len: usize) {
        if self.tx.push(XdpDesc {
            addr,
            len: len as u32,
            options: 0,
        }) {
            self.tx_pending = true;
        } else {
            log::warn!("Tx ring full, frame dropped");
            self.free.push(chunk_base(addr));
        }
    }

    fn transmit_new(&mut self, bytes: &[u8]) {
        if bytes.len() > FRAME_SIZE {
            log::warn!(
                "replacement frame of {} bytes exceeds chunk size, dropped",
                bytes.len()
            );
            return;
        }
        if self.free.is_empty() {
            self.reclaim();
        }
        let Some(addr) = self.free.pop() else {
            log::warn!("no free chunk for replacement frame, dropped");
            return;
        };
        let room = chunk_room(&self.umem, addr);
        room[..bytes.len()].copy_from_slice(bytes);
        self.transmit(addr, bytes.len());
    }

    fn kick(&mut self) -> io::Result<()> {
        if !self.tx_pending || (self.need_wakeup && !self.tx.needs_wakeup()) {
            return Ok(());
        }
        self.tx_pending = false;
        let ret = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                ptr::null(),
                0,
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
                ptr::null(),
                0,
            )
        };
        if ret < 0 {
            match io::Error::last_os_error().raw_os_error() {
                None | Some(libc::EBUSY | libc::ENOBUFS | libc::EAGAIN) => {}
                Some(libc::ENETDOWN) => {
                    log::warn!("interface {} is down, cannot wake up Tx", self.if_index);
                }
                Some(e) => return Err(io::Error::from_raw_os_error(e)),
            }
        }
        Ok(())
    }

    /// Waits until the socket is readable or the timeout expires.
    fn wait_readable(&self) -> io::Result<()> {
        let mut fds = [libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        if unsafe { libc::poll(fds.as_mut_ptr(), 1, POLL_TIMEOUT_MS) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl PacketEngine for XskEngine {
    fn if_index(&self) -> u32 {
        self.if_index
    }

    fn queue_id(&self) -> u32 {
        self.queue_id
    }

    fn run(
        &mut self,
        stop: &AtomicBool,
        on_frame: &mut dyn FnMut(&mut RxFrame<'_>) -> Disposition,
    ) -> io::Result<()> {
        while !stop.load(Ordering::Acquire) {
            self.reclaim();
            let received = self.rx.available();
            if received == 0 {
                self.refill();
                self.wait_readable()?;
                continue;
            }

            for i in 0..received {
                let desc = self.rx.peek(i);
                let room = chunk_room(&self.umem, desc.addr);
                let len = (desc.len as usize).min(room.len());
                let mut frame = RxFrame::new(room, len);
                let disposition = on_frame(&mut frame);
                let len = frame.len();
                match disposition {
                    Disposition::Drop => self.free.push(chunk_base(desc.addr)),
                    Disposition::Transmit => self.transmit(desc.addr, len),
                    Disposition::Replace(bytes) => {
                        self.free.push(chunk_base(desc.addr));
                        self.transmit_new(&bytes);
                    }
                }
            }
            self.rx.release(received);
            self.tx.publish();
            self.refill();
            self.kick()?;
        }
        log::debug!("AF_XDP receive loop on queue {} stopped", self.queue_id);
        Ok(())
    }
}

/// Start of the chunk containing `addr`.
fn chunk_base(addr: u64) -> u64 {
    addr & !(FRAME_SIZE as u64 - 1)
}

/// The bytes from `addr` to the end of its chunk.
#[allow(clippy::mut_from_ref)]
fn chunk_room(umem: &MappedRegion, addr: u64) -> &mut [u8] {
    let start = addr as usize;
    let end = chunk_base(addr) as usize + FRAME_SIZE;
    debug_assert!(end <= umem.len());
    // Each chunk is owned by exactly one ring or the free list at a time, and the
    // engine only touches chunks it currently owns.
    unsafe { std::slice::from_raw_parts_mut(umem.as_ptr().add(start), end - start) }
}

/// Allocates the UMEM and registers it with the socket.
fn register_umem(fd: libc::c_int, huge_page: Option<bool>) -> io::Result<MappedRegion> {
    let umem = MappedRegion::anonymous(FRAME_COUNT * FRAME_SIZE, huge_page)
        .map_err(|e| io::Error::other(format!("Failed to allocate UMEM: {e}")))?;
    let reg = unsafe {
        libc::xdp_umem_reg {
            addr: umem.as_ptr() as u64,
            len: umem.len() as u64,
            chunk_size: FRAME_SIZE as u32,
            ..std::mem::zeroed()
        }
    };
    if unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_XDP,
            libc::XDP_UMEM_REG,
            &reg as *const _ as *const libc::c_void,
            size_of::<libc::xdp_umem_reg>() as libc::socklen_t,
        )
    } < 0
    {
        return Err(io::Error::other(format!(
            "Failed to register UMEM: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(umem)
}
