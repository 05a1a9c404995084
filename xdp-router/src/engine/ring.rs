//! # AF_XDP Rings
//!
//! ## Purpose
//!
//! Single-producer/single-consumer rings shared with the kernel. The Fill and Tx rings
//! are produced by user space; the Rx and Completion rings are consumed by it.
//!
//! ## How it works
//!
//! Each ring lives in its own shared mapping of the socket at a fixed page offset. The
//! kernel tells us where the producer index, consumer index, flags word and descriptor
//! array are inside that mapping (`XDP_MMAP_OFFSETS`). `Ring` keeps a cached copy of the
//! index it owns and publishes it with release ordering; the index owned by the kernel
//! is read with acquire ordering.

use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use static_assertions::const_assert_eq;

use crate::engine::mmap::MappedRegion;

/// Size of one UMEM chunk. Frames larger than this are not supported.
pub const FRAME_SIZE: usize = 2048;
/// Number of UMEM chunks.
pub const FRAME_COUNT: usize = 4096;
/// Entries in each of the four rings; half of the chunk pool.
pub const RING_SIZE: u32 = (FRAME_COUNT / 2) as u32;

/// Rx/Tx ring descriptor, layout of `struct xdp_desc`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XdpDesc {
    pub addr: u64,
    pub len: u32,
    pub options: u32,
}

const_assert_eq!(size_of::<XdpDesc>(), 16);

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RingKind {
    Fill,
    Completion,
    Rx,
    Tx,
}

impl RingKind {
    fn sockopt(self) -> libc::c_int {
        match self {
            RingKind::Fill => libc::XDP_UMEM_FILL_RING,
            RingKind::Completion => libc::XDP_UMEM_COMPLETION_RING,
            RingKind::Rx => libc::XDP_RX_RING,
            RingKind::Tx => libc::XDP_TX_RING,
        }
    }

    fn page_offset(self) -> libc::off_t {
        match self {
            RingKind::Fill => libc::XDP_UMEM_PGOFF_FILL_RING as libc::off_t,
            RingKind::Completion => libc::XDP_UMEM_PGOFF_COMPLETION_RING as libc::off_t,
            RingKind::Rx => libc::XDP_PGOFF_RX_RING as libc::off_t,
            RingKind::Tx => libc::XDP_PGOFF_TX_RING as libc::off_t,
        }
    }

    fn offsets(self, all: &libc::xdp_mmap_offsets) -> &libc::xdp_ring_offset {
        match self {
            RingKind::Fill => &all.fr,
            RingKind::Completion => &all.cr,
            RingKind::Rx => &all.rx,
            RingKind::Tx => &all.tx,
        }
    }

    /// Asks the kernel to allocate the ring with `size` entries.
    pub fn set_size(self, fd: libc::c_int, size: u32) -> io::Result<()> {
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_XDP,
                self.sockopt(),
                &size as *const u32 as *const libc::c_void,
                size_of::<u32>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::other(format!(
                "Failed to size {self:?} ring: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// Queries where the indices and descriptors of each ring live in its mapping.
pub fn mmap_offsets(fd: libc::c_int) -> io::Result<libc::xdp_mmap_offsets> {
    let mut offsets: libc::xdp_mmap_offsets = unsafe { std::mem::zeroed() };
    let mut optlen = size_of::<libc::xdp_mmap_offsets>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_XDP,
            libc::XDP_MMAP_OFFSETS,
            &mut offsets as *mut _ as *mut libc::c_void,
            &mut optlen,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(offsets)
}

/// One mapped ring carrying descriptors of type `T`.
pub struct Ring<T> {
    _map: MappedRegion,
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    flags: *const AtomicU32,
    desc: *mut T,
    size: u32,
    mask: u32,
    // Our side's index: producer for Fill/Tx, consumer for Rx/Completion.
    cached: u32,
}

unsafe impl<T: Send> Send for Ring<T> {}

impl<T: Copy> Ring<T> {
    /// Maps a ring previously sized with `RingKind::set_size`.
    pub fn map(
        fd: libc::c_int,
        kind: RingKind,
        offsets: &libc::xdp_mmap_offsets,
        size: u32,
    ) -> io::Result<Self> {
        debug_assert!(size.is_power_of_two());
        let off = kind.offsets(offsets);
        let len = off.desc as usize + size as usize * size_of::<T>();
        let map = MappedRegion::shared(fd, len, kind.page_offset())
            .map_err(|e| io::Error::other(format!("Failed to map {kind:?} ring: {e}")))?;
        let base = map.as_ptr();
        let ring = unsafe {
            Ring {
                producer: base.add(off.producer as usize) as *const AtomicU32,
                consumer: base.add(off.consumer as usize) as *const AtomicU32,
                flags: base.add(off.flags as usize) as *const AtomicU32,
                desc: base.add(off.desc as usize) as *mut T,
                size,
                mask: size - 1,
                cached: 0,
                _map: map,
            }
        };
        Ok(ring)
    }

    fn kernel_producer(&self) -> u32 {
        unsafe { (*self.producer).load(Ordering::Acquire) }
    }

    fn kernel_consumer(&self) -> u32 {
        unsafe { (*self.consumer).load(Ordering::Acquire) }
    }

    /// Returns `true` when the kernel asks to be woken up for this ring.
    pub fn needs_wakeup(&self) -> bool {
        unsafe { (*self.flags).load(Ordering::Relaxed) & libc::XDP_RING_NEED_WAKEUP != 0 }
    }

    // Producer side (Fill, Tx)

    /// Slots that can be pushed before the kernel consumes more.
    pub fn free_slots(&self) -> u32 {
        self.size - self.cached.wrapping_sub(self.kernel_consumer())
    }

    /// Writes `item` into the next slot; it becomes visible on `publish`.
    pub fn push(&mut self, item: T) -> bool {
        if self.free_slots() == 0 {
            return false;
        }
        unsafe { *self.desc.add((self.cached & self.mask) as usize) = item };
        self.cached = self.cached.wrapping_add(1);
        true
    }

    pub fn publish(&mut self) {
        unsafe { (*self.producer).store(self.cached, Ordering::Release) };
    }

    // Consumer side (Rx, Completion)

    /// Entries produced by the kernel and not yet released.
    pub fn available(&self) -> u32 {
        self.kernel_producer().wrapping_sub(self.cached)
    }

    /// Reads the `index`-th unreleased entry.
    pub fn peek(&self, index: u32) -> T {
        debug_assert!(index < self.size);
        unsafe { *self.desc.add((self.cached.wrapping_add(index) & self.mask) as usize) }
    }

    /// Hands `count` entries back to the kernel.
    pub fn release(&mut self, count: u32) {
        self.cached = self.cached.wrapping_add(count);
        unsafe { (*self.consumer).store(self.cached, Ordering::Release) };
    }
}
