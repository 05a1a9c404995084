//! # Polling-Mode Packet Engines
//!
//! ## Purpose
//!
//! This module defines the boundary between the router and the engine that owns the
//! hardware queue. An engine runs its receive loop on a thread of its own and hands
//! every received frame to a callback, which blocks until it knows what to do with it.
//!
//! ## How it works
//!
//! `PacketEngine::run` loops until the shared stop flag is raised. For each frame it
//! builds an `RxFrame` view over the hardware buffer and calls the callback. The
//! returned `Disposition` tells the engine to release the buffer, transmit it (possibly
//! after an in-place rewrite through `RxFrame::overwrite`), or release it and transmit a
//! replacement from a fresh buffer.
//!
//! ## Main components
//!
//! - `PacketEngine`: the trait every engine implements.
//! - `RxFrame`, `Disposition`: the per-frame callback contract.
//! - `XskEngine`: the AF_XDP engine used in production.

pub mod mmap;
pub mod ring;
pub mod xdp_prog;
pub mod xsk;

pub use xsk::{XskConfig, XskEngine};

use std::io;
use std::sync::atomic::AtomicBool;

/// What the engine does with a frame once the callback returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Release the buffer without transmitting it.
    Drop,
    /// Transmit the buffer, including any in-place rewrite.
    Transmit,
    /// Release the buffer and transmit these bytes from a newly allocated one.
    Replace(Vec<u8>),
}

/// Mutable view of a received frame inside its hardware buffer.
pub struct RxFrame<'a> {
    room: &'a mut [u8],
    len: usize,
}

impl<'a> RxFrame<'a> {
    /// `room` spans the whole buffer starting at the first byte of the frame,
    /// `len` is the number of bytes received.
    pub fn new(room: &'a mut [u8], len: usize) -> Self {
        debug_assert!(len <= room.len());
        RxFrame { room, len }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.room[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.room.len()
    }

    /// Replaces the contents in place. Returns `false`, leaving the frame untouched,
    /// when `data` does not fit the buffer.
    pub fn overwrite(&mut self, data: &[u8]) -> bool {
        if data.len() > self.room.len() {
            return false;
        }
        self.room[..data.len()].copy_from_slice(data);
        self.len = data.len();
        true
    }
}

/// A user-space polling engine bound to one hardware queue.
pub trait PacketEngine: Send + 'static {
    /// Index of the interface the engine receives from.
    fn if_index(&self) -> u32;

    /// Hardware queue the engine is bound to.
    fn queue_id(&self) -> u32;

    /// Runs the receive loop on the calling thread until `stop` is raised.
    ///
    /// `on_frame` is called once per received frame, in receive order, and the engine
    /// does not look at the next frame before it returns.
    fn run(
        &mut self,
        stop: &AtomicBool,
        on_frame: &mut dyn FnMut(&mut RxFrame<'_>) -> Disposition,
    ) -> io::Result<()>;
}
