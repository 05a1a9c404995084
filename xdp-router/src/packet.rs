//! # Frames, Metadata and Actions
//!
//! ## Purpose
//!
//! Types shared by the dispatch loop and decision functions: the `Frame` holding one
//! link-layer packet, the reusable `Metadata` envelope handed to a `Handler`, and the
//! `Action` a handler returns.
//!
//! ## How it works
//!
//! A `Frame` owns a copy of the received bytes and remembers the capacity of the
//! hardware buffer it was received into. The capacity decides whether a rewrite can
//! be applied in place or needs a freshly allocated buffer. The dispatch loop keeps a
//! single `Metadata` value alive for its whole lifetime and calls `reset` before
//! wrapping each new frame, so no envelope is allocated per packet.

use std::ops::{Deref, DerefMut};

/// One link-layer packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    capacity: usize,
}

impl Frame {
    /// Creates a frame whose original allocation is exactly as large as `data`.
    pub fn new(data: Vec<u8>) -> Self {
        let capacity = data.len();
        Frame { data, capacity }
    }

    /// Creates a frame received into a buffer that can hold `capacity` bytes.
    pub fn with_capacity(data: Vec<u8>, capacity: usize) -> Self {
        let capacity = capacity.max(data.len());
        Frame { data, capacity }
    }

    /// Copies `bytes` into a new frame, see `with_capacity`.
    pub fn copy_from(bytes: &[u8], capacity: usize) -> Self {
        Frame::with_capacity(bytes.to_vec(), capacity)
    }

    /// Size of the hardware buffer the frame was received into.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if `len` bytes fit into the original buffer.
    pub fn fits(&self, len: usize) -> bool {
        len <= self.capacity
    }

    /// Replaces the frame contents.
    ///
    /// The recorded capacity is left untouched: it still describes the original
    /// hardware buffer, so a longer replacement is later sent from a new buffer.
    pub fn replace(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Frame {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::new(data)
    }
}

/// Envelope wrapping the frame under evaluation plus fields a handler may use.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    /// The frame being evaluated. Handlers returning `Rewrite` or `New` leave the
    /// replacement contents here.
    pub frame: Frame,
    /// Index of the interface the frame was received on.
    pub if_index: u32,
    /// Hardware queue the frame was received on.
    pub queue_id: u32,
    /// Position of the frame in the receive order, starting at 0 for each loop.
    pub sequence: u64,
    /// Scratch value owned by the handler; cleared on every reset.
    pub mark: u32,
}

impl Metadata {
    pub fn new(if_index: u32, queue_id: u32) -> Self {
        Metadata {
            if_index,
            queue_id,
            ..Default::default()
        }
    }

    /// Clears per-frame state so the envelope can wrap the next frame.
    pub fn reset(&mut self) {
        self.frame = Frame::default();
        self.mark = 0;
    }

    /// Replaces the frame with a freshly constructed one, for `Action::New`.
    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
    }

    /// Moves the frame out of the envelope, leaving an empty one behind.
    pub fn take_frame(&mut self) -> Frame {
        std::mem::take(&mut self.frame)
    }
}

/// Verdict returned by a decision function.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Discard the frame.
    Drop,
    /// Forward the frame as received.
    Pass,
    /// Forward the frame with its contents replaced by `Metadata::frame`.
    Rewrite,
    /// Discard the original and forward the new frame left in `Metadata::frame`.
    New,
    /// A code the router does not understand; handled as `Drop`.
    Unknown(u8),
}

impl Action {
    /// Numeric code of the action, the inverse of `Action::from(u8)`.
    pub fn code(self) -> u8 {
        match self {
            Action::Drop => 0,
            Action::Pass => 1,
            Action::Rewrite => 2,
            Action::New => 3,
            Action::Unknown(code) => code,
        }
    }
}

impl From<u8> for Action {
    fn from(code: u8) -> Self {
        match code {
            0 => Action::Drop,
            1 => Action::Pass,
            2 => Action::Rewrite,
            3 => Action::New,
            other => Action::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_keeps_original_capacity() {
        let mut frame = Frame::with_capacity(vec![1, 2, 3], 4);
        frame.replace(&[9, 9, 9, 9, 9]);
        assert_eq!(&frame[..], &[9, 9, 9, 9, 9]);
        assert_eq!(frame.capacity(), 4);
        assert!(!frame.fits(frame.len()));
    }

    #[test]
    fn capacity_never_below_len() {
        let frame = Frame::with_capacity(vec![0; 10], 2);
        assert_eq!(frame.capacity(), 10);
    }

    #[test]
    fn reset_clears_frame_and_mark() {
        let mut meta = Metadata::new(3, 0);
        meta.frame = Frame::new(vec![1, 2]);
        meta.mark = 7;
        meta.sequence = 11;
        meta.reset();
        assert!(meta.frame.is_empty());
        assert_eq!(meta.mark, 0);
        assert_eq!(meta.if_index, 3);
    }

    #[test]
    fn unknown_codes_are_preserved() {
        assert_eq!(Action::from(2), Action::Rewrite);
        assert_eq!(Action::from(42), Action::Unknown(42));
        assert_eq!(Action::Unknown(42).code(), 42);
    }
}
