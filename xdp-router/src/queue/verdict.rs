//! Verdicts and the single-use slot the engine thread waits on.

use tokio::sync::oneshot;

use crate::engine::{Disposition, RxFrame};

/// The decision for one frame, as delivered to the hardware queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Release the buffer without transmitting.
    Drop,
    /// Transmit the original buffer unchanged.
    Pass,
    /// Transmit these bytes in place of the original.
    Rewrite(Vec<u8>),
    /// Drop the original and transmit these bytes from a new buffer.
    New(Vec<u8>),
}

impl Verdict {
    /// Applies the verdict to the frame still sitting in its hardware buffer.
    ///
    /// A rewrite that fits the buffer is written in place; a longer one releases
    /// the original and goes out in a fresh buffer.
    pub fn apply(self, frame: &mut RxFrame<'_>) -> Disposition {
        match self {
            Verdict::Drop => Disposition::Drop,
            Verdict::Pass => Disposition::Transmit,
            Verdict::Rewrite(bytes) => {
                if frame.overwrite(&bytes) {
                    Disposition::Transmit
                } else {
                    log::debug!(
                        "rewrite of {} bytes does not fit a {} byte buffer, reallocating",
                        bytes.len(),
                        frame.capacity()
                    );
                    Disposition::Replace(bytes)
                }
            }
            Verdict::New(bytes) => Disposition::Replace(bytes),
        }
    }
}

/// Completion signal for the frame currently held by the adapter.
///
/// The sender is taken on first use, so a frame can be resolved at most once.
#[derive(Debug)]
pub(crate) struct VerdictSlot(Option<oneshot::Sender<Verdict>>);

impl VerdictSlot {
    pub(crate) fn new(reply: oneshot::Sender<Verdict>) -> Self {
        VerdictSlot(Some(reply))
    }

    /// Delivers `verdict`. Returns `false` if the slot was already resolved.
    ///
    /// A verdict for an engine that has already gone away still counts as delivered.
    pub(crate) fn resolve(&mut self, verdict: Verdict) -> bool {
        match self.0.take() {
            Some(reply) => {
                if reply.send(verdict).is_err() {
                    log::debug!("engine stopped before the verdict arrived");
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.0.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_that_fits_is_applied_in_place() {
        let mut buf = [0u8; 16];
        buf[..4].copy_from_slice(&[1, 2, 3, 4]);
        let mut frame = RxFrame::new(&mut buf, 4);
        let disposition = Verdict::Rewrite(vec![9; 8]).apply(&mut frame);
        assert_eq!(disposition, Disposition::Transmit);
        assert_eq!(frame.bytes(), &[9; 8]);
    }

    #[test]
    fn rewrite_that_does_not_fit_is_reallocated() {
        let mut buf = [1u8, 2, 3, 4];
        let mut frame = RxFrame::new(&mut buf, 4);
        let disposition = Verdict::Rewrite(vec![9; 5]).apply(&mut frame);
        assert_eq!(disposition, Disposition::Replace(vec![9; 5]));
        assert_eq!(frame.bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn new_always_replaces() {
        let mut buf = [0u8; 64];
        let mut frame = RxFrame::new(&mut buf, 10);
        assert_eq!(
            Verdict::New(vec![5; 3]).apply(&mut frame),
            Disposition::Replace(vec![5; 3])
        );
    }

    #[test]
    fn slot_resolves_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut slot = VerdictSlot::new(tx);
        assert!(slot.resolve(Verdict::Pass));
        assert!(slot.is_resolved());
        assert!(!slot.resolve(Verdict::Drop));
        assert_eq!(rx.try_recv().unwrap(), Verdict::Pass);
    }
}
