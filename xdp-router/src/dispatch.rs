//! # Dispatch Loop
//!
//! ## Purpose
//!
//! The single consumer of the queue adapter and the only caller of the decision
//! function. Every frame it receives gets exactly one verdict before the next frame is
//! pulled.
//!
//! ## How it works
//!
//! `run` waits, biased towards the stop token, for either cancellation or the next
//! frame. A frame is wrapped in the loop's reusable `Metadata`, handed to the handler,
//! and the resulting `Action` is turned into a `Verdict`. Handler errors and unknown
//! actions become `Drop`; neither ends the loop. Cancellation is only observed between
//! frames, so a frame already received always has its verdict delivered first.
//!
//! The loop value survives a suspend: the controller gets it back when the loop thread
//! is joined and calls `run` again with a fresh token on resume.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::handler::Handler;
use crate::packet::{Action, Frame, Metadata};
use crate::queue::{QueueAdapter, Verdict};

/// Counters shared between the loop and the controller.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    passed: AtomicU64,
    rewritten: AtomicU64,
    injected: AtomicU64,
    dropped: AtomicU64,
    decision_errors: AtomicU64,
    unknown_actions: AtomicU64,
}

/// Point-in-time copy of `DispatchStats`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub passed: u64,
    pub rewritten: u64,
    pub injected: u64,
    pub dropped: u64,
    pub decision_errors: u64,
    pub unknown_actions: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            rewritten: self.rewritten.load(Ordering::Relaxed),
            injected: self.injected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decision_errors: self.decision_errors.load(Ordering::Relaxed),
            unknown_actions: self.unknown_actions.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Why `run` returned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop token was cancelled.
    Stopped,
    /// The adapter will not produce more frames.
    Drained,
}

pub struct DispatchLoop {
    queue: QueueAdapter,
    meta: Metadata,
    sequence: u64,
    stats: Arc<DispatchStats>,
}

impl DispatchLoop {
    pub fn new(queue: QueueAdapter) -> Self {
        let meta = Metadata::new(queue.if_index(), queue.queue_id());
        DispatchLoop {
            queue,
            meta,
            sequence: 0,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Processes frames until `stop` is cancelled or the adapter runs dry.
    pub async fn run(&mut self, handler: &mut dyn Handler, stop: &CancellationToken) -> LoopExit {
        log::debug!("dispatch loop running on queue {}", self.queue.queue_id());
        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    log::debug!("dispatch loop stopped");
                    return LoopExit::Stopped;
                }
                frame = self.queue.receive() => match frame {
                    Some(frame) => frame,
                    None => {
                        log::warn!("packet engine stopped, dispatch loop exits");
                        return LoopExit::Drained;
                    }
                },
            };
            let verdict = self.decide(handler, frame);
            self.queue.accept_verdict(verdict);
        }
    }

    fn decide(&mut self, handler: &mut dyn Handler, frame: Frame) -> Verdict {
        bump(&self.stats.received);
        self.meta.reset();
        self.meta.sequence = self.sequence;
        self.sequence += 1;
        self.meta.set_frame(frame);

        let verdict = match handler.handle(&mut self.meta) {
            Err(e) => {
                log::warn!("decision failed for frame #{}: {e}", self.meta.sequence);
                bump(&self.stats.decision_errors);
                Verdict::Drop
            }
            Ok(Action::Drop) => Verdict::Drop,
            // The original hardware bytes go out; edits to `meta.frame` are ignored.
            Ok(Action::Pass) => {
                bump(&self.stats.passed);
                Verdict::Pass
            }
            Ok(Action::Rewrite) => {
                bump(&self.stats.rewritten);
                Verdict::Rewrite(self.meta.take_frame().into_bytes())
            }
            Ok(Action::New) => {
                bump(&self.stats.injected);
                Verdict::New(self.meta.take_frame().into_bytes())
            }
            Ok(Action::Unknown(code)) => {
                log::warn!(
                    "unknown action {code} for frame #{}, dropping",
                    self.meta.sequence
                );
                bump(&self.stats.unknown_actions);
                Verdict::Drop
            }
        };
        if verdict == Verdict::Drop {
            bump(&self.stats.dropped);
        }
        verdict
    }

    /// Gives back the adapter so it can be closed.
    pub fn into_queue(self) -> QueueAdapter {
        self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_every_counter() {
        let stats = DispatchStats::default();
        bump(&stats.received);
        bump(&stats.received);
        bump(&stats.dropped);
        bump(&stats.unknown_actions);
        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.unknown_actions, 1);
        assert_eq!(snap.passed, 0);
    }
}
