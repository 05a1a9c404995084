//! # Hardware Queue Adapter
//!
//! ## Purpose
//!
//! Turns the blocking per-frame callback of a `PacketEngine` into an async receive
//! channel plus a synchronous verdict call, so the dispatch loop can wait for frames
//! and for a stop signal at the same time.
//!
//! ## How it works
//!
//! `QueueAdapter::open` moves the engine onto the `xdp-rx` thread. For every frame the
//! engine callback copies the bytes into a `Frame`, pairs it with a fresh oneshot
//! sender and pushes both into a channel of capacity one, then blocks on the oneshot
//! receiver. `receive` pops the next pair and keeps the sender in a `VerdictSlot`;
//! `accept_verdict` resolves that slot, which unblocks the engine thread. The engine
//! applies the verdict to the frame while it still owns the hardware buffer.
//!
//! Closing raises the engine's stop flag and drops the channel. Every frame still
//! waiting for a verdict sees its sender disappear and is dropped by the engine.
//!
//! ## Main components
//!
//! - `QueueAdapter`: receive channel and verdict entry point.
//! - `Verdict`: the decision delivered for one frame.

mod verdict;

pub use verdict::Verdict;
pub(crate) use verdict::VerdictSlot;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::engine::{Disposition, PacketEngine, RxFrame};
use crate::packet::Frame;

/// A received frame and the channel its verdict travels back on.
struct InFlight {
    frame: Frame,
    reply: oneshot::Sender<Verdict>,
}

/// Receive channel and verdict entry point for one hardware queue.
pub struct QueueAdapter {
    if_index: u32,
    queue_id: u32,
    frames: Option<mpsc::Receiver<InFlight>>,
    current: Option<VerdictSlot>,
    stop: Arc<AtomicBool>,
    engine: Option<JoinHandle<io::Result<()>>>,
}

impl QueueAdapter {
    /// Starts `engine` on its own thread and returns the adapter feeding off it.
    pub fn open<E: PacketEngine>(mut engine: E) -> io::Result<Self> {
        let if_index = engine.if_index();
        let queue_id = engine.queue_id();
        let (tx, rx) = mpsc::channel::<InFlight>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let engine_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("xdp-rx".into())
            .spawn(move || {
                let mut on_frame = |frame: &mut RxFrame<'_>| -> Disposition {
                    let (reply, verdict) = oneshot::channel();
                    let in_flight = InFlight {
                        frame: Frame::copy_from(frame.bytes(), frame.capacity()),
                        reply,
                    };
                    if tx.blocking_send(in_flight).is_err() {
                        return Disposition::Drop;
                    }
                    match verdict.blocking_recv() {
                        Ok(verdict) => verdict.apply(frame),
                        Err(_) => Disposition::Drop,
                    }
                };
                let result = engine.run(&engine_stop, &mut on_frame);
                if let Err(ref e) = result {
                    log::error!("packet engine on queue {queue_id} failed: {e}");
                }
                result
            })?;

        log::debug!("queue adapter opened on interface {if_index} queue {queue_id}");
        Ok(QueueAdapter {
            if_index,
            queue_id,
            frames: Some(rx),
            current: None,
            stop,
            engine: Some(handle),
        })
    }

    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    /// Waits for the next frame. Returns `None` once the engine has stopped.
    ///
    /// Cancel-safe: a frame is only taken off the channel when the future completes.
    /// A frame left without a verdict by the previous call is dropped first.
    pub async fn receive(&mut self) -> Option<Frame> {
        if let Some(mut slot) = self.current.take() {
            if slot.resolve(Verdict::Drop) {
                log::warn!("frame received without a verdict, dropped");
            }
        }
        let InFlight { frame, reply } = self.frames.as_mut()?.recv().await?;
        self.current = Some(VerdictSlot::new(reply));
        Some(frame)
    }

    /// Delivers the verdict for the frame most recently returned by `receive`.
    ///
    /// Returns `false`, without effect, when that frame already has a verdict or no
    /// frame has been received.
    pub fn accept_verdict(&mut self, verdict: Verdict) -> bool {
        match self.current.as_mut() {
            Some(slot) => slot.resolve(verdict),
            None => false,
        }
    }

    /// Returns `true` while the last received frame still waits for its verdict.
    pub fn verdict_pending(&self) -> bool {
        self.current.as_ref().is_some_and(|slot| !slot.is_resolved())
    }

    /// Stops the engine and waits for its thread to exit.
    pub fn close(mut self) -> io::Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        let Some(handle) = self.engine.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);
        // Dropping the senders unblocks the engine thread with a Drop for every
        // frame still waiting.
        self.current = None;
        self.frames = None;
        let result = handle
            .join()
            .map_err(|_| io::Error::other("packet engine thread panicked"))?;
        log::debug!("queue adapter on queue {} closed", self.queue_id);
        result
    }
}

impl Drop for QueueAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("failed to close queue adapter: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Feeds a fixed list of frames, then idles until stopped.
    struct ListEngine {
        frames: VecDeque<Vec<u8>>,
        out: Arc<Mutex<Vec<Disposition>>>,
    }

    impl PacketEngine for ListEngine {
        fn if_index(&self) -> u32 {
            1
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
                match self.frames.pop_front() {
                    Some(mut bytes) => {
                        let len = bytes.len();
                        let mut frame = RxFrame::new(&mut bytes, len);
                        let d = on_frame(&mut frame);
                        self.out.lock().unwrap().push(d);
                    }
                    None => std::thread::sleep(std::time::Duration::from_millis(1)),
                }
            }
            Ok(())
        }
    }

    fn engine(frames: &[&[u8]]) -> (ListEngine, Arc<Mutex<Vec<Disposition>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let engine = ListEngine {
            frames: frames.iter().map(|f| f.to_vec()).collect(),
            out: out.clone(),
        };
        (engine, out)
    }

    #[tokio::test]
    async fn verdicts_reach_the_engine() {
        let (engine, out) = engine(&[&[1, 2], &[3, 4]]);
        let mut adapter = QueueAdapter::open(engine).unwrap();

        let frame = adapter.receive().await.unwrap();
        assert_eq!(&frame[..], &[1, 2]);
        assert!(adapter.verdict_pending());
        assert!(adapter.accept_verdict(Verdict::Pass));
        assert!(!adapter.verdict_pending());
        assert!(!adapter.accept_verdict(Verdict::Drop));

        let frame = adapter.receive().await.unwrap();
        assert_eq!(&frame[..], &[3, 4]);
        assert!(adapter.accept_verdict(Verdict::Drop));

        adapter.close().unwrap();
        assert_eq!(
            *out.lock().unwrap(),
            vec![Disposition::Transmit, Disposition::Drop]
        );
    }

    #[tokio::test]
    async fn verdict_without_frame_is_rejected() {
        let (engine, _) = engine(&[]);
        let mut adapter = QueueAdapter::open(engine).unwrap();
        assert!(!adapter.accept_verdict(Verdict::Pass));
    }

    #[tokio::test]
    async fn pending_frames_are_dropped_on_close() {
        let (engine, out) = engine(&[&[1], &[2]]);
        let mut adapter = QueueAdapter::open(engine).unwrap();
        let _ = adapter.receive().await.unwrap();
        adapter.close().unwrap();

        // The held frame is dropped; the second one may or may not have been
        // pulled from the engine before the stop flag was seen.
        let out = out.lock().unwrap();
        assert!(!out.is_empty());
        assert!(out.iter().all(|d| *d == Disposition::Drop));
    }
}
