//! # Lifecycle Controller
//!
//! ## Purpose
//!
//! `Router` owns the order in which the other components come up and go down:
//! bind the interface, open the polling engine, start dispatching; and in reverse,
//! stop dispatching, stop the engine, give the interface back.
//!
//! ## How it works
//!
//! The dispatch loop runs on the `xdp-dispatch` thread inside a current-thread tokio
//! runtime. Each run gets a child of the router's shutdown token. `suspend` cancels the
//! child and joins the thread, which hands back the loop and the handler so `resume`
//! can start them again. `close` cancels the parent token, joins, closes the queue
//! adapter and runs the binder's restore steps. Joining is the completion barrier: a
//! frame that was being decided when the token fired has its verdict delivered before
//! the thread exits.
//!
//! ## State machine
//!
//! ```text
//! Created --start--> Bound --(engine opened)--> Running <--suspend/resume--> Suspended
//!    \                 \                           |                            |
//!     `-----------------`----------close-----------'--------------close--------'--> Closed
//! ```

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;

use crate::binder::{self, BindingInfo, NetOps, PlatformNetOps};
use crate::config::RouterConfig;
use crate::dispatch::{DispatchLoop, DispatchStats, LoopExit, StatsSnapshot};
use crate::engine::{PacketEngine, XskEngine};
use crate::error::{Result, RouterError};
use crate::handler::Handler;
use crate::queue::QueueAdapter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Created,
    Bound,
    Running,
    Suspended,
    Closed,
}

/// The loop and its handler while no thread is running them.
struct Parked {
    dispatch: DispatchLoop,
    handler: Box<dyn Handler>,
}

/// Lifecycle controller for one intercepted interface.
pub struct Router<N: NetOps = PlatformNetOps> {
    net: N,
    config: RouterConfig,
    state: DriverState,
    binding: Option<BindingInfo>,
    shutdown: CancellationToken,
    run_token: Option<CancellationToken>,
    running: Option<JoinHandle<Parked>>,
    parked: Option<Parked>,
    stats: Option<Arc<DispatchStats>>,
}

impl Router<PlatformNetOps> {
    pub fn new(config: RouterConfig) -> Self {
        Router::with_net(PlatformNetOps::default(), config)
    }
}

impl<N: NetOps> Router<N> {
    /// Creates a router that performs OS calls through `net`.
    pub fn with_net(net: N, config: RouterConfig) -> Self {
        Router {
            net,
            config,
            state: DriverState::Created,
            binding: None,
            shutdown: CancellationToken::new(),
            run_token: None,
            running: None,
            parked: None,
            stats: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// What `close` will restore; `None` before the interface was bound.
    pub fn binding(&self) -> Option<&BindingInfo> {
        self.binding.as_ref()
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    /// Returns `true` while the dispatch thread runs. In `Running` this turns
    /// `false` only when the packet engine stopped on its own.
    pub fn is_dispatching(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Counters of the dispatch loop; all zero before the loop exists.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats
            .as_ref()
            .map(|stats| stats.snapshot())
            .unwrap_or_default()
    }

    /// Binds the interface, opens the AF_XDP engine on it and starts dispatching
    /// frames to `handler`.
    pub fn start<H: Handler>(&mut self, handler: H) -> Result<()> {
        self.start_with(handler, |binding, config| {
            XskEngine::open(binding.interface.if_index, &config.xsk)
        })
    }

    /// Like `start`, with the engine built by `open_engine` once the interface is bound.
    ///
    /// If `open_engine` fails the interface stays bound and the router stays in
    /// `Bound`; `close` restores it.
    pub fn start_with<H, E, F>(&mut self, handler: H, open_engine: F) -> Result<()>
    where
        H: Handler,
        E: PacketEngine,
        F: FnOnce(&BindingInfo, &RouterConfig) -> io::Result<E>,
    {
        if self.state != DriverState::Created {
            return Err(RouterError::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        self.config.validate()?;

        let binding = binder::prepare(&self.net, &self.config)?;
        let binding = self.binding.insert(binding);
        self.state = DriverState::Bound;

        let engine = open_engine(binding, &self.config).map_err(RouterError::Engine)?;
        let queue = QueueAdapter::open(engine).map_err(RouterError::Engine)?;
        let dispatch = DispatchLoop::new(queue);
        self.stats = Some(dispatch.stats());
        self.parked = Some(Parked {
            dispatch,
            handler: Box::new(handler),
        });

        self.spawn()?;
        log::info!(
            "router running on {} queue {}",
            self.config.interface,
            self.config.xsk.queue_id
        );
        Ok(())
    }

    /// Stops the loop and waits until it has returned. The frame being decided, if
    /// any, gets its verdict first.
    pub fn suspend(&mut self) -> Result<()> {
        match self.state {
            DriverState::Running => {}
            DriverState::Suspended => return Err(RouterError::AlreadySuspended),
            state => return Err(RouterError::InvalidState { op: "suspend", state }),
        }
        self.stop_loop()?;
        self.state = DriverState::Suspended;
        log::info!("router suspended");
        Ok(())
    }

    /// Restarts the suspended loop with the same handler.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != DriverState::Suspended {
            return Err(RouterError::InvalidState {
                op: "resume",
                state: self.state,
            });
        }
        self.spawn()?;
        log::info!("router resumed");
        Ok(())
    }

    /// Stops everything and restores the interface. Later calls do nothing.
    ///
    /// Every shutdown step runs even if an earlier one failed; restore failures are
    /// returned after the state has become `Closed`.
    pub fn close(&mut self) -> Result<()> {
        if self.state == DriverState::Closed {
            return Ok(());
        }
        log::info!("closing router on {}", self.config.interface);
        self.shutdown.cancel();
        if let Err(e) = self.stop_loop() {
            log::error!("dispatch loop did not stop cleanly: {e}");
        }
        if let Some(parked) = self.parked.take() {
            if let Err(e) = parked.dispatch.into_queue().close() {
                log::error!("packet engine stopped with an error: {e}");
            }
        }

        let restored = match self.binding.as_ref() {
            Some(binding) => binder::restore(&self.net, binding),
            None => Ok(()),
        };
        self.state = DriverState::Closed;
        match restored {
            Ok(()) => {
                log::info!("router closed, {} restored", self.config.interface);
                Ok(())
            }
            Err(e) => {
                log::error!("{e}");
                Err(e.into())
            }
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let Some(mut parked) = self.parked.take() else {
            return Err(RouterError::InvalidState {
                op: "spawn",
                state: self.state,
            });
        };
        let runtime = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.parked = Some(parked);
                return Err(e.into());
            }
        };
        let token = self.shutdown.child_token();
        let stop = token.clone();
        let handle = std::thread::Builder::new()
            .name("xdp-dispatch".into())
            .spawn(move || {
                match runtime.block_on(parked.dispatch.run(parked.handler.as_mut(), &stop)) {
                    LoopExit::Stopped => log::debug!("dispatch thread exits"),
                    LoopExit::Drained => {
                        log::error!("packet engine is gone, frames are no longer intercepted")
                    }
                }
                parked
            })?;
        self.run_token = Some(token);
        self.running = Some(handle);
        self.state = DriverState::Running;
        Ok(())
    }

    fn stop_loop(&mut self) -> Result<()> {
        if let Some(token) = self.run_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.running.take() {
            let parked = handle
                .join()
                .map_err(|_| io::Error::other("dispatch thread panicked"))?;
            self.parked = Some(parked);
        }
        Ok(())
    }
}

impl<N: NetOps> Drop for Router<N> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("failed to close router: {e}");
        }
    }
}
