//! # Router Error Types
//!
//! Startup errors (`InterfaceNotFound`, `NoAddressBound`, `BindFailed`, `Engine`) are
//! returned from `Router::start`. Shutdown problems are collected into a `RestoreError`
//! after every restore step has run. Per-frame failures never leave the dispatch loop;
//! they are represented by `HandlerError` and only logged.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::lifecycle::DriverState;

/// Errors surfaced by the router's public operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The configured interface name does not resolve to a link.
    #[error("network interface {0} not found")]
    InterfaceNotFound(String),

    /// The interface has no IP address that could be restored later.
    #[error("network interface {0} has no address bound")]
    NoAddressBound(String),

    /// The configuration is unusable (bad engine name, malformed value, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Binding the interface to the target driver failed.
    #[error("failed to bind {interface} to driver {driver}: {source}")]
    BindFailed {
        interface: String,
        driver: String,
        #[source]
        source: io::Error,
    },

    /// The polling engine could not be opened on the bound interface.
    #[error("failed to open packet engine: {0}")]
    Engine(#[source] io::Error),

    /// One or more restore steps failed while closing the router.
    #[error(transparent)]
    Restore(#[from] RestoreError),

    /// `suspend` was called on a router that is already suspended.
    #[error("router is already suspended")]
    AlreadySuspended,

    /// The requested operation is not allowed in the current state.
    #[error("operation {op} is not allowed in state {state:?}")]
    InvalidState { op: &'static str, state: DriverState },

    /// Any other OS-level failure (thread spawn, runtime creation, netlink query).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Error returned by a decision function for one frame.
///
/// The frame is dropped and the next frame is processed normally.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}

impl From<etherparse::err::LenError> for HandlerError {
    fn from(e: etherparse::err::LenError) -> Self {
        HandlerError(format!("malformed frame: {e}"))
    }
}

/// One failed step of interface restoration.
#[derive(Debug)]
pub enum RestoreStep {
    /// Rebinding the device to its original driver.
    Rebind,
    /// Bringing the link administratively up.
    LinkUp,
    /// Reassigning the recorded address.
    Address,
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreStep::Rebind => f.write_str("rebind original driver"),
            RestoreStep::LinkUp => f.write_str("bring link up"),
            RestoreStep::Address => f.write_str("restore address"),
        }
    }
}

/// Every restore step that failed, in the order they were attempted.
#[derive(Debug, Default, Error)]
pub struct RestoreError {
    pub interface: String,
    pub failures: Vec<(RestoreStep, io::Error)>,
}

impl fmt::Display for RestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to restore {}:", self.interface)?;
        for (step, err) in &self.failures {
            write!(f, " [{step}: {err}]")?;
        }
        Ok(())
    }
}

impl RestoreError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
