//! # Decision Functions
//!
//! A `Handler` decides what happens to every frame the router intercepts. The dispatch
//! loop calls it sequentially from a single thread, so implementations may keep mutable
//! state without locking. Closures of the form `FnMut(&mut Metadata) -> Result<Action,
//! HandlerError>` implement the trait directly.

pub mod rewriter;

pub use rewriter::Rewriter;

use crate::error::HandlerError;
use crate::packet::{Action, Metadata};

/// The external decision function.
pub trait Handler: Send + 'static {
    /// Returns the action for the frame wrapped by `meta`.
    ///
    /// For `Action::Rewrite` and `Action::New` the replacement bytes are taken from
    /// `meta.frame`. Returning an error drops the frame.
    fn handle(&mut self, meta: &mut Metadata) -> Result<Action, HandlerError>;
}

impl<F> Handler for F
where
    F: FnMut(&mut Metadata) -> Result<Action, HandlerError> + Send + 'static,
{
    fn handle(&mut self, meta: &mut Metadata) -> Result<Action, HandlerError> {
        self(meta)
    }
}
