//! Orca Action Dispatch
//!
//! Turns bus events into business handler invocations:
//! - `bus`: publish/subscribe contract and an in-process implementation
//! - `dispatcher`: per-domain routing with the `requested`-only guard
//! - `router`: several domain dispatchers in one process
//! - `listener`: one subscription task per domain until shutdown

pub mod bus;
pub mod dispatcher;
pub mod listener;
pub mod router;

pub use bus::{BusEvent, EventBus, EventFilter, InMemoryEventBus, Subscription};
pub use dispatcher::{handler_fn, ActionDispatcher, ActionHandler, DispatchOutcome, RequestedOnly};
pub use listener::BusListener;
pub use router::DispatchRouter;

use orca_taxonomy::TaxonomyError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Returned by business handlers.
    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Ledger(#[from] orca_ledger::LedgerError),

    #[error(transparent)]
    Common(#[from] orca_common::OrcaError),
}

impl DispatchError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
