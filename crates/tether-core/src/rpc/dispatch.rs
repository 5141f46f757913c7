//! Method-name → handler lookup.
//!
//! The table is built once at startup with [`DispatchTableBuilder`] and is
//! immutable afterwards, so it can be shared behind an `Arc` by every
//! connection without a lock.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::codec::{decode_method_name, is_valid_method_name, ProtocolError};
use crate::protocol::messages::RequestHeader;
use crate::rpc::method::{CallOutcome, MethodInterface};

/// Errors raised while building a dispatch table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("method {0:?} is registered twice")]
    DuplicateMethod(String),

    #[error("method name {0:?} cannot be carried on the wire")]
    InvalidMethodName(String),
}

/// One remotely callable method.
///
/// `C` is the per-connection context the handler operates on (for the device
/// server, the session).  Plain functions with the signature
/// `fn(&mut MethodInterface<'_>, &C)` implement this trait.
pub trait MethodHandler<C>: Send + Sync {
    fn call(&self, mi: &mut MethodInterface<'_>, ctx: &C);
}

impl<C, F> MethodHandler<C> for F
where
    F: Fn(&mut MethodInterface<'_>, &C) + Send + Sync,
{
    fn call(&self, mi: &mut MethodInterface<'_>, ctx: &C) {
        self(mi, ctx)
    }
}

/// Closed set of methods keyed by exact, case-sensitive name.
pub struct DispatchTable<C> {
    handlers: HashMap<String, Box<dyn MethodHandler<C>>>,
}

impl<C> DispatchTable<C> {
    pub fn builder() -> DispatchTableBuilder<C> {
        DispatchTableBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered method names, in no particular order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs one request to its terminal outcome.
    ///
    /// Malformed headers and unknown methods produce a protocol error without
    /// running any handler.
    pub fn dispatch(
        &self,
        header: &RequestHeader,
        body: &[u8],
        tx_budget: usize,
        ctx: &C,
    ) -> CallOutcome {
        let declared = header.body_len as usize;
        if body.len() != declared {
            return CallOutcome::ProtocolError(ProtocolError::PayloadLengthMismatch {
                declared,
                available: body.len(),
            });
        }

        let name = match decode_method_name(&header.method) {
            Ok(name) => name,
            Err(e) => {
                warn!(request_id = header.request_id, error = %e, "rejecting request");
                return CallOutcome::ProtocolError(e);
            }
        };

        let Some(handler) = self.handlers.get(name) else {
            warn!(request_id = header.request_id, method = name, "unknown method");
            return CallOutcome::ProtocolError(ProtocolError::UnknownMethod(name.to_string()));
        };

        let mut mi =
            MethodInterface::new(header.request_id, name, body, header.param_count, tx_budget);
        handler.call(&mut mi, ctx);
        let outcome = mi.into_outcome();

        debug!(
            request_id = header.request_id,
            method = name,
            outcome = ?outcome.reply_outcome(),
            "call finished"
        );
        outcome
    }
}

impl<C> fmt::Debug for DispatchTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.method_names().collect();
        names.sort_unstable();
        f.debug_struct("DispatchTable").field("methods", &names).finish()
    }
}

/// Collects handlers and validates names before freezing them into a
/// [`DispatchTable`].
pub struct DispatchTableBuilder<C> {
    handlers: HashMap<String, Box<dyn MethodHandler<C>>>,
}

impl<C> DispatchTableBuilder<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Adds `handler` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidMethodName`] if the name does not fit
    /// the 31-byte ASCII wire field, or [`DispatchError::DuplicateMethod`] if
    /// it is already registered.
    pub fn register<H>(mut self, name: &str, handler: H) -> Result<Self, DispatchError>
    where
        H: MethodHandler<C> + 'static,
    {
        if !is_valid_method_name(name) {
            return Err(DispatchError::InvalidMethodName(name.to_string()));
        }
        if self.handlers.contains_key(name) {
            return Err(DispatchError::DuplicateMethod(name.to_string()));
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(self)
    }

    pub fn build(self) -> DispatchTable<C> {
        DispatchTable {
            handlers: self.handlers,
        }
    }
}

impl<C> Default for DispatchTableBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
