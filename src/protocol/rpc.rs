//! Named remote-procedure dispatch for ExecuteRpc messages.
//!
//! Uses `Cow<'static, str>` keys so built-in procedure names avoid heap
//! allocations in the lookup path. Unlike the stage registry, an unknown
//! RPC name is not a protocol violation: gameplay scripts come and go
//! independently of protocol versions, so unknown names are logged and
//! dropped.

use std::borrow::Cow;
use std::collections::HashMap;
use tracing::warn;

type RpcFn<Ctx> = dyn Fn(&mut Ctx) + Send + 'static;

/// Table of named procedures invocable by ExecuteRpc messages.
pub struct RpcDispatcher<Ctx> {
    handlers: HashMap<Cow<'static, str>, Box<RpcFn<Ctx>>>,
}

impl<Ctx> Default for RpcDispatcher<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> RpcDispatcher<Ctx> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<Cow<'static, str>>, handler: F)
    where
        F: Fn(&mut Ctx) + Send + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    /// Invoke the named procedure. Returns whether a handler existed.
    pub fn dispatch(&self, name: &str, ctx: &mut Ctx) -> bool {
        match self.handlers.get(name) {
            Some(handler) => {
                handler(ctx);
                true
            }
            None => {
                warn!(rpc = name, "dropping call to unregistered procedure");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
