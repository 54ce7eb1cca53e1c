use std::sync::Arc;

use super::error::DispatchResult;
use super::facade::{DispatchMode, Facade};
use super::message::{EventId, Message, Payload};
use super::proxy::Proxy;

/// Per-invocation view handed to commands and mediators.
///
/// A handler reports a callback value through
/// [`return_callback_result`](Self::return_callback_result); the dispatcher stores it on the
/// message under this handler's id once the handler returns.
pub struct HandlerContext<'a> {
    facade: &'a Facade,
    event: &'a EventId,
    handler: &'a str,
    callback_value: Option<Payload>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(facade: &'a Facade, event: &'a EventId, handler: &'a str) -> Self {
        Self {
            facade,
            event,
            handler,
            callback_value: None,
        }
    }

    /// Facade running this dispatch.
    pub fn facade(&self) -> &Facade {
        self.facade
    }

    pub fn event(&self) -> &EventId {
        self.event
    }

    /// Identity of the running handler.
    pub fn handler_id(&self) -> &str {
        self.handler
    }

    /// Hands `value` back to the producer's callback. A second call overwrites the first.
    pub fn return_callback_result(&mut self, value: impl Into<Payload>) {
        self.callback_value = Some(value.into());
    }

    pub(crate) fn take_callback_result(&mut self) -> Option<Payload> {
        self.callback_value.take()
    }

    /// Dispatches another message synchronously through the same facade.
    pub fn send(&self, msg: impl Into<Arc<Message>>) -> DispatchResult<()> {
        self.facade.send(msg)
    }

    pub fn send_with(&self, msg: impl Into<Arc<Message>>, mode: DispatchMode) -> DispatchResult<()> {
        self.facade.send_with(msg, mode)
    }

    pub fn retrieve_proxy<P: Proxy>(&self, name: &str) -> Option<Arc<P>> {
        self.facade.retrieve_proxy::<P>(name)
    }
}
