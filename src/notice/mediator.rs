use std::any::Any;

use super::context::HandlerContext;
use super::error::HandlerResult;
use super::facade::Facade;
use super::message::{EventId, Message};

/// Long-lived, named handler that declares the events it wants.
///
/// Unlike commands, one mediator instance serves every dispatch, possibly from several threads
/// at once, so any mutable state needs its own synchronization.
pub trait Mediator: Any + Send + Sync {
    /// Registration name. `None` registers under the type name.
    fn name(&self) -> Option<String> {
        None
    }

    /// Events routed to this mediator. Read once at registration.
    fn interests(&self) -> Vec<EventId>;

    fn handle_message(&self, msg: &Message, ctx: &mut HandlerContext<'_>) -> HandlerResult;

    fn on_register(&self, _facade: &Facade) {}

    fn on_remove(&self) {}
}
