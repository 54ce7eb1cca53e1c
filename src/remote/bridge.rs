//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name                   | Description                                      | Key Methods        |
// |------------------------|--------------------------------------------------|--------------------|
// | RemoteTransport        | Publishes envelopes to a broker topic            | publish            |
// | RemoteBridge           | Correlates outgoing messages with their answers  | send_remote        |
// |                        |                                                  | receive_before     |
// |                        |                                                  | receive_after      |
// | RemoteEnvelopeMediator | Feeds envelopes dispatched on the bridge topics  | handle_message     |
//--------------------------------------------------------------------------------------------------

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::{InMemoryMessageCache, LocalMessageCache};
use super::envelope::{MessageWrap, RemoteMessage, RemoteResult};
use crate::notice::context::HandlerContext;
use crate::notice::error::{BridgeError, HandlerError, HandlerResult};
use crate::notice::facade::{Facade, WeakFacade};
use crate::notice::mediator::Mediator;
use crate::notice::message::{EventId, Message, Payload};

/// Event dispatched when an answer arrives for a correlation id this node does not know.
/// The body is the full envelope.
pub const UNPROCESSED_REMOTE_MESSAGE: &str = "remote_processed_message";

/// Broker side of the bridge.
pub trait RemoteTransport: Send + Sync {
    fn publish(&self, envelope: &MessageWrap, topic: &str) -> Result<(), BridgeError>;
}

/// Sends messages to other processes and routes their answers back to the local results.
///
/// Outgoing messages go to the *before* topic. A node that receives one dispatches it and
/// publishes the filled-in results to the *after* topic, where the sender completes its
/// blocking results and callbacks.
pub struct RemoteBridge {
    before_topic: String,
    after_topic: String,
    transport: Arc<dyn RemoteTransport>,
    cache: Arc<dyn LocalMessageCache>,
    facade: OnceLock<WeakFacade>,
}

impl RemoteBridge {
    pub fn new(before_topic: impl Into<String>, after_topic: impl Into<String>, transport: Arc<dyn RemoteTransport>) -> Self {
        Self::with_cache(before_topic, after_topic, transport, Arc::new(InMemoryMessageCache::new()))
    }

    pub fn with_cache(
        before_topic: impl Into<String>,
        after_topic: impl Into<String>,
        transport: Arc<dyn RemoteTransport>,
        cache: Arc<dyn LocalMessageCache>,
    ) -> Self {
        Self {
            before_topic: before_topic.into(),
            after_topic: after_topic.into(),
            transport,
            cache,
            facade: OnceLock::new(),
        }
    }

    pub fn before_topic(&self) -> &str {
        &self.before_topic
    }

    pub fn after_topic(&self) -> &str {
        &self.after_topic
    }

    /// Messages sent and still waiting for an answer.
    pub fn in_flight(&self) -> usize {
        self.cache.len()
    }

    /// Binds the bridge to `facade`. A bridge serves exactly one facade.
    pub(crate) fn attach(&self, facade: &Facade) -> bool {
        self.facade.set(facade.downgrade()).is_ok()
    }

    fn facade(&self) -> Result<Facade, BridgeError> {
        self.facade
            .get()
            .and_then(Facade::upgrade)
            .filter(|facade| !facade.is_disposed())
            .ok_or(BridgeError::NotAttached)
    }

    /// Publishes `msg` on the before topic under a fresh correlation id.
    ///
    /// The message stays cached until its answer arrives, so its blocking results and callback
    /// can be completed then.
    pub fn send_remote(&self, msg: Arc<Message>) -> Result<(), BridgeError> {
        let remote = RemoteMessage::from_local(&msg)?;
        let correlation_id = Uuid::new_v4().to_string();
        let envelope = MessageWrap::new(correlation_id.clone(), remote);

        self.cache.add(correlation_id.clone(), msg);
        if let Err(e) = self.transport.publish(&envelope, &self.before_topic) {
            self.cache.remove(&correlation_id);
            error!("Failed to send event {} remotely: {}", envelope.message.what, e);
            return Err(e);
        }
        debug!(
            "Sent event {} remotely with correlation id {}",
            envelope.message.what, correlation_id
        );
        Ok(())
    }

    /// Handles an envelope read from the before topic.
    ///
    /// If the envelope is one this node sent, the cached original is dispatched locally and no
    /// answer is published. Otherwise the message is rebuilt, dispatched, and its results are
    /// published to the after topic.
    pub fn receive_before(&self, envelope: MessageWrap) -> Result<(), BridgeError> {
        let facade = self.facade()?;
        if let Some(local) = self.cache.remove(&envelope.correlation_id) {
            debug!(
                "Envelope {} originated here, dispatching event {} locally",
                envelope.correlation_id,
                local.what()
            );
            let outcome = facade.dispatch_checked(&local);
            Message::recycle(local);
            return outcome.map_err(|_| BridgeError::NotAttached);
        }

        let MessageWrap {
            correlation_id,
            mut message,
        } = envelope;
        let local = message.to_local();
        facade.dispatch_checked(&local).map_err(|_| BridgeError::NotAttached)?;
        message.collect_results(&local);

        let answer = MessageWrap::new(correlation_id, message);
        self.transport.publish(&answer, &self.after_topic).inspect_err(|e| {
            error!("Failed to publish answer {}: {}", answer.correlation_id, e);
        })
    }

    /// Handles an envelope read from the after topic.
    ///
    /// Each correlation id completes at most once. An unknown id is redispatched as
    /// [`UNPROCESSED_REMOTE_MESSAGE`].
    pub fn receive_after(&self, envelope: MessageWrap) -> Result<(), BridgeError> {
        let facade = self.facade()?;
        let Some(local) = self.cache.remove(&envelope.correlation_id) else {
            warn!(
                "No pending message for correlation id {}, forwarding as {}",
                envelope.correlation_id, UNPROCESSED_REMOTE_MESSAGE
            );
            let body = envelope.to_payload()?;
            let fallback = Message::new(UNPROCESSED_REMOTE_MESSAGE).with_body(body);
            return facade.dispatch_checked(&fallback).map_err(|_| BridgeError::NotAttached);
        };

        for (name, result) in envelope.message.results {
            match (local.result(&name), result) {
                (Some(slot), result) if slot.kind().is_blocking() => {
                    slot.set(answered_value(result));
                }
                (_, RemoteResult::Callback { handler, value }) => {
                    local.set_callback_result(&handler, value);
                    if catch_unwind(AssertUnwindSafe(|| local.fire_callback(&handler))).is_err() {
                        error!("Callback for {} panicked on answer {}", handler, envelope.correlation_id);
                    }
                }
                (_, RemoteResult::Pending | RemoteResult::Value { .. }) => {
                    debug!("Ignoring result {} of answer {}", name, envelope.correlation_id);
                }
            }
        }
        info!("Completed remote event {} ({})", local.what(), envelope.correlation_id);
        Message::recycle(local);
        Ok(())
    }
}

/// Value written into a local blocking result. An unanswered result completes with null.
fn answered_value(result: RemoteResult) -> Payload {
    match result {
        RemoteResult::Pending => Payload::Null,
        RemoteResult::Value { value } | RemoteResult::Callback { value, .. } => value,
    }
}

/// Routes envelopes dispatched on the bridge topics into the bridge.
///
/// Lets a broker consumer dispatch `Message::new(topic, envelope_json)` into the facade
/// instead of holding the bridge itself.
pub struct RemoteEnvelopeMediator {
    bridge: Arc<RemoteBridge>,
}

impl RemoteEnvelopeMediator {
    pub fn new(bridge: Arc<RemoteBridge>) -> Self {
        Self { bridge }
    }
}

impl Mediator for RemoteEnvelopeMediator {
    fn interests(&self) -> Vec<EventId> {
        vec![
            EventId::from(self.bridge.before_topic()),
            EventId::from(self.bridge.after_topic()),
        ]
    }

    fn handle_message(&self, msg: &Message, _ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let body = msg
            .body()
            .ok_or_else(|| HandlerError::failed("remote envelope without body"))?;
        let envelope = MessageWrap::from_payload(body).map_err(|e| HandlerError::failed(e.to_string()))?;

        let received = if msg.what() == &EventId::from(self.bridge.before_topic()) {
            self.bridge.receive_before(envelope)
        } else {
            self.bridge.receive_after(envelope)
        };
        received.map_err(|e| HandlerError::failed(e.to_string()))
    }
}
