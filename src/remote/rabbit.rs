use std::sync::Arc;

use rabbitmq::{
    ConsumerMessage, Message as RabbitMessage, PublisherContext, PublisherDispatcher, RabbitConnection, RabbitMQError,
    TopicPublisher, TopicSubscription, routing_key,
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bridge::{RemoteBridge, RemoteTransport};
use super::envelope::MessageWrap;
use crate::notice::error::BridgeError;

/// [`RemoteTransport`] that publishes JSON envelopes to a RabbitMQ topic exchange.
#[derive(Clone)]
pub struct RabbitTransport {
    dispatcher: PublisherDispatcher,
}

impl RabbitTransport {
    pub fn new(publisher: &TopicPublisher) -> Self {
        Self {
            dispatcher: publisher.get_dispatcher(),
        }
    }
}

impl RemoteTransport for RabbitTransport {
    fn publish(&self, envelope: &MessageWrap, topic: &str) -> Result<(), BridgeError> {
        let content = envelope.encode()?;
        let ctx = PublisherContext::new(&envelope.correlation_id, Some(envelope.correlation_id.clone()));
        self.dispatcher
            .publish(RabbitMessage::new(content, topic), ctx)
            .map_err(|e| BridgeError::Publish {
                correlation_id: envelope.correlation_id.clone(),
                topic: topic.to_owned(),
                reason: e.to_string(),
            })
    }
}

/// Consumes the bridge's before and after topics and feeds each envelope to the bridge.
pub struct RabbitBridgeConsumer {
    bridge: Arc<RemoteBridge>,
    subscription: TopicSubscription,
}

impl RabbitBridgeConsumer {
    /// Binds a fresh queue on `exchange` to both bridge topics.
    pub async fn bind(conn: &RabbitConnection, exchange: &str, bridge: Arc<RemoteBridge>) -> Result<Self, RabbitMQError> {
        let topics = [bridge.before_topic(), bridge.after_topic()];
        let subscription = conn.topic_subscription(exchange, &topics, false).await?;
        info!(
            "Bridge consumer listening on {} ({}, {})",
            subscription.queue_name(),
            topics[0],
            topics[1]
        );
        Ok(Self { bridge, subscription })
    }

    /// Processes deliveries until `cancel` fires or the broker closes the channel.
    ///
    /// Envelopes are handled one at a time, in delivery order, on the blocking pool.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), RabbitMQError> {
        loop {
            select! {
                _ = cancel.cancelled() => {
                    debug!("bridge consumer cancelled");
                    break;
                }
                delivery = self.subscription.receive() => {
                    let Some(delivery) = delivery else {
                        warn!("bridge consumer channel closed by broker");
                        break;
                    };
                    self.handle(&delivery).await;
                    self.subscription.ack(&delivery).await?;
                }
            }
        }
        self.subscription.close().await
    }

    async fn handle(&self, delivery: &ConsumerMessage) {
        let Some(topic) = routing_key(delivery).map(str::to_owned) else {
            warn!("Delivery without routing key, skipping");
            return;
        };
        let envelope = match delivery.content.as_deref().map(MessageWrap::decode) {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => {
                error!("Dropping undecodable envelope on {}: {}", topic, e);
                return;
            }
            None => {
                warn!("Empty delivery on {}, skipping", topic);
                return;
            }
        };

        let bridge = Arc::clone(&self.bridge);
        let received = tokio::task::spawn_blocking(move || {
            if topic == bridge.before_topic() {
                bridge.receive_before(envelope)
            } else if topic == bridge.after_topic() {
                bridge.receive_after(envelope)
            } else {
                debug!("Ignoring delivery on unrelated topic {}", topic);
                Ok(())
            }
        })
        .await;

        match received {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Bridge failed to process envelope: {}", e),
            Err(e) => error!("Bridge task ended abnormally: {}", e),
        }
    }
}
