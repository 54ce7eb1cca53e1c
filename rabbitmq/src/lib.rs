//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name                | Description                                          | Key Methods       |
// |---------------------|------------------------------------------------------|-------------------|
// | RabbitConnection    | Open broker connection                               | topic_publisher   |
// |                     |                                                      | topic_subscription|
// | TopicPublisher      | Publishes to a topic exchange from a background task | publish, close    |
// | PublisherDispatcher | Cloneable handle onto a TopicPublisher's task        | publish           |
// | TopicSubscription   | Exclusive queue bound to routing keys of an exchange | receive, ack      |
// | Message             | Content plus routing key                             |                   |
// | PublisherContext    | Per-message headers and ids                          |                   |
// | RabbitMQError       | Broker failures                                      |                   |
//--------------------------------------------------------------------------------------------------

use amqprs::{
    Ack, BasicProperties, Cancel, Close, FieldTable, Nack, Return, ShortStr,
    callbacks::{ChannelCallback, ConnectionCallback},
    channel::{
        BasicAckArguments, BasicConsumeArguments, BasicPublishArguments, Channel, ExchangeDeclareArguments,
        QueueBindArguments, QueueDeclareArguments,
    },
    connection::{Connection, OpenConnectionArguments},
};
use async_trait::async_trait;
use tokio::{
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub use amqprs::channel::ConsumerMessage;

/// An open connection to the broker.
///
/// Publishers and subscriptions created from it each get their own channel.
#[derive(Clone)]
pub struct RabbitConnection {
    conn: Connection,
    app_id: String,
}

impl RabbitConnection {
    /// Connects to the broker at `conn_str` (an `amqp://` URI).
    ///
    /// # Arguments
    /// * `conn_str` - Broker URI
    /// * `app_id` - Stamped on every published message
    pub async fn open(conn_str: &str, app_id: &str) -> Result<Self, RabbitMQError> {
        let conn = open_rabbit_connection(conn_str).await?;
        Ok(Self {
            conn,
            app_id: app_id.to_owned(),
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Declares the durable topic exchange `exchange` and returns a publisher for it.
    pub async fn topic_publisher(&self, exchange: &str) -> Result<TopicPublisher, RabbitMQError> {
        let channel = open_rabbit_channel(&self.conn).await?;
        declare_topic_exchange(&channel, exchange).await?;

        let msg_common_props = BasicProperties::default()
            .with_app_id(&self.app_id)
            .with_delivery_mode(2)
            .finish();

        Ok(TopicPublisher::new(exchange, msg_common_props, channel))
    }

    /// Declares `exchange` and an exclusive server-named queue bound to each of `topics`.
    ///
    /// # Arguments
    /// * `exchange` - Topic exchange name
    /// * `topics` - Routing keys (wildcards allowed) to bind
    /// * `auto_ack` - Whether the broker considers messages acknowledged on delivery
    pub async fn topic_subscription(
        &self,
        exchange: &str,
        topics: &[&str],
        auto_ack: bool,
    ) -> Result<TopicSubscription, RabbitMQError> {
        let channel = open_rabbit_channel(&self.conn).await?;
        declare_topic_exchange(&channel, exchange).await?;

        let (queue_name, _, _) = channel
            .queue_declare(QueueDeclareArguments::exclusive_server_named())
            .await
            .map_err(|err| RabbitMQError::QueueDeclarationError(err.to_string()))?
            .ok_or_else(|| RabbitMQError::QueueDeclarationError("broker returned no queue name".to_owned()))?;

        for topic in topics {
            let bind_args = QueueBindArguments::default()
                .queue(queue_name.clone())
                .exchange(exchange.to_owned())
                .routing_key((*topic).to_owned())
                .finish();
            channel
                .queue_bind(bind_args)
                .await
                .map_err(|err| RabbitMQError::QueueBindingError(err.to_string()))?;
        }

        let consume_args = BasicConsumeArguments::default()
            .queue(queue_name.clone())
            .auto_ack(auto_ack)
            .finish();
        let (_ctag, rx) = channel
            .basic_consume_rx(consume_args)
            .await
            .map_err(|err| RabbitMQError::SubscriptionError(err.to_string()))?;

        debug!("Queue {} bound to {} for {:?}", queue_name, exchange, topics);
        Ok(TopicSubscription {
            exchange: exchange.to_owned(),
            queue_name,
            consumer: rx,
            channel,
            auto_ack_flag: auto_ack,
        })
    }

    /// Closes the connection and every channel opened on it.
    pub async fn close(self) -> Result<(), RabbitMQError> {
        self.conn
            .close()
            .await
            .map_err(|err| RabbitMQError::ConnectionError(err.to_string()))
    }
}

async fn declare_topic_exchange(channel: &Channel, exchange: &str) -> Result<(), RabbitMQError> {
    let args = ExchangeDeclareArguments::new(exchange, "topic").durable(true).finish();
    channel
        .exchange_declare(args)
        .await
        .map_err(|err| RabbitMQError::ExchangeDeclarationError(err.to_string()))
}

/// Consumer of a topic exchange.
///
/// `close()` must be called for a graceful shutdown; dropping the subscription leaves its
/// channel open until the connection closes.
pub struct TopicSubscription {
    exchange: String,
    queue_name: String,
    consumer: UnboundedReceiver<ConsumerMessage>,
    channel: Channel,
    auto_ack_flag: bool,
}

impl TopicSubscription {
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Server-generated queue name
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Receives the next message, or `None` once the channel is closed.
    pub async fn receive(&mut self) -> Option<ConsumerMessage> {
        self.consumer.recv().await
    }

    /// Acknowledges `message`. Does nothing in auto-ack mode.
    ///
    /// # Errors
    /// Returns an error if the message lacks delivery information or if the acknowledgment fails
    pub async fn ack(&self, message: &ConsumerMessage) -> Result<(), RabbitMQError> {
        if self.auto_ack_flag {
            return Ok(());
        }

        let deliver_info = message.deliver.as_ref().ok_or(RabbitMQError::NotDeliveryTag)?;
        self.channel
            .basic_ack(BasicAckArguments::new(deliver_info.delivery_tag(), false))
            .await
            .map_err(|err| RabbitMQError::AckMessageError(err.to_string()))
    }

    pub async fn close(self) -> Result<(), RabbitMQError> {
        self.channel
            .close()
            .await
            .map_err(|err| RabbitMQError::CloseChannelError(err.to_string()))
    }
}

/// Routing key a message was delivered with.
pub fn routing_key(message: &ConsumerMessage) -> Option<&str> {
    message.deliver.as_ref().map(|deliver| deliver.routing_key().as_str())
}

struct RabbitPublishMessage(Vec<u8>, BasicProperties, BasicPublishArguments);

/// Publisher bound to one topic exchange.
///
/// `publish()` never blocks: messages go through an mpsc channel to a background task that
/// owns the broker channel. Publish failures are logged by that task. `close()` must be called
/// to stop the task.
pub struct TopicPublisher {
    exchange: String,
    msg_common_props: BasicProperties,
    channel: Channel,
    dispatcher: UnboundedSender<RabbitPublishMessage>,
    handler: (JoinHandle<()>, CancellationToken),
}

impl TopicPublisher {
    fn new(exchange: &str, msg_common_props: BasicProperties, channel: Channel) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RabbitPublishMessage>();
        let cancel_token = CancellationToken::new();

        let task_channel = channel.clone();
        let task_exchange = exchange.to_owned();
        let cloned_token = cancel_token.clone();
        let handler = tokio::spawn(async move {
            loop {
                select! {
                    _ = cloned_token.cancelled() => {
                        debug!("publisher for {} was closed", task_exchange);
                        return
                    },
                    message = rx.recv() => {
                        match message {
                            Some(msg) => {
                                if let Err(err) = task_channel.basic_publish(msg.1, msg.0, msg.2).await {
                                    error!("error while publishing to {}: {}", task_exchange, err)
                                }
                            }
                            None => {
                                debug!("every dispatcher for {} was dropped", task_exchange);
                                return
                            }
                        }
                    }
                }
            }
        });

        Self {
            exchange: exchange.to_owned(),
            msg_common_props,
            channel,
            dispatcher: tx,
            handler: (handler, cancel_token),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Queues `message` for publishing under its routing key.
    ///
    /// # Errors
    /// Returns `RabbitMQError::PublishError` if the background task has stopped
    pub fn publish(&self, message: Message, ctx: PublisherContext) -> Result<(), RabbitMQError> {
        self.get_dispatcher().publish(message, ctx)
    }

    /// Handle that publishes through this publisher's task. Stops working once the
    /// publisher is closed.
    pub fn get_dispatcher(&self) -> PublisherDispatcher {
        PublisherDispatcher {
            dispatcher: self.dispatcher.clone(),
            exchange: self.exchange.clone(),
            msg_common_props: self.msg_common_props.clone(),
        }
    }

    /// Stops the background task and closes the channel.
    pub async fn close(self) -> Result<(), RabbitMQError> {
        self.handler.1.cancel();
        if let Err(err) = self.handler.0.await {
            error!("publisher task for {} ended abnormally: {}", self.exchange, err);
        }
        self.channel
            .close()
            .await
            .map_err(|err| RabbitMQError::CloseChannelError(err.to_string()))
    }
}

/// Cloneable, thread-safe handle onto a [`TopicPublisher`].
#[derive(Clone)]
pub struct PublisherDispatcher {
    dispatcher: UnboundedSender<RabbitPublishMessage>,
    exchange: String,
    msg_common_props: BasicProperties,
}

impl PublisherDispatcher {
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Same as [`TopicPublisher::publish`].
    pub fn publish(&self, message: Message, ctx: PublisherContext) -> Result<(), RabbitMQError> {
        let publish_args = BasicPublishArguments::new(&self.exchange, &message.topic);
        let message_props = ctx.into_basic_props(&self.msg_common_props)?;

        self.dispatcher
            .send(RabbitPublishMessage(message.content, message_props, publish_args))
            .map_err(|_| RabbitMQError::PublishError)
    }
}

/// Message to publish on a topic exchange.
#[derive(Debug, Clone)]
pub struct Message {
    content: Vec<u8>,
    topic: String,
}

impl Message {
    pub fn new(content: Vec<u8>, topic: &str) -> Self {
        Self {
            content,
            topic: topic.to_owned(),
        }
    }

    pub fn content_ref<T: AsRef<[u8]>>(content: T, topic: &str) -> Self {
        Self::new(content.as_ref().to_vec(), topic)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Metadata attached to a published message.
pub struct PublisherContext {
    request_id: String,
    message_id: Option<String>,
}

impl PublisherContext {
    /// # Arguments
    /// * `req_id` - Stored in the `request_id` header
    /// * `message_id` - Optional AMQP message id
    pub fn new(req_id: &str, message_id: Option<String>) -> Self {
        Self {
            request_id: req_id.to_owned(),
            message_id,
        }
    }

    fn into_basic_props(self, current_basic_props: &BasicProperties) -> Result<BasicProperties, RabbitMQError> {
        let mut props = current_basic_props.clone();
        if let Some(msg_id) = self.message_id {
            props.with_message_id(&msg_id);
        }

        let header = ShortStr::try_from("request_id").map_err(|err| RabbitMQError::HeaderError(err.to_string()))?;
        let mut headers = FieldTable::new();
        headers.insert(header, self.request_id.into());
        props.with_headers(headers);

        Ok(props)
    }
}

/// Error types for RabbitMQ operations
#[derive(Debug, thiserror::Error)]
pub enum RabbitMQError {
    #[error("Provided URI Error: {0}")]
    UriError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Error while opening a rabbitmq channel: {0}")]
    OpenChannelError(String),
    #[error("Error while declaring a queue: {0}")]
    QueueDeclarationError(String),
    #[error("Error while declaring a exchange: {0}")]
    ExchangeDeclarationError(String),
    #[error("Error while starting to consume from a subscription: {0}")]
    SubscriptionError(String),
    #[error("Error while binding a queue to exchange: {0}")]
    QueueBindingError(String),
    #[error("Error while closing a channel: {0}")]
    CloseChannelError(String),
    /// The publisher's background task is gone
    #[error("Error while publishing a message - channel was dropped or closed")]
    PublishError,
    #[error("Invalid message header: {0}")]
    HeaderError(String),
    #[error("Error while acknowledging a message: {0}")]
    AckMessageError(String),
    #[error("Unexpected error: message does not contain delivery tag")]
    NotDeliveryTag,
}

async fn open_rabbit_connection(connection_string: &str) -> Result<Connection, RabbitMQError> {
    let open_conn_args = OpenConnectionArguments::try_from(connection_string).map_err(|err| {
        error!("Failed to parse connection string: {}", err);
        RabbitMQError::UriError(err.to_string())
    })?;

    let conn = Connection::open(&open_conn_args).await.map_err(|err| {
        error!("Failed to connect to RabbitMQ: {}", err);
        RabbitMQError::ConnectionError(err.to_string())
    })?;

    conn.register_callback(RabbitConnectionCallback)
        .await
        .map_err(|err| RabbitMQError::ConnectionError(err.to_string()))?;

    info!("RabbitMQ connection established");
    Ok(conn)
}

async fn open_rabbit_channel(conn: &Connection) -> Result<Channel, RabbitMQError> {
    let rabbit_channel = conn
        .open_channel(None)
        .await
        .map_err(|err| RabbitMQError::OpenChannelError(err.to_string()))?;

    rabbit_channel
        .register_callback(RabbitChannelCallback)
        .await
        .map_err(|err| RabbitMQError::OpenChannelError(err.to_string()))?;

    debug!("RabbitMQ channel opened");
    Ok(rabbit_channel)
}

struct RabbitConnectionCallback;

#[async_trait]
impl ConnectionCallback for RabbitConnectionCallback {
    async fn close(&mut self, _connection: &Connection, close: Close) -> Result<(), amqprs::error::Error> {
        debug!("connection closed {:?}", close);
        Ok(())
    }

    async fn blocked(&mut self, _connection: &Connection, reason: String) {
        debug!("connection blocked {:?}", reason);
    }

    async fn unblocked(&mut self, _connection: &Connection) {
        debug!("connection unblocked");
    }

    async fn secret_updated(&mut self, _connection: &Connection) {
        debug!("connection secret updated");
    }
}

struct RabbitChannelCallback;

#[async_trait]
impl ChannelCallback for RabbitChannelCallback {
    async fn close(&mut self, _channel: &Channel, close: amqprs::CloseChannel) -> Result<(), amqprs::error::Error> {
        debug!("channel {:?} closed", close);
        Ok(())
    }

    async fn cancel(&mut self, _channel: &Channel, cancel: Cancel) -> Result<(), amqprs::error::Error> {
        debug!("channel {:?} cancel", cancel);
        Ok(())
    }

    async fn flow(&mut self, _channel: &Channel, flow: bool) -> Result<bool, amqprs::error::Error> {
        debug!("channel flow {:?}", flow);
        Ok(true)
    }

    async fn publish_ack(&mut self, _channel: &Channel, _ack: Ack) {}

    async fn publish_nack(&mut self, _channel: &Channel, _nack: Nack) {}

    async fn publish_return(&mut self, _channel: &Channel, _return: Return, _props: BasicProperties, _content: Vec<u8>) {}
}
