//! Cross-process dispatch.
//!
//! A message sent with [`DispatchMode::Remote`](crate::notice::DispatchMode::Remote) is wrapped
//! in a [`MessageWrap`] carrying a fresh correlation id and published to the bridge's before
//! topic. The node that picks it up dispatches it and answers on the after topic; the sender
//! then completes the original message's blocking results and callback.

pub mod bridge;
pub mod cache;
pub mod envelope;
pub mod rabbit;

pub use bridge::{RemoteBridge, RemoteEnvelopeMediator, RemoteTransport, UNPROCESSED_REMOTE_MESSAGE};
pub use cache::{InMemoryMessageCache, LocalMessageCache};
pub use envelope::{MessageWrap, RemoteMessage, RemoteResult};
pub use rabbit::{RabbitBridgeConsumer, RabbitTransport};
