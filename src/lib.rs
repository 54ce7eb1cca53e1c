pub mod config;
pub mod notice;
pub mod remote;

// Re-export key types for easier usage
pub use config::{Config, ConfigError};
pub use notice::{
    AsyncResult, CallbackResult, Command, DispatchError, DispatchMode, DispatchResult, EventId, Facade, FacadeRegistry,
    HandlerContext, HandlerError, HandlerResult, Listener, Mediator, Message, MessagePool, Payload, Proxy,
    RemoteAsyncResult, ResultError, Scheduler, SerialDispatcher, SyncResult, TokioTimerService, WorkerPool,
};
pub use remote::{MessageWrap, RemoteBridge, RemoteTransport};
