//--------------------------------------------------------------------------------------------------
// ENUMS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                              | Raised by         |
// |-----------------|----------------------------------------------------------|-------------------|
// | DispatchError   | Configuration and lifecycle failures of a dispatch call  | Facade            |
// | HandlerError    | Failure reported by a command, mediator or factory       | handlers          |
// | ResultError     | Timeout / cancellation while waiting on a result         | AsyncResult       |
// | BridgeError     | Remote boundary failures                                 | RemoteBridge      |
//--------------------------------------------------------------------------------------------------

use thiserror::Error;

use super::message::EventId;

/// Errors returned by the dispatch entry points of a [`Facade`](super::Facade).
///
/// Every variant except `Remote` is a configuration or lifecycle error: it is reported before
/// any handler runs and is never retried.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// Executor dispatch requested before `init_executor`
    #[error("no executor configured on facade '{0}', call init_executor first")]
    ExecutorNotConfigured(String),

    /// Task dispatch requested without a tokio runtime
    #[error("no task runtime available on facade '{0}', call init_task_runtime first")]
    TaskRuntimeNotConfigured(String),

    /// Scheduled dispatch requested before `init_timer_service`
    #[error("no timer service configured on facade '{0}', call init_timer_service first")]
    TimerNotConfigured(String),

    /// Remote dispatch requested before `init_remote_bridge`
    #[error("no remote bridge configured on facade '{0}', call init_remote_bridge first")]
    BridgeNotConfigured(String),

    /// A scheduler object was armed a second time
    #[error("scheduler '{0}' is already bound to a message, create a new scheduler per dispatch")]
    SchedulerReused(String),

    /// The facade was disposed
    #[error("facade '{0}' has been disposed")]
    Disposed(String),

    /// The remote bridge refused or failed to publish the message
    #[error(transparent)]
    Remote(#[from] BridgeError),
}

/// Type alias for Result with DispatchError
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failure reported by a single handler invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler body failed
    #[error("handler failed: {0}")]
    Failed(String),

    /// The command factory could not build an instance
    #[error("could not construct command instance: {0}")]
    Factory(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Type alias for the outcome of a handler body
pub type HandlerResult = Result<(), HandlerError>;

/// Errors surfaced to a thread waiting on a blocking result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultError {
    /// The deadline elapsed before a value was set
    #[error("getting result timed out")]
    Timeout,

    /// The wait was cancelled
    #[error("waiting for result was cancelled")]
    Cancelled,
}

/// Errors raised at the remote boundary.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Immediate results cannot travel to another process
    #[error("result '{0}' is a synchronous result and cannot be dispatched remotely")]
    UnsupportedResult(String),

    /// The transport failed to publish an envelope
    #[error("failed to publish envelope {correlation_id} to '{topic}': {reason}")]
    Publish {
        correlation_id: String,
        topic: String,
        reason: String,
    },

    /// An incoming payload could not be read as an envelope
    #[error("failed to decode remote envelope: {0}")]
    Decode(String),

    /// The bridge has not been attached to a facade, or the facade is gone
    #[error("remote bridge is not attached to a live facade")]
    NotAttached,
}

/// A handler failure observed during dispatch, handed to the facade's fault hook.
#[derive(Debug, Clone)]
pub struct HandlerFault {
    /// Event that was being dispatched
    pub event: EventId,
    /// Identity of the failing handler
    pub handler: String,
    /// What went wrong
    pub error: HandlerError,
}
