use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::error::DispatchResult;
use super::facade::Facade;
use super::message::Message;

/// FIFO queue whose messages are dispatched one at a time on the facade's executor.
///
/// At most one drain job is in flight, so messages pushed here never run concurrently with
/// each other and keep their push order.
pub struct SerialDispatcher {
    facade: Facade,
    queue: Mutex<VecDeque<Arc<Message>>>,
    draining: AtomicBool,
}

impl SerialDispatcher {
    pub fn new(facade: Facade) -> Arc<Self> {
        Arc::new(Self {
            facade,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    /// Queues `msg`, starting a drain job if none is running.
    ///
    /// Fails without queueing when the facade has no executor.
    pub fn push(self: &Arc<Self>, msg: impl Into<Arc<Message>>) -> DispatchResult<()> {
        let executor = self.facade.executor()?;
        self.queue.lock().push_back(msg.into());
        if !self.draining.swap(true, Ordering::AcqRel) {
            let this = Arc::clone(self);
            executor.execute(Box::new(move || this.drain()));
        }
        Ok(())
    }

    /// Messages waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn drain(&self) {
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(msg) => {
                    if let Err(e) = self.facade.dispatch_checked(&msg) {
                        debug!("Dropping queued message {}: {}", msg.what(), e);
                    }
                    Message::recycle(msg);
                }
                None => {
                    self.draining.store(false, Ordering::Release);
                    // a push may have slipped in between the empty pop and the flag reset
                    if self.queue.lock().is_empty() || self.draining.swap(true, Ordering::AcqRel) {
                        return;
                    }
                }
            }
        }
    }
}
