//! Ordered, mutable pipeline of inbound byte-stream handlers.
//!
//! Every connection owns one chain. Handlers are dispatched front to
//! back: the first handler that consumes a chunk stops propagation, so
//! prepending a handler (e.g. a [`StreamRedirector`]) changes what the
//! next chunks mean without the connection knowing. Handlers may remove
//! themselves mid-dispatch through [`ChainCtx`].
//!
//! [`StreamRedirector`]: crate::redirect::StreamRedirector

use crate::error::ClientError;
use parking_lot::Mutex;
use std::sync::Arc;

/// What a handler did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Pass the same chunk to the next handler.
    Continue,
    /// The chunk is consumed; stop propagation.
    Consumed,
}

/// Identifies one handler instance within its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Dispatch context handed to handler hooks.
pub struct ChainCtx<'a> {
    id: HandlerId,
    removals: &'a mut Vec<HandlerId>,
}

impl ChainCtx<'_> {
    /// Schedules this handler for removal once the current dispatch
    /// completes.
    pub fn remove_self(&mut self) {
        self.removals.push(self.id);
    }
}

/// An inbound handler attached to one connection.
///
/// Handlers are stateful and never shared across connections.
pub trait InboundHandler: Send {
    /// Connect notification; return `true` to let the next handler see it.
    fn on_connect(&mut self, _ctx: &mut ChainCtx<'_>) -> bool {
        true
    }

    /// One inbound chunk. An `Err` aborts the dispatch and is routed to
    /// the error path.
    fn on_read(&mut self, ctx: &mut ChainCtx<'_>, data: &[u8]) -> Result<ReadOutcome, ClientError>;

    /// Channel-level error; return `true` once handled to stop
    /// propagation.
    fn on_error(&mut self, _ctx: &mut ChainCtx<'_>, _err: &ClientError) -> bool {
        false
    }
}

/// The ordered handler list of one connection.
pub struct HandlerChain {
    entries: Vec<(HandlerId, Box<dyn InboundHandler>)>,
    next_id: u64,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    /// Appends a handler (lowest dispatch priority).
    pub fn add_handler(&mut self, handler: Box<dyn InboundHandler>) -> HandlerId {
        let id = self.next_id();
        self.entries.push((id, handler));
        id
    }

    /// Prepends a handler (highest dispatch priority, evaluated first).
    pub fn unshift_handler(&mut self, handler: Box<dyn InboundHandler>) -> HandlerId {
        let id = self.next_id();
        self.entries.insert(0, (id, handler));
        id
    }

    /// Removes a handler; returns whether it was present.
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatches one inbound chunk front to back.
    pub fn fire_read(&mut self, data: &[u8]) {
        let mut removals = Vec::new();
        let mut failure = None;
        for (id, handler) in self.entries.iter_mut() {
            let mut ctx = ChainCtx {
                id: *id,
                removals: &mut removals,
            };
            match handler.on_read(&mut ctx, data) {
                Ok(ReadOutcome::Continue) => {}
                Ok(ReadOutcome::Consumed) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        self.apply_removals(removals);
        if let Some(err) = failure {
            self.fire_error(&err);
        }
    }

    /// Dispatches a channel-level error front to back until a handler
    /// reports it handled. Error dispatch never faults the connection.
    pub fn fire_error(&mut self, err: &ClientError) {
        let mut removals = Vec::new();
        for (id, handler) in self.entries.iter_mut() {
            let mut ctx = ChainCtx {
                id: *id,
                removals: &mut removals,
            };
            if handler.on_error(&mut ctx, err) {
                break;
            }
        }
        self.apply_removals(removals);
    }

    /// Dispatches the connect event front to back.
    pub fn fire_connect(&mut self) {
        let mut removals = Vec::new();
        for (id, handler) in self.entries.iter_mut() {
            let mut ctx = ChainCtx {
                id: *id,
                removals: &mut removals,
            };
            if !handler.on_connect(&mut ctx) {
                break;
            }
        }
        self.apply_removals(removals);
    }

    fn apply_removals(&mut self, removals: Vec<HandlerId>) {
        for id in removals {
            self.remove_handler(id);
        }
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reference to a connection's chain.
///
/// The reader task, the writer task and request closures all touch the
/// chain; the lock keeps every dispatch and mutation serialized. No
/// await happens while the lock is held.
#[derive(Clone)]
pub struct ChainRef(Arc<Mutex<HandlerChain>>);

impl ChainRef {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(HandlerChain::new())))
    }

    pub fn add_handler(&self, handler: Box<dyn InboundHandler>) -> HandlerId {
        self.0.lock().add_handler(handler)
    }

    pub fn unshift_handler(&self, handler: Box<dyn InboundHandler>) -> HandlerId {
        self.0.lock().unshift_handler(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.0.lock().remove_handler(id)
    }

    pub fn fire_read(&self, data: &[u8]) {
        self.0.lock().fire_read(data)
    }

    pub fn fire_error(&self, err: &ClientError) {
        self.0.lock().fire_error(err)
    }

    pub fn fire_connect(&self) {
        self.0.lock().fire_connect()
    }
}

impl Default for ChainRef {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        outcome: ReadOutcome,
        remove_after_read: bool,
        handles_errors: bool,
    }

    impl Recorder {
        fn passthrough(label: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                log,
                outcome: ReadOutcome::Continue,
                remove_after_read: false,
                handles_errors: false,
            }
        }
    }

    impl InboundHandler for Recorder {
        fn on_read(
            &mut self,
            ctx: &mut ChainCtx<'_>,
            data: &[u8],
        ) -> Result<ReadOutcome, ClientError> {
            self.log
                .lock()
                .push(format!("{}:read:{}", self.label, data.len()));
            if self.remove_after_read {
                ctx.remove_self();
            }
            Ok(self.outcome)
        }

        fn on_error(&mut self, _ctx: &mut ChainCtx<'_>, err: &ClientError) -> bool {
            self.log.lock().push(format!("{}:error:{}", self.label, err));
            self.handles_errors
        }
    }

    #[test]
    fn test_read_propagates_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        chain.add_handler(Box::new(Recorder::passthrough("a", log.clone())));
        chain.add_handler(Box::new(Recorder::passthrough("b", log.clone())));
        chain.fire_read(&[0; 3]);
        assert_eq!(*log.lock(), vec!["a:read:3", "b:read:3"]);
    }

    #[test]
    fn test_consumed_stops_propagation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        let mut first = Recorder::passthrough("a", log.clone());
        first.outcome = ReadOutcome::Consumed;
        chain.add_handler(Box::new(first));
        chain.add_handler(Box::new(Recorder::passthrough("b", log.clone())));
        chain.fire_read(&[0; 1]);
        assert_eq!(*log.lock(), vec!["a:read:1"]);
    }

    #[test]
    fn test_unshift_takes_priority() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        chain.add_handler(Box::new(Recorder::passthrough("base", log.clone())));
        let mut front = Recorder::passthrough("front", log.clone());
        front.outcome = ReadOutcome::Consumed;
        chain.unshift_handler(Box::new(front));
        chain.fire_read(&[0; 2]);
        assert_eq!(*log.lock(), vec!["front:read:2"]);
    }

    #[test]
    fn test_self_removal_mid_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        let mut once = Recorder::passthrough("once", log.clone());
        once.remove_after_read = true;
        chain.add_handler(Box::new(once));
        chain.add_handler(Box::new(Recorder::passthrough("base", log.clone())));

        chain.fire_read(&[0; 1]);
        assert_eq!(chain.len(), 1);
        chain.fire_read(&[0; 1]);
        assert_eq!(
            *log.lock(),
            vec!["once:read:1", "base:read:1", "base:read:1"]
        );
    }

    #[test]
    fn test_read_failure_routes_to_error_path() {
        struct Failing;
        impl InboundHandler for Failing {
            fn on_read(
                &mut self,
                _ctx: &mut ChainCtx<'_>,
                _data: &[u8],
            ) -> Result<ReadOutcome, ClientError> {
                Err(ClientError::ConnectionClosed)
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        chain.add_handler(Box::new(Failing));
        chain.add_handler(Box::new(Recorder::passthrough("base", log.clone())));
        chain.fire_read(&[0; 4]);
        // The failing read aborted propagation and became an error event.
        assert_eq!(*log.lock(), vec!["base:error:connection closed"]);
    }

    #[test]
    fn test_error_stops_at_handling_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HandlerChain::new();
        let mut front = Recorder::passthrough("front", log.clone());
        front.handles_errors = true;
        chain.add_handler(Box::new(front));
        chain.add_handler(Box::new(Recorder::passthrough("back", log.clone())));
        chain.fire_error(&ClientError::Aborted);
        assert_eq!(*log.lock(), vec!["front:error:client aborted"]);
    }

    #[test]
    fn test_remove_handler_by_id() {
        let counter = Arc::new(AtomicUsize::new(0));
        struct Counting(Arc<AtomicUsize>);
        impl InboundHandler for Counting {
            fn on_read(
                &mut self,
                _ctx: &mut ChainCtx<'_>,
                _data: &[u8],
            ) -> Result<ReadOutcome, ClientError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ReadOutcome::Continue)
            }
        }

        let mut chain = HandlerChain::new();
        let id = chain.add_handler(Box::new(Counting(counter.clone())));
        chain.fire_read(&[0]);
        assert!(chain.remove_handler(id));
        assert!(!chain.remove_handler(id));
        chain.fire_read(&[0]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
