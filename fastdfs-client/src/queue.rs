//! Per-connection task queue.
//!
//! The protocol is strictly half-duplex: one request in flight per
//! connection, responses matched to requests purely by order. The queue
//! is an actor owning all of its state; submissions, decoded frames and
//! lifecycle transitions arrive over one channel, so every dispatch
//! decision happens on a single logical thread and every callback fires
//! deferred, never inline with the event that produced it.

use crate::error::ClientError;
use bytes::Bytes;
use fastdfs_protocol::FrameHeader;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;

/// Outcome delivered to a task's response handler.
pub type TaskReply = Result<(FrameHeader, Bytes), ClientError>;

type RequestFn = Box<dyn FnOnce() -> Result<(), ClientError> + Send>;
type ResponseFn = Box<dyn FnOnce(TaskReply) + Send>;

/// One request/response unit of work.
///
/// Owned exclusively by the queue from submission until its response
/// fires or it is rejected.
pub struct Task {
    pub(crate) request: RequestFn,
    pub(crate) response: Option<ResponseFn>,
}

impl Task {
    /// Creates a task whose request writes the command to the
    /// connection.
    pub fn new(request: impl FnOnce() -> Result<(), ClientError> + Send + 'static) -> Self {
        Self {
            request: Box::new(request),
            response: None,
        }
    }

    /// Attaches the response handler.
    pub fn with_response(mut self, response: impl FnOnce(TaskReply) + Send + 'static) -> Self {
        self.response = Some(Box::new(response));
        self
    }
}

/// A decoded-frame or fatal-error notification from the inbound path.
#[derive(Debug)]
pub enum FrameEvent {
    /// One complete response frame.
    Frame { header: FrameHeader, body: Bytes },
    /// The connection is dead; reject everything outstanding.
    Fatal(ClientError),
}

enum QueueMsg {
    Submit(Task),
    Event(FrameEvent),
    Activate,
    Close,
    Reject(ClientError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Waiting,
    Accept,
    Reject,
    Closed,
}

/// Submission surface of a task queue. Cheap to clone.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<QueueMsg>,
}

impl QueueHandle {
    /// Submits a task. Depending on the queue state it is executed,
    /// enqueued, or failed; its response always eventually fires.
    pub fn submit(&self, task: Task) {
        if let Err(mpsc::error::SendError(QueueMsg::Submit(task))) =
            self.tx.send(QueueMsg::Submit(task))
        {
            // Actor gone: the connection was torn down. Still deliver a
            // failure, deferred.
            if let Some(response) = task.response {
                tokio::spawn(async move { response(Err(ClientError::ConnectionClosed)) });
            }
        }
    }

    /// Feeds a decoded frame or fatal error into the queue.
    pub(crate) fn deliver(&self, event: FrameEvent) {
        let _ = self.tx.send(QueueMsg::Event(event));
    }

    /// Transitions WAITING -> ACCEPT and dispatches the first pending
    /// task. Called once, on connection establishment.
    pub(crate) fn activate(&self) {
        let _ = self.tx.send(QueueMsg::Activate);
    }

    /// Marks the queue closed; already-queued tasks still drain.
    pub(crate) fn close(&self) {
        let _ = self.tx.send(QueueMsg::Close);
    }

    /// Fails the in-flight task and every pending task with `err`.
    pub(crate) fn reject(&self, err: ClientError) {
        let _ = self.tx.send(QueueMsg::Reject(err));
    }
}

/// The queue actor.
pub struct TaskQueue {
    state: QueueState,
    pending: VecDeque<Task>,
    current: Option<Task>,
    fatal: Option<ClientError>,
    rx: mpsc::UnboundedReceiver<QueueMsg>,
}

impl TaskQueue {
    /// Spawns the actor and returns its handle.
    pub fn spawn() -> QueueHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = TaskQueue {
            state: QueueState::Waiting,
            pending: VecDeque::new(),
            current: None,
            fatal: None,
            rx,
        };
        tokio::spawn(queue.run());
        QueueHandle { tx }
    }

    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                QueueMsg::Submit(task) => self.on_submit(task),
                QueueMsg::Event(FrameEvent::Frame { header, body }) => {
                    self.on_response(Ok((header, body)))
                }
                QueueMsg::Event(FrameEvent::Fatal(err)) => self.on_reject(err),
                QueueMsg::Activate => self.on_activate(),
                QueueMsg::Close => {
                    tracing::debug!("task queue closed");
                    self.state = QueueState::Closed;
                }
                QueueMsg::Reject(err) => self.on_reject(err),
            }
        }
    }

    fn on_submit(&mut self, task: Task) {
        match self.state {
            QueueState::Reject => {
                let err = self
                    .fatal
                    .clone()
                    .unwrap_or(ClientError::ConnectionClosed);
                invoke_response(task, Err(err));
            }
            QueueState::Closed => {
                invoke_response(task, Err(ClientError::AlreadyClosed));
            }
            QueueState::Waiting => {
                self.pending.push_back(task);
            }
            QueueState::Accept => {
                if self.current.is_none() {
                    self.execute(task);
                } else {
                    self.pending.push_back(task);
                }
            }
        }
    }

    fn on_response(&mut self, reply: TaskReply) {
        if let Some(task) = self.current.take() {
            invoke_response(task, reply);
        }
        // A rejection cascade is already draining the queue; do not
        // dispatch past it.
        if self.state == QueueState::Reject {
            return;
        }
        self.dispatch_next();
    }

    fn on_activate(&mut self) {
        if self.state != QueueState::Waiting {
            return;
        }
        tracing::debug!("task queue active, {} pending", self.pending.len());
        self.state = QueueState::Accept;
        self.dispatch_next();
    }

    fn on_reject(&mut self, err: ClientError) {
        if self.state == QueueState::Reject {
            return;
        }
        tracing::debug!(
            "rejecting task queue: {} ({} pending)",
            err,
            self.pending.len()
        );
        self.fatal = Some(err.clone());
        // CLOSED is terminal; a transport death mid-drain still fails
        // whatever is left, it just keeps the "already closed" answer
        // for new submissions.
        if self.state != QueueState::Closed {
            self.state = QueueState::Reject;
        }
        if let Some(task) = self.current.take() {
            invoke_response(task, Err(err.clone()));
        }
        for task in self.pending.drain(..) {
            invoke_response(task, Err(err.clone()));
        }
    }

    fn dispatch_next(&mut self) {
        if let Some(task) = self.pending.pop_front() {
            self.execute(task);
        }
    }

    fn execute(&mut self, mut task: Task) {
        let request = std::mem::replace(&mut task.request, Box::new(|| Ok(())));
        self.current = Some(task);
        if let Err(err) = request() {
            tracing::debug!("request write failed: {err}");
            self.on_reject(err);
        }
    }
}

fn invoke_response(task: Task, reply: TaskReply) {
    if let Some(response) = task.response {
        // A panicking handler must not stall dispatch for the tasks
        // behind it.
        if catch_unwind(AssertUnwindSafe(|| response(reply))).is_err() {
            tracing::warn!("task response handler panicked");
        }
    }
}
