//! Shared plumbing for tracker and storage clients: one connection, one
//! frame decoder, one task queue.

use crate::conn::Connection;
use crate::decoder::FrameDecoder;
use crate::error::ClientError;
use crate::queue::{QueueHandle, Task, TaskQueue};
use bytes::Bytes;
use fastdfs_protocol::FrameHeader;
use tokio::net::ToSocketAddrs;
use tokio::sync::oneshot;

pub(crate) struct BaseClient {
    conn: Connection,
    queue: QueueHandle,
}

impl BaseClient {
    /// Connects, installs the frame decoder, and activates the queue.
    pub(crate) async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let conn = Connection::connect(addr).await?;
        let queue = TaskQueue::spawn();

        let events = queue.clone();
        conn.chain()
            .add_handler(Box::new(FrameDecoder::new(move |event| {
                events.deliver(event)
            })));
        queue.activate();

        Ok(Self { conn, queue })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub(crate) fn submit(&self, task: Task) {
        self.queue.submit(task);
    }

    /// Submits a request and waits for its matched response frame.
    pub(crate) async fn roundtrip(
        &self,
        request: impl FnOnce() -> Result<(), ClientError> + Send + 'static,
    ) -> Result<(FrameHeader, Bytes), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Task::new(request).with_response(move |reply| {
            let _ = tx.send(reply);
        }));
        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Like `roundtrip`, but also turns a non-zero status byte into a
    /// typed per-request error.
    pub(crate) async fn command(
        &self,
        request: impl FnOnce() -> Result<(), ClientError> + Send + 'static,
    ) -> Result<(FrameHeader, Bytes), ClientError> {
        let (header, body) = self.roundtrip(request).await?;
        if !header.is_ok() {
            return Err(ClientError::server(header.status));
        }
        Ok((header, body))
    }

    /// Queues a final task that closes the connection, then marks the
    /// queue closed. Everything already submitted drains first.
    pub(crate) fn close(&self) {
        let conn = self.conn.clone();
        self.queue.submit(Task::new(move || {
            conn.close();
            Ok(())
        }));
        self.queue.close();
    }

    /// Closes the connection immediately and fails every in-flight and
    /// pending task.
    pub(crate) fn abort(&self) {
        self.conn.close();
        self.queue.reject(ClientError::Aborted);
    }
}
