//! Raw-stream redirection for large downloads.
//!
//! A buffered download holds the whole body in memory; for large files
//! the caller instead installs a [`StreamRedirector`] ahead of the frame
//! decoder right before issuing the download command. The redirector
//! strips the response header, pushes body bytes to a sink channel as
//! they arrive, and removes itself once the declared length has been
//! forwarded. Dropping the sender is the single end-of-body signal.

use crate::chain::{ChainCtx, InboundHandler, ReadOutcome};
use crate::error::ClientError;
use crate::queue::FrameEvent;
use bytes::Bytes;
use fastdfs_protocol::{FrameHeader, ProtocolError, HEADER_BYTES};
use tokio::sync::mpsc;

type SinkTx = mpsc::UnboundedSender<Result<Bytes, ClientError>>;

/// Handler that forwards a response body to an external sink instead of
/// buffering it into one frame.
pub struct StreamRedirector {
    sink: Option<SinkTx>,
    events: Box<dyn Fn(FrameEvent) + Send>,
    /// When true the redirector consumes chunks, hiding them from the
    /// frame decoder; when false both observe the same bytes.
    intercept_data: bool,
    header: Option<FrameHeader>,
    remaining: u64,
}

impl StreamRedirector {
    /// `events` reports frame completion and fatal errors to the task
    /// queue so dispatch continues past the redirected response.
    pub fn new(
        sink: SinkTx,
        intercept_data: bool,
        events: impl Fn(FrameEvent) + Send + 'static,
    ) -> Self {
        Self {
            sink: Some(sink),
            events: Box::new(events),
            intercept_data,
            header: None,
            remaining: 0,
        }
    }

    fn outcome(&self) -> ReadOutcome {
        if self.intercept_data {
            ReadOutcome::Consumed
        } else {
            ReadOutcome::Continue
        }
    }

    fn push(&self, chunk: Result<Bytes, ClientError>) {
        if let Some(sink) = &self.sink {
            // A dropped receiver just means the caller stopped reading.
            let _ = sink.send(chunk);
        }
    }

    fn finish(&mut self, ctx: &mut ChainCtx<'_>) {
        let header = self.header.take().unwrap_or(FrameHeader::new(0, 0, 0));
        self.remaining = 0;
        // Dropping the sender closes the channel: the end signal.
        self.sink = None;
        // In passive mode the frame decoder observes the same bytes and
        // reports the frame itself; a second completion here would answer
        // the next queued task.
        if self.intercept_data {
            (self.events)(FrameEvent::Frame {
                header,
                body: Bytes::new(),
            });
        }
        ctx.remove_self();
    }
}

impl InboundHandler for StreamRedirector {
    fn on_read(&mut self, ctx: &mut ChainCtx<'_>, data: &[u8]) -> Result<ReadOutcome, ClientError> {
        let mut read_pos = 0;
        if self.header.is_none() {
            if data.len() < HEADER_BYTES {
                let err: ClientError =
                    ProtocolError::TruncatedHeader { got: data.len() }.into();
                self.push(Err(err.clone()));
                self.sink = None;
                if self.intercept_data {
                    (self.events)(FrameEvent::Fatal(err));
                }
                ctx.remove_self();
                return Ok(self.outcome());
            }
            let header = FrameHeader::parse(data)?;
            if !header.is_ok() {
                // Per-request failure: surface it on the sink, drain any
                // error body, and let the queue move on.
                self.push(Err(ClientError::server(header.status)));
                self.sink = None;
            }
            self.remaining = header.length;
            self.header = Some(header);
            read_pos = HEADER_BYTES;
        }

        let take = (self.remaining).min((data.len() - read_pos) as u64) as usize;
        if take > 0 {
            self.push(Ok(Bytes::copy_from_slice(&data[read_pos..read_pos + take])));
            self.remaining -= take as u64;
        }

        if self.remaining == 0 {
            self.finish(ctx);
        }
        Ok(self.outcome())
    }

    fn on_error(&mut self, ctx: &mut ChainCtx<'_>, err: &ClientError) -> bool {
        self.push(Err(err.clone()));
        self.sink = None;
        ctx.remove_self();
        // An intercepting redirector hides the error from the frame
        // decoder, so it must notify the queue itself. In passive mode it
        // lets the error propagate and the decoder reports it once.
        if self.intercept_data {
            (self.events)(FrameEvent::Fatal(err.clone()));
            true
        } else {
            false
        }
    }
}

/// Receiving side of a redirected download.
pub struct DownloadStream {
    rx: mpsc::UnboundedReceiver<Result<Bytes, ClientError>>,
}

impl DownloadStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<Bytes, ClientError>>) -> Self {
        Self { rx }
    }

    /// Next body chunk; `None` once the declared body length has been
    /// delivered.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ClientError>> {
        self.rx.recv().await
    }

    /// Drains the stream into one buffer.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}
