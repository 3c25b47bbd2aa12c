//! Frame reassembly from an arbitrarily fragmented byte stream.

use crate::chain::{ChainCtx, InboundHandler, ReadOutcome};
use crate::error::ClientError;
use crate::queue::FrameEvent;
use bytes::{Bytes, BytesMut};
use fastdfs_protocol::{FrameHeader, ProtocolError, HEADER_BYTES};

/// Reassembles one length-prefixed frame at a time and hands each
/// completed frame (or fatal error) to its sink.
///
/// Two states: awaiting a header, or filling the body declared by the
/// last header. Body chunks are assumed to belong entirely to the
/// current frame; the protocol runs one request at a time, so frames
/// never interleave. One decoder per connection, never shared.
pub struct FrameDecoder {
    sink: Box<dyn Fn(FrameEvent) + Send>,
    header: Option<FrameHeader>,
    body: BytesMut,
}

impl FrameDecoder {
    /// `sink` receives every decoded frame and every fatal error. The
    /// sink must defer delivery (the queue handle's channel send does);
    /// the decoder never requires it to be re-entrant.
    pub fn new(sink: impl Fn(FrameEvent) + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            header: None,
            body: BytesMut::new(),
        }
    }

    fn emit(&self, header: FrameHeader, body: Bytes) {
        (self.sink)(FrameEvent::Frame { header, body });
    }

    fn read_header(&mut self, data: &[u8]) -> Result<(), ClientError> {
        if data.len() < HEADER_BYTES {
            return Err(ProtocolError::TruncatedHeader { got: data.len() }.into());
        }
        let header = FrameHeader::parse(data)?;
        let rest = &data[HEADER_BYTES..];

        if header.length == 0 {
            self.emit(header, Bytes::new());
            return Ok(());
        }
        match (rest.len() as u64).cmp(&header.length) {
            std::cmp::Ordering::Equal => {
                self.emit(header, Bytes::copy_from_slice(rest));
            }
            std::cmp::Ordering::Less => {
                self.body = BytesMut::with_capacity(header.length as usize);
                self.body.extend_from_slice(rest);
                self.header = Some(header);
            }
            std::cmp::Ordering::Greater => {
                return Err(ProtocolError::UnexpectedBodyLength {
                    got: rest.len() as u64,
                    expected: header.length,
                }
                .into());
            }
        }
        Ok(())
    }

    fn read_body(&mut self, header: FrameHeader, data: &[u8]) -> Result<(), ClientError> {
        if self.body.len() as u64 + data.len() as u64 > header.length {
            return Err(ProtocolError::UnexpectedBodyLength {
                got: self.body.len() as u64 + data.len() as u64,
                expected: header.length,
            }
            .into());
        }
        self.body.extend_from_slice(data);
        if self.body.len() as u64 == header.length {
            let body = std::mem::take(&mut self.body).freeze();
            self.header = None;
            self.emit(header, body);
        } else {
            self.header = Some(header);
        }
        Ok(())
    }
}

impl InboundHandler for FrameDecoder {
    fn on_read(&mut self, _ctx: &mut ChainCtx<'_>, data: &[u8]) -> Result<ReadOutcome, ClientError> {
        match self.header.take() {
            None => self.read_header(data)?,
            Some(header) => self.read_body(header, data)?,
        }
        Ok(ReadOutcome::Consumed)
    }

    fn on_error(&mut self, _ctx: &mut ChainCtx<'_>, err: &ClientError) -> bool {
        // Transport errors become a terminal notification for the queue.
        (self.sink)(FrameEvent::Fatal(err.clone()));
        true
    }
}
