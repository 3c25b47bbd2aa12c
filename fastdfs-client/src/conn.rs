//! Connection management.
//!
//! One TCP connection per client. The socket is split into a reader
//! task, which pumps every received chunk through the handler chain,
//! and a writer task, which drains an ordered command channel. Large
//! upload bodies go through the writer as files or readers and are
//! streamed in chunks, never fully buffered.

use crate::chain::ChainRef;
use crate::error::ClientError;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Read buffer size for socket reads (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Chunk size used when streaming file and reader bodies.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// An outbound write, executed in submission order by the writer task.
pub(crate) enum WriteCmd {
    /// Raw bytes (headers, small bodies).
    Data(Bytes),
    /// Stream `len` bytes from a file.
    File { path: PathBuf, len: u64 },
    /// Stream `len` bytes from an arbitrary reader.
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        len: u64,
    },
    /// Shut the socket down and stop the writer.
    Shutdown,
}

/// A connection to a tracker or storage node.
///
/// Cheap to clone; all clones drive the same socket.
#[derive(Clone)]
pub struct Connection {
    chain: ChainRef,
    writer: mpsc::UnboundedSender<WriteCmd>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Connection {
    /// Opens a TCP connection with `TCP_NODELAY` set and starts the
    /// read/write pumps. Fires the chain's connect event once ready.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!("connected to {peer}");
        }
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let chain = ChainRef::new();
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());
        let (writer, write_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_pump(
            read_half,
            chain.clone(),
            closed.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(write_pump(
            write_half,
            write_rx,
            chain.clone(),
            closed.clone(),
        ));

        chain.fire_connect();
        Ok(Self {
            chain,
            writer,
            closed,
            shutdown,
        })
    }

    /// The connection's handler chain.
    pub fn chain(&self) -> &ChainRef {
        &self.chain
    }

    /// Queues raw bytes for sending.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), ClientError> {
        self.send(WriteCmd::Data(data.into()))
    }

    /// Queues `len` bytes of a file for sending; the writer task streams
    /// the content in chunks.
    pub fn write_file(&self, path: impl Into<PathBuf>, len: u64) -> Result<(), ClientError> {
        self.send(WriteCmd::File {
            path: path.into(),
            len,
        })
    }

    /// Queues `len` bytes from a reader for sending.
    pub fn write_reader(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        len: u64,
    ) -> Result<(), ClientError> {
        self.send(WriteCmd::Reader { reader, len })
    }

    fn send(&self, cmd: WriteCmd) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        self.writer
            .send(cmd)
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Tears the connection down. Idempotent; no chain events fire
    /// afterward.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("closing connection");
        let _ = self.writer.send(WriteCmd::Shutdown);
        self.shutdown.notify_waiters();
    }
}

async fn read_pump(
    mut read_half: OwnedReadHalf,
    chain: ChainRef,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            read = read_half.read(&mut buf) => read,
            _ = shutdown.notified() => return,
        };
        match read {
            Ok(0) => {
                tracing::debug!("connection closed by peer");
                if !closed.swap(true, Ordering::SeqCst) {
                    chain.fire_error(&ClientError::ConnectionClosed);
                }
                return;
            }
            Ok(n) => chain.fire_read(&buf[..n]),
            Err(err) => {
                tracing::debug!("read failed: {err}");
                if !closed.swap(true, Ordering::SeqCst) {
                    chain.fire_error(&err.into());
                }
                return;
            }
        }
    }
}

async fn write_pump(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteCmd>,
    chain: ChainRef,
    closed: Arc<AtomicBool>,
) {
    while let Some(cmd) = rx.recv().await {
        let result = match cmd {
            WriteCmd::Data(data) => write_half.write_all(&data).await,
            WriteCmd::File { path, len } => stream_file(&mut write_half, &path, len).await,
            WriteCmd::Reader { reader, len } => {
                stream_reader(&mut write_half, reader, len).await
            }
            WriteCmd::Shutdown => {
                let _ = write_half.shutdown().await;
                return;
            }
        };
        if let Err(err) = result {
            tracing::debug!("write failed: {err}");
            if !closed.swap(true, Ordering::SeqCst) {
                chain.fire_error(&err.into());
            }
            return;
        }
    }
}

async fn stream_file(
    out: &mut OwnedWriteHalf,
    path: &std::path::Path,
    len: u64,
) -> std::io::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    stream_reader(out, Box::new(file), len).await
}

async fn stream_reader(
    out: &mut OwnedWriteHalf,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    len: u64,
) -> std::io::Result<()> {
    let mut remaining = reader.take(len);
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = remaining.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        sent += n as u64;
    }
    if sent != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("body source ended after {sent} of {len} bytes"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainCtx, InboundHandler, ReadOutcome};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedSender;

    struct Forward(UnboundedSender<Vec<u8>>);

    impl InboundHandler for Forward {
        fn on_read(
            &mut self,
            _ctx: &mut ChainCtx<'_>,
            data: &[u8],
        ) -> Result<ReadOutcome, ClientError> {
            let _ = self.0.send(data.to_vec());
            Ok(ReadOutcome::Consumed)
        }

        fn on_error(&mut self, _ctx: &mut ChainCtx<'_>, err: &ClientError) -> bool {
            let _ = self.0.send(format!("error:{err}").into_bytes());
            true
        }
    }

    #[tokio::test]
    async fn test_write_reaches_peer_and_reads_flow_through_chain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            socket.write_all(b"world").await.unwrap();
        });

        let conn = Connection::connect(addr).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.chain().add_handler(Box::new(Forward(tx)));

        conn.write(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"world");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_disconnect_fires_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let conn = Connection::connect(addr).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.chain().add_handler(Box::new(Forward(tx)));

        let event = rx.recv().await.unwrap();
        assert_eq!(event, b"error:connection closed");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_silences_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _socket = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let conn = Connection::connect(addr).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.chain().add_handler(Box::new(Forward(tx)));

        conn.close();
        conn.close();
        assert!(conn.write(Bytes::from_static(b"x")).is_err());
        // No error event fires for an intentional close.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_file_body_streams_fully() {
        use std::io::Write as _;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 241) as u8).collect();
        tmp.write_all(&content).unwrap();
        tmp.flush().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let expected = content.clone();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = vec![0u8; expected.len()];
            socket.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected);
        });

        let conn = Connection::connect(addr).await.unwrap();
        conn.write_file(tmp.path(), content.len() as u64).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_short_file_reports_error() {
        use std::io::Write as _;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"short").unwrap();
        tmp.flush().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let conn = Connection::connect(addr).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.chain().add_handler(Box::new(Forward(tx)));

        // Declares more bytes than the file holds.
        conn.write_file(tmp.path(), 100).unwrap();
        let event = rx.recv().await.unwrap();
        assert!(String::from_utf8_lossy(&event).starts_with("error:"));
    }
}
