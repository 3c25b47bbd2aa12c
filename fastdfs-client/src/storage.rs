//! Storage client: file upload, download, and mutation commands.

use crate::base::BaseClient;
use crate::error::ClientError;
use crate::queue::Task;
use crate::redirect::{DownloadStream, StreamRedirector};
use bytes::{BufMut, Bytes, BytesMut};
use fastdfs_protocol::{
    trim_padding, FrameHeader, StorageCmd, StorageLocation, EXT_NAME_BYTES, GROUP_NAME_MAX_BYTES,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

/// A stored file's identity, as returned by upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub group_name: String,
    pub remote_filename: String,
}

impl StoredFile {
    /// `group/remote_filename`, the usual single-string form.
    pub fn file_id(&self) -> String {
        format!("{}/{}", self.group_name, self.remote_filename)
    }
}

/// An upload body. Bytes are sent as-is; files and readers are streamed
/// by the connection's writer task without buffering the whole body.
pub enum UploadSource {
    Bytes(Bytes),
    File { path: PathBuf, len: u64 },
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        len: u64,
    },
}

impl UploadSource {
    fn len(&self) -> u64 {
        match self {
            UploadSource::Bytes(data) => data.len() as u64,
            UploadSource::File { len, .. } => *len,
            UploadSource::Reader { len, .. } => *len,
        }
    }
}

/// Client for one storage node, usually obtained from a tracker lookup.
pub struct StorageClient {
    inner: BaseClient,
    store_path: u8,
}

impl StorageClient {
    /// Connects to the storage node a tracker picked. Uses the lookup's
    /// store path index, or path 0 for fetch-style lookups.
    pub async fn connect(location: &StorageLocation) -> Result<Self, ClientError> {
        let inner = BaseClient::connect(location.address()).await?;
        Ok(Self {
            inner,
            store_path: location.store_path.unwrap_or(0),
        })
    }

    /// Uploads an in-memory buffer. `ext` is the extension without the
    /// dot, truncated to the wire limit.
    pub async fn upload_data(
        &self,
        data: impl Into<Bytes>,
        ext: &str,
    ) -> Result<StoredFile, ClientError> {
        self.do_upload(StorageCmd::UploadFile, UploadSource::Bytes(data.into()), ext)
            .await
    }

    /// Uploads a local file, streaming its content. The extension
    /// defaults to the file's own.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<StoredFile, ClientError> {
        let path = path.as_ref();
        let len = tokio::fs::metadata(path).await?.len();
        let ext = ext_of(path);
        self.do_upload(
            StorageCmd::UploadFile,
            UploadSource::File {
                path: path.to_path_buf(),
                len,
            },
            &ext,
        )
        .await
    }

    /// Uploads `len` bytes from a reader, streaming its content.
    pub async fn upload_reader(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        len: u64,
        ext: &str,
    ) -> Result<StoredFile, ClientError> {
        self.do_upload(
            StorageCmd::UploadFile,
            UploadSource::Reader { reader, len },
            ext,
        )
        .await
    }

    /// Uploads an in-memory buffer as an appender file, which later
    /// accepts `append`, `modify`, and `truncate`.
    pub async fn upload_appender_data(
        &self,
        data: impl Into<Bytes>,
        ext: &str,
    ) -> Result<StoredFile, ClientError> {
        self.do_upload(
            StorageCmd::UploadAppenderFile,
            UploadSource::Bytes(data.into()),
            ext,
        )
        .await
    }

    /// Uploads a local file as an appender file.
    pub async fn upload_appender_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<StoredFile, ClientError> {
        let path = path.as_ref();
        let len = tokio::fs::metadata(path).await?.len();
        let ext = ext_of(path);
        self.do_upload(
            StorageCmd::UploadAppenderFile,
            UploadSource::File {
                path: path.to_path_buf(),
                len,
            },
            &ext,
        )
        .await
    }

    /// Uploads `len` bytes from a reader as an appender file.
    pub async fn upload_appender_reader(
        &self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        len: u64,
        ext: &str,
    ) -> Result<StoredFile, ClientError> {
        self.do_upload(
            StorageCmd::UploadAppenderFile,
            UploadSource::Reader { reader, len },
            ext,
        )
        .await
    }

    async fn do_upload(
        &self,
        cmd: StorageCmd,
        source: UploadSource,
        ext: &str,
    ) -> Result<StoredFile, ClientError> {
        let size = source.len();
        let meta = upload_meta(cmd, self.store_path, size, ext);
        let conn = self.inner.conn().clone();
        let (_, body) = self
            .inner
            .command(move || {
                conn.write(meta)?;
                match source {
                    UploadSource::Bytes(data) => conn.write(data),
                    UploadSource::File { path, len } => conn.write_file(path, len),
                    UploadSource::Reader { reader, len } => conn.write_reader(reader, len),
                }
            })
            .await?;
        parse_stored_file(&body)
    }

    /// Downloads a whole file (or a `count`-byte slice from `offset`)
    /// into memory. `count` 0 means to the end of the file.
    pub async fn download(
        &self,
        group_name: &str,
        remote_filename: &str,
        offset: u64,
        count: u64,
    ) -> Result<Bytes, ClientError> {
        let packet = download_packet(group_name, remote_filename, offset, count);
        let conn = self.inner.conn().clone();
        let (_, body) = self.inner.command(move || conn.write(packet)).await?;
        Ok(body)
    }

    /// Downloads without buffering: body chunks are pushed to the
    /// returned stream as they arrive off the socket. Errors, including
    /// a non-zero server status, surface on the stream itself.
    pub fn download_to_stream(
        &self,
        group_name: &str,
        remote_filename: &str,
        offset: u64,
        count: u64,
    ) -> DownloadStream {
        let packet = download_packet(group_name, remote_filename, offset, count);
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let conn = self.inner.conn().clone();
        let events = self.inner.queue().clone();

        // The redirector goes in front of the frame decoder just before
        // the command is written, so the very next inbound bytes are the
        // redirected response. It reports completion to the queue itself;
        // the task's response exists only to surface a rejection, which
        // reaches the queue but not the redirector's sink.
        let err_sink = sink_tx.clone();
        self.inner.submit(
            Task::new(move || {
                conn.chain()
                    .unshift_handler(Box::new(StreamRedirector::new(
                        sink_tx,
                        true,
                        move |event| events.deliver(event),
                    )));
                conn.write(packet)
            })
            .with_response(move |reply| {
                if let Err(err) = reply {
                    let _ = err_sink.send(Err(err));
                }
            }),
        );
        DownloadStream::new(sink_rx)
    }

    /// Appends data to an appender file.
    pub async fn append(
        &self,
        remote_filename: &str,
        data: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let data = data.into();
        let mut packet = FrameHeader::new(
            (16 + remote_filename.len() + data.len()) as u64,
            StorageCmd::AppendFile.into(),
            0,
        )
        .encode();
        packet.put_u64(remote_filename.len() as u64);
        packet.put_u64(data.len() as u64);
        packet.put_slice(remote_filename.as_bytes());
        packet.put_slice(&data);
        self.run(packet.freeze()).await
    }

    /// Overwrites `data.len()` bytes of an appender file at `offset`.
    pub async fn modify(
        &self,
        remote_filename: &str,
        offset: u64,
        data: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let data = data.into();
        let mut packet = FrameHeader::new(
            (24 + remote_filename.len() + data.len()) as u64,
            StorageCmd::ModifyFile.into(),
            0,
        )
        .encode();
        packet.put_u64(remote_filename.len() as u64);
        packet.put_u64(offset);
        packet.put_u64(data.len() as u64);
        packet.put_slice(remote_filename.as_bytes());
        packet.put_slice(&data);
        self.run(packet.freeze()).await
    }

    /// Truncates an appender file to `truncated_size` bytes.
    pub async fn truncate(
        &self,
        remote_filename: &str,
        truncated_size: u64,
    ) -> Result<(), ClientError> {
        let mut packet = FrameHeader::new(
            (16 + remote_filename.len()) as u64,
            StorageCmd::TruncateFile.into(),
            0,
        )
        .encode();
        packet.put_u64(remote_filename.len() as u64);
        packet.put_u64(truncated_size);
        packet.put_slice(remote_filename.as_bytes());
        self.run(packet.freeze()).await
    }

    /// Deletes a stored file.
    pub async fn delete(
        &self,
        group_name: &str,
        remote_filename: &str,
    ) -> Result<(), ClientError> {
        let mut packet = FrameHeader::new(
            (GROUP_NAME_MAX_BYTES + remote_filename.len()) as u64,
            StorageCmd::DeleteFile.into(),
            0,
        )
        .encode();
        put_group_name(&mut packet, group_name);
        packet.put_slice(remote_filename.as_bytes());
        self.run(packet.freeze()).await
    }

    async fn run(&self, packet: Bytes) -> Result<(), ClientError> {
        let conn = self.inner.conn().clone();
        self.inner.command(move || conn.write(packet)).await?;
        Ok(())
    }

    /// Drains already-submitted commands, then closes the connection.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Fails everything outstanding and closes the connection now.
    pub fn abort(&self) {
        self.inner.abort();
    }
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn put_group_name(buf: &mut BytesMut, group_name: &str) {
    let mut padded = [0u8; GROUP_NAME_MAX_BYTES];
    let len = group_name.len().min(GROUP_NAME_MAX_BYTES);
    padded[..len].copy_from_slice(&group_name.as_bytes()[..len]);
    buf.put_slice(&padded);
}

/// Header plus the fixed-size upload preamble: store path index, body
/// size, and null-padded extension. The file content follows separately.
fn upload_meta(cmd: StorageCmd, store_path: u8, size: u64, ext: &str) -> Bytes {
    let body_len = 1 + 8 + EXT_NAME_BYTES as u64 + size;
    let mut buf = FrameHeader::new(body_len, cmd.into(), 0).encode();
    buf.put_u8(store_path);
    buf.put_u64(size);
    let mut padded = [0u8; EXT_NAME_BYTES];
    let len = ext.len().min(EXT_NAME_BYTES);
    padded[..len].copy_from_slice(&ext.as_bytes()[..len]);
    buf.put_slice(&padded);
    buf.freeze()
}

fn download_packet(group_name: &str, remote_filename: &str, offset: u64, count: u64) -> Bytes {
    let body_len = 8 + 8 + GROUP_NAME_MAX_BYTES + remote_filename.len();
    let mut buf = FrameHeader::new(body_len as u64, StorageCmd::DownloadFile.into(), 0).encode();
    buf.put_u64(offset);
    buf.put_u64(count);
    put_group_name(&mut buf, group_name);
    buf.put_slice(remote_filename.as_bytes());
    buf.freeze()
}

fn parse_stored_file(body: &[u8]) -> Result<StoredFile, ClientError> {
    if body.len() <= GROUP_NAME_MAX_BYTES {
        return Err(ClientError::MalformedResponse(format!(
            "upload response is {} bytes",
            body.len()
        )));
    }
    let group_name =
        String::from_utf8_lossy(trim_padding(&body[..GROUP_NAME_MAX_BYTES])).into_owned();
    let remote_filename = String::from_utf8_lossy(&body[GROUP_NAME_MAX_BYTES..]).into_owned();
    Ok(StoredFile {
        group_name,
        remote_filename,
    })
}
