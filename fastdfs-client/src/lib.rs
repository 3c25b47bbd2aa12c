//! Async FastDFS client.
//!
//! Two entry points mirror the two server roles: [`TrackerClient`]
//! locates storage nodes and reports cluster statistics, and
//! [`StorageClient`] uploads, downloads, and mutates files on one node.
//!
//! Each client owns a single TCP connection and a task queue that runs
//! commands strictly one at a time in submission order, matching the
//! protocol's one-request-in-flight rule. Inbound bytes flow through a
//! handler chain: normally just a frame decoder, with a stream
//! redirector spliced in front for unbuffered downloads.
//!
//! ```no_run
//! use fastdfs_client::{StorageClient, TrackerClient};
//!
//! # async fn demo() -> Result<(), fastdfs_client::ClientError> {
//! let tracker = TrackerClient::connect("127.0.0.1:22122").await?;
//! let location = tracker.fetch_store_server().await?;
//!
//! let storage = StorageClient::connect(&location).await?;
//! let stored = storage.upload_data(&b"hello"[..], "txt").await?;
//! let content = storage
//!     .download(&stored.group_name, &stored.remote_filename, 0, 0)
//!     .await?;
//! assert_eq!(content.as_ref(), b"hello");
//! # Ok(())
//! # }
//! ```

mod base;
pub mod chain;
pub mod conn;
pub mod decoder;
pub mod error;
pub mod queue;
pub mod redirect;
pub mod storage;
pub mod tracker;

pub use error::ClientError;
pub use redirect::DownloadStream;
pub use storage::{StorageClient, StoredFile, UploadSource};
pub use tracker::TrackerClient;

pub use fastdfs_protocol::{GroupStat, StorageLocation, StorageStat};
