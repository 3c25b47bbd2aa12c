//! # fastdfs-protocol
//!
//! Wire protocol implementation for FastDFS trackers and storage nodes.
//!
//! This crate provides:
//! - The fixed 10-byte frame header (u64 body length, command, status)
//! - Tracker and storage command opcodes and wire constants
//! - Statistics record parsing (group and storage-node stats)
//! - Protocol error types

pub mod command;
pub mod error;
pub mod header;
pub mod stat;
pub mod types;

pub use command::{StorageCmd, TrackerCmd};
pub use error::{status_message, ProtocolError};
pub use header::{FrameHeader, HEADER_BYTES};
pub use stat::{GroupStat, StatCursor, StorageStat};
pub use types::StorageLocation;

/// Size of the 8-byte big-endian length field.
pub const LENGTH_BYTES: usize = 8;

/// Maximum length of a group name, null-padded on the wire.
pub const GROUP_NAME_MAX_BYTES: usize = 16;

/// Length of an ip address field, null-padded.
pub const IP_ADDR_BYTES: usize = 15;

/// Length of a port field (encoded as a u64).
pub const PORT_BYTES: usize = 8;

/// Length of the file extension field on upload, null-padded.
pub const EXT_NAME_BYTES: usize = 6;

/// Maximum length of a storage id in stat records.
pub const STORAGE_ID_BYTES: usize = 16;

/// Maximum length of a domain name in stat records.
pub const DOMAIN_NAME_MAX_BYTES: usize = 128;

/// Length of the version field in stat records.
pub const VERSION_BYTES: usize = 6;

/// Body length of a QUERY_STORE response: group + ip + port + store path.
pub const QUERY_STORE_BODY_LEN: usize =
    GROUP_NAME_MAX_BYTES + IP_ADDR_BYTES + PORT_BYTES + 1;

/// Minimum body length of a QUERY_FETCH response: group + ip + port.
pub const QUERY_FETCH_BODY_LEN: usize = GROUP_NAME_MAX_BYTES + IP_ADDR_BYTES + PORT_BYTES;

/// Strips the null padding FastDFS uses for fixed-width string fields.
pub fn trim_padding(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == 0) {
        Some(end) => &raw[..end],
        None => raw,
    }
}
