//! Statistics records returned by tracker LIST_GROUPS / LIST_STORAGES.
//!
//! The payload is a sequence of fixed-layout records: null-padded
//! strings, 8-byte big-endian integers (some of which only use the low
//! 32 bits), 4-byte integers, epoch-second timestamps and a trailing
//! boolean. `StatCursor` walks one record; the `parse_all` constructors
//! consume records until the payload is exhausted.

use crate::error::ProtocolError;
use crate::{
    trim_padding, DOMAIN_NAME_MAX_BYTES, GROUP_NAME_MAX_BYTES, IP_ADDR_BYTES, STORAGE_ID_BYTES,
    VERSION_BYTES,
};
use chrono::{DateTime, Utc};

/// Sequential reader over a stats payload.
pub struct StatCursor<'a> {
    data: &'a [u8],
    pos: usize,
    record: &'static str,
}

impl<'a> StatCursor<'a> {
    pub fn new(data: &'a [u8], record: &'static str) -> Self {
        Self {
            data,
            pos: 0,
            record,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::TruncatedRecord {
                record: self.record,
                field,
                offset: self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, ProtocolError> {
        Ok(self.read_u8(field)? != 0)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        let raw = self.take(4, field)?;
        Ok(u32::from_be_bytes(raw.try_into().expect("4-byte slice")))
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        let raw = self.take(8, field)?;
        Ok(u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
    }

    /// Reads an 8-byte field whose meaningful half is the low 32 bits.
    pub fn read_u32_wide(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        Ok(self.read_u64(field)? as u32)
    }

    /// Reads a null-padded fixed-width string field.
    pub fn read_str(&mut self, len: usize, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.take(len, field)?;
        Ok(String::from_utf8_lossy(trim_padding(raw)).into_owned())
    }

    /// Reads a group name; the wire pads it to 16 bytes plus one
    /// separator byte.
    pub fn read_group_name(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        self.read_str(GROUP_NAME_MAX_BYTES + 1, field)
    }

    /// Reads an epoch-second timestamp.
    pub fn read_time(&mut self, field: &'static str) -> Result<DateTime<Utc>, ProtocolError> {
        let secs = self.read_u64(field)?;
        DateTime::<Utc>::from_timestamp(secs as i64, 0).ok_or_else(|| {
            ProtocolError::InvalidField {
                field,
                reason: format!("timestamp {secs} out of range"),
            }
        })
    }
}

/// Statistics for one storage group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStat {
    pub group_name: String,
    pub total_mb: u64,
    pub free_mb: u64,
    pub trunk_free_mb: u64,
    pub storage_count: u32,
    pub storage_port: u32,
    pub storage_http_port: u32,
    pub active_count: u32,
    pub current_write_server: u32,
    pub store_path_count: u32,
    pub subdir_count_per_path: u32,
    pub current_trunk_file_id: u32,
}

impl GroupStat {
    pub fn parse(cursor: &mut StatCursor<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            group_name: cursor.read_group_name("group_name")?,
            total_mb: cursor.read_u64("total_mb")?,
            free_mb: cursor.read_u64("free_mb")?,
            trunk_free_mb: cursor.read_u64("trunk_free_mb")?,
            storage_count: cursor.read_u32_wide("storage_count")?,
            storage_port: cursor.read_u32_wide("storage_port")?,
            storage_http_port: cursor.read_u32_wide("storage_http_port")?,
            active_count: cursor.read_u32_wide("active_count")?,
            current_write_server: cursor.read_u32_wide("current_write_server")?,
            store_path_count: cursor.read_u32_wide("store_path_count")?,
            subdir_count_per_path: cursor.read_u32_wide("subdir_count_per_path")?,
            current_trunk_file_id: cursor.read_u32_wide("current_trunk_file_id")?,
        })
    }

    /// Parses consecutive group records until the payload is exhausted.
    pub fn parse_all(body: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        let mut cursor = StatCursor::new(body, "group stat");
        let mut stats = Vec::new();
        while cursor.remaining() > 0 {
            stats.push(Self::parse(&mut cursor)?);
        }
        Ok(stats)
    }
}

/// Statistics for one storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStat {
    pub status: u8,
    pub id: String,
    pub ip_addr: String,
    pub domain_name: String,
    pub src_ip_addr: String,
    pub version: String,
    pub join_time: DateTime<Utc>,
    pub up_time: DateTime<Utc>,
    pub total_mb: u64,
    pub free_mb: u64,
    pub upload_priority: u32,
    pub store_path_count: u32,
    pub subdir_count_per_path: u32,
    pub current_write_path: u32,
    pub storage_port: u32,
    pub storage_http_port: u32,
    pub connection_alloc_count: u32,
    pub connection_current_count: u32,
    pub connection_max_count: u32,
    pub total_upload_count: u64,
    pub success_upload_count: u64,
    pub total_append_count: u64,
    pub success_append_count: u64,
    pub total_modify_count: u64,
    pub success_modify_count: u64,
    pub total_truncate_count: u64,
    pub success_truncate_count: u64,
    pub total_set_meta_count: u64,
    pub success_set_meta_count: u64,
    pub total_delete_count: u64,
    pub success_delete_count: u64,
    pub total_download_count: u64,
    pub success_download_count: u64,
    pub total_get_meta_count: u64,
    pub success_get_meta_count: u64,
    pub total_create_link_count: u64,
    pub success_create_link_count: u64,
    pub total_delete_link_count: u64,
    pub success_delete_link_count: u64,
    pub total_upload_bytes: u64,
    pub success_upload_bytes: u64,
    pub total_append_bytes: u64,
    pub success_append_bytes: u64,
    pub total_modify_bytes: u64,
    pub success_modify_bytes: u64,
    pub total_download_bytes: u64,
    pub success_download_bytes: u64,
    pub total_sync_in_bytes: u64,
    pub success_sync_in_bytes: u64,
    pub total_sync_out_bytes: u64,
    pub success_sync_out_bytes: u64,
    pub total_file_open_count: u64,
    pub success_file_open_count: u64,
    pub total_file_read_count: u64,
    pub success_file_read_count: u64,
    pub total_file_write_count: u64,
    pub success_file_write_count: u64,
    pub last_source_update: DateTime<Utc>,
    pub last_sync_update: DateTime<Utc>,
    pub last_synced_timestamp: DateTime<Utc>,
    pub last_heartbeat_time: DateTime<Utc>,
    pub is_trunk_server: bool,
}

impl StorageStat {
    pub fn parse(cursor: &mut StatCursor<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            status: cursor.read_u8("status")?,
            id: cursor.read_str(STORAGE_ID_BYTES, "id")?,
            ip_addr: cursor.read_str(IP_ADDR_BYTES + 1, "ip_addr")?,
            domain_name: cursor.read_str(DOMAIN_NAME_MAX_BYTES, "domain_name")?,
            src_ip_addr: cursor.read_str(IP_ADDR_BYTES + 1, "src_ip_addr")?,
            version: cursor.read_str(VERSION_BYTES, "version")?,
            join_time: cursor.read_time("join_time")?,
            up_time: cursor.read_time("up_time")?,
            total_mb: cursor.read_u64("total_mb")?,
            free_mb: cursor.read_u64("free_mb")?,
            upload_priority: cursor.read_u32_wide("upload_priority")?,
            store_path_count: cursor.read_u32_wide("store_path_count")?,
            subdir_count_per_path: cursor.read_u32_wide("subdir_count_per_path")?,
            current_write_path: cursor.read_u32_wide("current_write_path")?,
            storage_port: cursor.read_u32_wide("storage_port")?,
            storage_http_port: cursor.read_u32_wide("storage_http_port")?,
            connection_alloc_count: cursor.read_u32("connection_alloc_count")?,
            connection_current_count: cursor.read_u32("connection_current_count")?,
            connection_max_count: cursor.read_u32("connection_max_count")?,
            total_upload_count: cursor.read_u64("total_upload_count")?,
            success_upload_count: cursor.read_u64("success_upload_count")?,
            total_append_count: cursor.read_u64("total_append_count")?,
            success_append_count: cursor.read_u64("success_append_count")?,
            total_modify_count: cursor.read_u64("total_modify_count")?,
            success_modify_count: cursor.read_u64("success_modify_count")?,
            total_truncate_count: cursor.read_u64("total_truncate_count")?,
            success_truncate_count: cursor.read_u64("success_truncate_count")?,
            total_set_meta_count: cursor.read_u64("total_set_meta_count")?,
            success_set_meta_count: cursor.read_u64("success_set_meta_count")?,
            total_delete_count: cursor.read_u64("total_delete_count")?,
            success_delete_count: cursor.read_u64("success_delete_count")?,
            total_download_count: cursor.read_u64("total_download_count")?,
            success_download_count: cursor.read_u64("success_download_count")?,
            total_get_meta_count: cursor.read_u64("total_get_meta_count")?,
            success_get_meta_count: cursor.read_u64("success_get_meta_count")?,
            total_create_link_count: cursor.read_u64("total_create_link_count")?,
            success_create_link_count: cursor.read_u64("success_create_link_count")?,
            total_delete_link_count: cursor.read_u64("total_delete_link_count")?,
            success_delete_link_count: cursor.read_u64("success_delete_link_count")?,
            total_upload_bytes: cursor.read_u64("total_upload_bytes")?,
            success_upload_bytes: cursor.read_u64("success_upload_bytes")?,
            total_append_bytes: cursor.read_u64("total_append_bytes")?,
            success_append_bytes: cursor.read_u64("success_append_bytes")?,
            total_modify_bytes: cursor.read_u64("total_modify_bytes")?,
            success_modify_bytes: cursor.read_u64("success_modify_bytes")?,
            total_download_bytes: cursor.read_u64("total_download_bytes")?,
            success_download_bytes: cursor.read_u64("success_download_bytes")?,
            total_sync_in_bytes: cursor.read_u64("total_sync_in_bytes")?,
            success_sync_in_bytes: cursor.read_u64("success_sync_in_bytes")?,
            total_sync_out_bytes: cursor.read_u64("total_sync_out_bytes")?,
            success_sync_out_bytes: cursor.read_u64("success_sync_out_bytes")?,
            total_file_open_count: cursor.read_u64("total_file_open_count")?,
            success_file_open_count: cursor.read_u64("success_file_open_count")?,
            total_file_read_count: cursor.read_u64("total_file_read_count")?,
            success_file_read_count: cursor.read_u64("success_file_read_count")?,
            total_file_write_count: cursor.read_u64("total_file_write_count")?,
            success_file_write_count: cursor.read_u64("success_file_write_count")?,
            last_source_update: cursor.read_time("last_source_update")?,
            last_sync_update: cursor.read_time("last_sync_update")?,
            last_synced_timestamp: cursor.read_time("last_synced_timestamp")?,
            last_heartbeat_time: cursor.read_time("last_heartbeat_time")?,
            is_trunk_server: cursor.read_bool("is_trunk_server")?,
        })
    }

    /// Parses consecutive storage records until the payload is exhausted.
    pub fn parse_all(body: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        let mut cursor = StatCursor::new(body, "storage stat");
        let mut stats = Vec::new();
        while cursor.remaining() > 0 {
            stats.push(Self::parse(&mut cursor)?);
        }
        Ok(stats)
    }
}

/// Byte size of one group stat record on the wire.
pub const GROUP_STAT_BYTES: usize = GROUP_NAME_MAX_BYTES + 1 + 3 * 8 + 8 * 8;
