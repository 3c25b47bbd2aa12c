//! Tracker client: storage-node lookup and cluster statistics.

use crate::base::BaseClient;
use crate::error::ClientError;
use bytes::{BufMut, Bytes, BytesMut};
use fastdfs_protocol::{
    trim_padding, FrameHeader, GroupStat, StorageLocation, StorageStat, TrackerCmd,
    GROUP_NAME_MAX_BYTES, IP_ADDR_BYTES, PORT_BYTES, QUERY_FETCH_BODY_LEN, QUERY_STORE_BODY_LEN,
};
use tokio::net::ToSocketAddrs;

/// Client for one tracker server.
///
/// All commands share one connection and run strictly one at a time in
/// submission order.
pub struct TrackerClient {
    inner: BaseClient,
}

impl TrackerClient {
    /// Connects to a tracker.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Ok(Self {
            inner: BaseClient::connect(addr).await?,
        })
    }

    /// Asks the tracker to pick a storage node for an upload, any group.
    pub async fn fetch_store_server(&self) -> Result<StorageLocation, ClientError> {
        self.query_store(TrackerCmd::QueryStoreWithoutGroupOne, None)
            .await
    }

    /// Asks the tracker to pick a storage node for an upload within one
    /// group.
    pub async fn fetch_store_server_with_group(
        &self,
        group_name: &str,
    ) -> Result<StorageLocation, ClientError> {
        self.query_store(TrackerCmd::QueryStoreWithGroupOne, Some(group_name))
            .await
    }

    async fn query_store(
        &self,
        cmd: TrackerCmd,
        group_name: Option<&str>,
    ) -> Result<StorageLocation, ClientError> {
        let packet = query_packet(cmd, group_name, None);
        let conn = self.inner.conn().clone();
        let (header, body) = self.inner.command(move || conn.write(packet)).await?;
        check_body_len(&header, &body, QUERY_STORE_BODY_LEN)?;

        let mut location = parse_location(&body)?;
        location.store_path = Some(body[QUERY_STORE_BODY_LEN - 1]);
        Ok(location)
    }

    /// Locates one storage node holding `remote_filename`.
    pub async fn fetch_fetch_server(
        &self,
        group_name: &str,
        remote_filename: &str,
    ) -> Result<StorageLocation, ClientError> {
        let packet = query_packet(
            TrackerCmd::QueryFetchOne,
            Some(group_name),
            Some(remote_filename),
        );
        let conn = self.inner.conn().clone();
        let (header, body) = self.inner.command(move || conn.write(packet)).await?;
        check_min_body_len(&header, &body, QUERY_FETCH_BODY_LEN)?;
        parse_location(&body)
    }

    /// Locates every storage node holding `remote_filename`. The
    /// response carries one full location followed by extra ip records.
    pub async fn fetch_fetch_servers(
        &self,
        group_name: &str,
        remote_filename: &str,
    ) -> Result<Vec<StorageLocation>, ClientError> {
        let packet = query_packet(
            TrackerCmd::QueryFetchAll,
            Some(group_name),
            Some(remote_filename),
        );
        let conn = self.inner.conn().clone();
        let (header, body) = self.inner.command(move || conn.write(packet)).await?;
        check_min_body_len(&header, &body, QUERY_FETCH_BODY_LEN)?;

        let first = parse_location(&body)?;
        let port = first.port;
        let group = first.group_name.clone();
        let mut servers = vec![first];

        let mut offset = QUERY_FETCH_BODY_LEN;
        while offset + IP_ADDR_BYTES <= body.len() {
            let host = parse_str(&body[offset..offset + IP_ADDR_BYTES]);
            servers.push(StorageLocation {
                host,
                port,
                store_path: None,
                group_name: group.clone(),
            });
            offset += IP_ADDR_BYTES;
        }
        Ok(servers)
    }

    /// Lists statistics for every storage group.
    pub async fn list_groups(&self) -> Result<Vec<GroupStat>, ClientError> {
        let packet = query_packet(TrackerCmd::ListGroups, None, None);
        let conn = self.inner.conn().clone();
        let (_, body) = self.inner.command(move || conn.write(packet)).await?;
        Ok(GroupStat::parse_all(&body)?)
    }

    /// Lists statistics for the storage nodes of one group, optionally
    /// narrowed to a single node by ip.
    pub async fn list_storages(
        &self,
        group_name: &str,
        storage_ip: Option<&str>,
    ) -> Result<Vec<StorageStat>, ClientError> {
        let mut body = BytesMut::with_capacity(GROUP_NAME_MAX_BYTES);
        put_group_name(&mut body, group_name);
        if let Some(ip) = storage_ip {
            body.put_slice(ip.as_bytes());
        }
        let packet = packet_with_body(TrackerCmd::ListStorages, &body);
        let conn = self.inner.conn().clone();
        let (_, body) = self.inner.command(move || conn.write(packet)).await?;
        Ok(StorageStat::parse_all(&body)?)
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

fn put_group_name(buf: &mut BytesMut, group_name: &str) {
    let mut padded = [0u8; GROUP_NAME_MAX_BYTES];
    let len = group_name.len().min(GROUP_NAME_MAX_BYTES);
    padded[..len].copy_from_slice(&group_name.as_bytes()[..len]);
    buf.put_slice(&padded);
}

fn packet_with_body(cmd: TrackerCmd, body: &[u8]) -> Bytes {
    let mut buf = FrameHeader::new(body.len() as u64, cmd.into(), 0).encode();
    buf.put_slice(body);
    buf.freeze()
}

fn query_packet(cmd: TrackerCmd, group_name: Option<&str>, path: Option<&str>) -> Bytes {
    let mut body = BytesMut::new();
    if let Some(group) = group_name {
        put_group_name(&mut body, group);
    }
    if let Some(path) = path {
        body.put_slice(path.as_bytes());
    }
    packet_with_body(cmd, &body)
}

fn parse_str(raw: &[u8]) -> String {
    String::from_utf8_lossy(trim_padding(raw)).into_owned()
}

fn parse_port(raw: &[u8]) -> Result<u16, ClientError> {
    let port = u64::from_be_bytes(raw.try_into().expect("8-byte slice"));
    u16::try_from(port)
        .map_err(|_| ClientError::MalformedResponse(format!("port {port} out of range")))
}

/// Parses the common group/ip/port prefix of tracker lookup responses.
fn parse_location(body: &[u8]) -> Result<StorageLocation, ClientError> {
    let group_name = parse_str(&body[..GROUP_NAME_MAX_BYTES]);
    let host = parse_str(&body[GROUP_NAME_MAX_BYTES..GROUP_NAME_MAX_BYTES + IP_ADDR_BYTES]);
    let port_start = GROUP_NAME_MAX_BYTES + IP_ADDR_BYTES;
    let port = parse_port(&body[port_start..port_start + PORT_BYTES])?;
    Ok(StorageLocation {
        host,
        port,
        store_path: None,
        group_name: if group_name.is_empty() {
            None
        } else {
            Some(group_name)
        },
    })
}

fn check_body_len(
    header: &FrameHeader,
    body: &[u8],
    expected: usize,
) -> Result<(), ClientError> {
    if header.length != expected as u64 || body.len() != expected {
        return Err(ClientError::MalformedResponse(format!(
            "body is {} bytes, expected {expected}",
            body.len()
        )));
    }
    Ok(())
}

fn check_min_body_len(
    header: &FrameHeader,
    body: &[u8],
    minimum: usize,
) -> Result<(), ClientError> {
    if header.length < minimum as u64 || body.len() < minimum {
        return Err(ClientError::MalformedResponse(format!(
            "body is {} bytes, expected at least {minimum}",
            body.len()
        )));
    }
    Ok(())
}
