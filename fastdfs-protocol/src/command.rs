//! Command opcodes for tracker and storage requests.

/// Tracker server commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TrackerCmd {
    /// List statistics for every storage group.
    ListGroups = 91,
    /// List statistics for the storage nodes of one group.
    ListStorages = 92,
    /// Pick one storage node for upload, any group.
    QueryStoreWithoutGroupOne = 101,
    /// Locate one storage node holding a file.
    QueryFetchOne = 102,
    /// Pick one storage node for upload within a given group.
    QueryStoreWithGroupOne = 104,
    /// Locate every storage node holding a file.
    QueryFetchAll = 105,
}

impl From<TrackerCmd> for u8 {
    fn from(cmd: TrackerCmd) -> u8 {
        cmd as u8
    }
}

/// Storage server commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StorageCmd {
    UploadFile = 11,
    DeleteFile = 12,
    DownloadFile = 14,
    UploadAppenderFile = 23,
    AppendFile = 24,
    ModifyFile = 34,
    TruncateFile = 36,
}

impl From<StorageCmd> for u8 {
    fn from(cmd: StorageCmd) -> u8 {
        cmd as u8
    }
}
