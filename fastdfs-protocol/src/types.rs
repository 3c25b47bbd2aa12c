//! Shared protocol types.

/// Location of a storage node, as reported by a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub host: String,
    pub port: u16,
    /// Store path index to use when uploading; only present on
    /// QUERY_STORE responses.
    pub store_path: Option<u8>,
    /// Group the node belongs to, when the tracker reports one.
    pub group_name: Option<String>,
}

impl StorageLocation {
    /// Address string suitable for `ToSocketAddrs`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address() {
        let loc = StorageLocation {
            host: "10.0.0.3".to_string(),
            port: 23000,
            store_path: Some(0),
            group_name: Some("group1".to_string()),
        };
        assert_eq!(loc.address(), "10.0.0.3:23000");
    }
}
