//! Stream identity and the records routed to subscribers
//!
//! This module defines the key types for identifying streams and the records
//! that are fanned out to subscribers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Unique identifier for a log stream (region + stream name)
///
/// Two keys naming the same region and stream are interchangeable and
/// collapse to a single registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// Stream name as known to the upstream service
    pub name: String,
    /// Region hosting the stream (e.g., "us-west-2")
    pub region: String,
}

impl StreamKey {
    /// Create a new stream key
    pub fn new(region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region, self.name)
    }
}

/// A record read from one shard, tagged with the stream it came from
///
/// Cheap to clone: the payload is reference counted, so every subscriber of
/// a stream shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMessage {
    /// Stream the record was read from
    pub stream: StreamKey,
    /// Raw record data
    pub payload: Bytes,
}

impl RecordMessage {
    /// Create a record for the given stream
    pub fn new(stream: StreamKey, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_keys_with_same_region_and_name_collapse() {
        let mut map = HashMap::new();
        map.insert(StreamKey::new("us-west-2", "metrics"), 1);
        map.insert(StreamKey::new("us-west-2", "metrics"), 2);
        map.insert(StreamKey::new("eu-west-1", "metrics"), 3);

        assert_eq!(map.len(), 2);
        assert_eq!(map[&StreamKey::new("us-west-2", "metrics")], 2);
    }

    #[test]
    fn test_display() {
        let key = StreamKey::new("us-west-2", "metrics");
        assert_eq!(key.to_string(), "us-west-2/metrics");
    }

    #[test]
    fn test_serializes_as_name_and_region() {
        let key = StreamKey::new("us-east-1", "clicks");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, serde_json::json!({"name": "clicks", "region": "us-east-1"}));
    }
}
