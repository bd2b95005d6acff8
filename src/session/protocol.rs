//! Client message envelopes
//!
//! Every frame in either direction is a JSON object `{name, data}`. The
//! name selects the handler; the shape of `data` depends on it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::registry::StreamKey;

/// Outbound message names
pub mod names {
    pub const CONNECTION_OPEN: &str = "connection_open";
    pub const UPDATE_DATA: &str = "update_data";
    pub const LIST_OF_STREAMS: &str = "list_of_streams";
    pub const ERROR: &str = "error";

    pub const OPEN: &str = "open";
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const LIST_STREAMS: &str = "list_streams";
}

/// A message in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Acknowledges `open` / `connected`
    pub fn connection_open() -> Self {
        Self::new(names::CONNECTION_OPEN, Value::Null)
    }

    /// One decoded record
    pub fn update_data(point: &DataPoint) -> Self {
        Self::new(names::UPDATE_DATA, json!({ "x": point.x, "y": point.y }))
    }

    /// Streams available across the configured regions
    pub fn list_of_streams(streams: &[StreamKey]) -> Self {
        let streams: Vec<Value> = streams
            .iter()
            .map(|s| json!({ "name": s.name, "region": s.region }))
            .collect();
        Self::new(names::LIST_OF_STREAMS, json!({ "streams": streams }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(names::ERROR, Value::String(message.into()))
    }

    /// Parse a text frame
    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_slice(text.as_bytes())
    }

    /// Parse a frame that should hold UTF-8 JSON
    pub fn from_slice(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }

    /// Render as a text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of `subscribe` / `unsubscribe`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamRequest {
    #[serde(alias = "Stream")]
    pub stream: String,
    #[serde(default, alias = "Region")]
    pub region: Option<String>,
}

impl StreamRequest {
    /// Resolve to a key, falling back to `default_region`
    pub fn key(&self, default_region: &str) -> StreamKey {
        let region = match self.region.as_deref() {
            Some(region) if !region.is_empty() => region,
            _ => default_region,
        };
        StreamKey::new(region, self.stream.clone())
    }
}

/// Structured form of a record payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: String,
    pub y: String,
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open,
    Subscribe(StreamRequest),
    Unsubscribe(StreamRequest),
    ListStreams,
    /// No handler is registered for this name
    Unknown(String),
}

impl Request {
    /// Decode the envelope's payload according to its name
    pub fn decode(envelope: Envelope) -> Result<Self> {
        let request = match envelope.name.as_str() {
            names::OPEN | names::CONNECTED => Request::Open,
            names::SUBSCRIBE => Request::Subscribe(stream_request(envelope.data)?),
            names::UNSUBSCRIBE => Request::Unsubscribe(stream_request(envelope.data)?),
            names::LIST_STREAMS => Request::ListStreams,
            _ => Request::Unknown(envelope.name),
        };
        Ok(request)
    }
}

fn stream_request(data: Value) -> Result<StreamRequest> {
    let request: StreamRequest = serde_json::from_value(data)?;
    if request.stream.is_empty() {
        return Err(Error::Protocol("stream name must not be empty".to_string()));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_shapes() {
        assert_eq!(
            Envelope::connection_open().to_text().unwrap(),
            r#"{"name":"connection_open","data":null}"#
        );

        let point = DataPoint {
            x: "1".into(),
            y: "2".into(),
        };
        let update: Value = serde_json::from_str(&Envelope::update_data(&point).to_text().unwrap()).unwrap();
        assert_eq!(update, json!({"name": "update_data", "data": {"x": "1", "y": "2"}}));

        let list = Envelope::list_of_streams(&[StreamKey::new("us-west-2", "a")]);
        assert_eq!(
            list.data,
            json!({"streams": [{"name": "a", "region": "us-west-2"}]})
        );

        assert_eq!(Envelope::error("bad").data, json!("bad"));
    }

    #[test]
    fn test_decode_subscribe() {
        let envelope = Envelope::from_text(
            r#"{"name":"subscribe","data":{"stream":"X","region":"eu-west-1"}}"#,
        )
        .unwrap();

        let request = Request::decode(envelope).unwrap();

        let Request::Subscribe(req) = request else {
            panic!("expected subscribe");
        };
        assert_eq!(req.key("us-west-2"), StreamKey::new("eu-west-1", "X"));
    }

    #[test]
    fn test_region_defaults() {
        let envelope = Envelope::from_text(r#"{"name":"unsubscribe","data":{"Stream":"X"}}"#).unwrap();

        let Request::Unsubscribe(req) = Request::decode(envelope).unwrap() else {
            panic!("expected unsubscribe");
        };
        assert_eq!(req.key("us-west-2"), StreamKey::new("us-west-2", "X"));

        let empty = StreamRequest {
            stream: "X".into(),
            region: Some(String::new()),
        };
        assert_eq!(empty.key("us-west-2").region, "us-west-2");
    }

    #[test]
    fn test_open_without_data() {
        let open = Envelope::from_text(r#"{"name":"open"}"#).unwrap();
        let connected = Envelope::from_text(r#"{"name":"connected","data":null}"#).unwrap();

        assert_eq!(Request::decode(open).unwrap(), Request::Open);
        assert_eq!(Request::decode(connected).unwrap(), Request::Open);
    }

    #[test]
    fn test_malformed_payloads() {
        let missing = Envelope::new(names::SUBSCRIBE, json!({"region": "us-west-2"}));
        let wrong_type = Envelope::new(names::SUBSCRIBE, json!("X"));
        let empty = Envelope::new(names::UNSUBSCRIBE, json!({"stream": ""}));

        assert!(matches!(Request::decode(missing), Err(Error::Protocol(_))));
        assert!(matches!(Request::decode(wrong_type), Err(Error::Protocol(_))));
        assert!(matches!(Request::decode(empty), Err(Error::Protocol(_))));
        assert!(Envelope::from_text("not json").is_err());
    }

    #[test]
    fn test_unknown_name() {
        let envelope = Envelope::new("dance", Value::Null);

        assert_eq!(
            Request::decode(envelope).unwrap(),
            Request::Unknown("dance".to_string())
        );
    }
}
