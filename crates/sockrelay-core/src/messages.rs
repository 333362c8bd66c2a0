//! Proxied-traffic records.
//!
//! Both directions share one shape: a chunk of bytes for an engine-assigned
//! connection (`server_id`), an `exit` flag announcing that the connection
//! closed, and the local port the connection belongs to. Payload bytes travel
//! as standard base64 under the `"data"` key.

use serde::{Deserialize, Serialize};

/// Engine → peer record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Engine-assigned connection identifier.
    pub server_id: u32,
    /// Raw bytes read from the local client connection.
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
    /// The local connection closed; the peer should close its side.
    #[serde(default)]
    pub exit: bool,
    /// Local port of the proxied connection (omitted when unknown).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
}

impl OutboundMessage {
    /// A data chunk for connection `server_id`.
    pub fn data(server_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            server_id,
            data: data.into(),
            ..Self::default()
        }
    }

    /// A close notice for connection `server_id`.
    pub fn exit(server_id: u32) -> Self {
        Self {
            server_id,
            exit: true,
            ..Self::default()
        }
    }

    /// Attach the local port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Peer → engine record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Engine-assigned connection identifier.
    pub server_id: u32,
    /// Raw bytes to write to the local client connection.
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
    /// The remote side closed the connection.
    #[serde(default)]
    pub exit: bool,
    /// Local port of the proxied connection. Taken as sent; the engine
    /// decides what an out-of-range value means.
    #[serde(default)]
    pub port: i64,
}

impl InboundMessage {
    /// A data chunk for connection `server_id`.
    pub fn data(server_id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            server_id,
            data: data.into(),
            ..Self::default()
        }
    }

    /// A close notice for connection `server_id`.
    pub fn exit(server_id: u32) -> Self {
        Self {
            server_id,
            exit: true,
            ..Self::default()
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// Serde adapter: `Vec<u8>` as a standard base64 string, `null` as empty.
///
/// Line breaks inside the encoded string are skipped on decode, so
/// MIME-wrapped payloads are accepted.
mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(mut s) => {
                s.retain(|c| c != '\r' && c != '\n');
                STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_data_serializes_base64() {
        let msg = OutboundMessage::data(7, b"hello".to_vec());
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"server_id": 7, "data": "aGVsbG8=", "exit": false}));
    }

    #[test]
    fn outbound_port_omitted_when_zero() {
        let value = serde_json::to_value(OutboundMessage::exit(3)).unwrap();
        assert!(value.get("port").is_none());

        let value = serde_json::to_value(OutboundMessage::exit(3).with_port(7000)).unwrap();
        assert_eq!(value["port"], 7000);
    }

    #[test]
    fn outbound_exit_has_empty_data() {
        let msg = OutboundMessage::exit(9);
        assert!(msg.exit);
        assert!(msg.data.is_empty());
        assert_eq!(serde_json::to_value(&msg).unwrap()["data"], "");
    }

    #[test]
    fn inbound_missing_fields_default() {
        let msg: InboundMessage = serde_json::from_value(json!({"server_id": 4})).unwrap();
        assert_eq!(msg, InboundMessage { server_id: 4, ..Default::default() });
    }

    #[test]
    fn inbound_null_data_is_empty() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"server_id": 1, "data": null, "exit": true})).unwrap();
        assert!(msg.data.is_empty());
        assert!(msg.exit);
    }

    #[test]
    fn inbound_invalid_base64_rejected() {
        let err = serde_json::from_value::<InboundMessage>(json!({"server_id": 1, "data": "!!!"}));
        assert!(err.is_err());
    }

    #[test]
    fn inbound_wrapped_base64_accepted() {
        let msg: InboundMessage =
            serde_json::from_value(json!({"server_id": 1, "data": "aGVs\nbG8=\r\n"})).unwrap();
        assert_eq!(msg.data, b"hello".to_vec());
    }

    #[test]
    fn inbound_port_outside_u16_kept() {
        let msg: InboundMessage = serde_json::from_value(json!({"server_id": 1, "port": 70000})).unwrap();
        assert_eq!(msg.port, 70000);
        let msg: InboundMessage = serde_json::from_value(json!({"server_id": 1, "port": -1})).unwrap();
        assert_eq!(msg.port, -1);
    }

    #[test]
    fn inbound_port_always_serialized() {
        let value = serde_json::to_value(InboundMessage::exit(2)).unwrap();
        assert_eq!(value["port"], 0);
    }

    #[test]
    fn inbound_binary_payload_survives() {
        let bytes: Vec<u8> = (0..=255).collect();
        let msg = InboundMessage::data(11, bytes.clone());
        let json = serde_json::to_string(&msg).unwrap();
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, bytes);
    }
}
