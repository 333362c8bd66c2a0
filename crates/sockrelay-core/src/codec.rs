//! Frame codec.
//!
//! A frame carries exactly one JSON array: a batch of [`OutboundMessage`]
//! on the way out, a sequence of [`InboundMessage`] on the way in. A frame is
//! decoded in full before any message inside it is acted upon.

use crate::errors::CodecError;
use crate::messages::{InboundMessage, OutboundMessage};

/// Serialize a batch as one compact JSON array (no trailing newline).
pub fn encode_batch(batch: &[OutboundMessage]) -> Result<String, CodecError> {
    serde_json::to_string(batch).map_err(CodecError::Encode)
}

/// Decode one inbound frame payload.
///
/// Anything other than a JSON array of well-formed records is rejected as a
/// whole; no partial result is returned.
pub fn decode_frame(payload: &[u8]) -> Result<Vec<InboundMessage>, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_preserves_order() {
        let batch: Vec<_> = (1..=5).map(|i| OutboundMessage::data(i, vec![i as u8])).collect();
        let json = encode_batch(&batch).unwrap();
        let ids: Vec<u64> = serde_json::from_str::<Vec<serde_json::Value>>(&json)
            .unwrap()
            .iter()
            .map(|v| v["server_id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn encode_is_compact_array() {
        let json = encode_batch(&[OutboundMessage::exit(1)]).unwrap();
        assert!(json.starts_with('['));
        assert!(json.ends_with(']'));
        assert!(!json.contains('\n'));
        assert!(!json.contains(' '));
    }

    #[test]
    fn batch_round_trips_through_peer_schema() {
        let batch = vec![
            OutboundMessage::data(1, b"GET / HTTP/1.1\r\n".to_vec()).with_port(7000),
            OutboundMessage::exit(2),
        ];
        let json = encode_batch(&batch).unwrap();
        let decoded = decode_frame(json.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].server_id, 1);
        assert_eq!(decoded[0].data, batch[0].data);
        assert_eq!(decoded[0].port, 7000);
        assert!(decoded[1].exit);
    }

    #[test]
    fn decode_keeps_frame_order() {
        let payload = br#"[{"server_id":3,"data":"","exit":false,"port":0},
                           {"server_id":1,"data":"","exit":true,"port":0}]"#;
        let msgs = decode_frame(payload).unwrap();
        assert_eq!(msgs[0].server_id, 3);
        assert_eq!(msgs[1].server_id, 1);
        assert!(msgs[1].exit);
    }

    #[test]
    fn decode_empty_array() {
        assert!(decode_frame(b"[]").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_object() {
        let err = decode_frame(br#"{"server_id":1}"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_invalid_json() {
        assert!(decode_frame(b"[{").is_err());
        assert!(decode_frame(b"").is_err());
        assert!(decode_frame(b"not json").is_err());
    }

    #[test]
    fn decode_rejects_whole_frame_on_one_bad_record() {
        let payload = br#"[{"server_id":1},{"server_id":"two"}]"#;
        assert!(decode_frame(payload).is_err());
    }
}
