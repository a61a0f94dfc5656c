//! Wire messages exchanged between replicas.
//!
//! Every message is a JSON object carrying the originating peer in
//! `sourceId` and the payload variant in `type`.

use crate::network::PeerId;
use scribe_core::Version;
use scribe_text::{Char, Document, Index};
use serde::{Deserialize, Serialize};

/// How a remote cursor should be drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorKind {
    Bar,
    Selection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    Insert {
        ch: Char,
    },
    Delete {
        ch: Char,
    },
    /// Full replica state sent by the host to a joining follower.
    Sync {
        document: Document,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        versions: Option<Vec<Version>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Leave,
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Cursor {
        start: Index,
        end: Index,
        cursor_kind: CursorKind,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "sourceId")]
    pub source_id: PeerId,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    pub fn new(source_id: PeerId, payload: Payload) -> Self {
        Self { source_id, payload }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Short name of the payload variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Insert { .. } => "Insert",
            Payload::Delete { .. } => "Delete",
            Payload::Sync { .. } => "Sync",
            Payload::Join { .. } => "Join",
            Payload::Leave => "Leave",
            Payload::Update { .. } => "Update",
            Payload::Cursor { .. } => "Cursor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_core::{Identifier, Position, SiteId};
    use serde_json::json;

    fn sample_char() -> Char {
        Char::new(
            Identifier::new(vec![Position::new(12, "site-a")]),
            SiteId::new("site-a"),
            3,
            'z',
        )
    }

    #[test]
    fn test_insert_wire_shape() {
        let msg = Message::new(PeerId::new("p1"), Payload::Insert { ch: sample_char() });
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "sourceId": "p1",
                "type": "Insert",
                "ch": {
                    "id": [{"digit": 12, "tiebreak": "site-a"}],
                    "originPeer": "site-a",
                    "counter": 3,
                    "data": "z"
                }
            })
        );
        assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_leave_and_join_shape() {
        let leave = Message::new(PeerId::new("p1"), Payload::Leave);
        assert_eq!(
            serde_json::to_value(&leave).unwrap(),
            json!({"sourceId": "p1", "type": "Leave"})
        );

        let join = Message::decode(br#"{"sourceId":"p2","type":"Join","name":"Ann"}"#).unwrap();
        assert_eq!(join.source_id, PeerId::new("p2"));
        assert_eq!(join.payload, Payload::Join { name: Some("Ann".into()) });

        let anonymous = Message::decode(br#"{"sourceId":"p2","type":"Join"}"#).unwrap();
        assert_eq!(anonymous.payload, Payload::Join { name: None });
    }

    #[test]
    fn test_cursor_shape() {
        let msg = Message::new(
            PeerId::new("p1"),
            Payload::Cursor {
                start: Index::new(0, 1),
                end: Index::new(2, 3),
                cursor_kind: CursorKind::Selection,
            },
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["cursorKind"], "Selection");
        assert_eq!(value["end"], json!({"row": 2, "column": 3}));
        assert_eq!(msg.kind(), "Cursor");
    }

    #[test]
    fn test_sync_without_versions() {
        let bytes = br#"{"sourceId":"host","type":"Sync","document":[[]]}"#;
        let msg = Message::decode(bytes).unwrap();
        match msg.payload {
            Payload::Sync { document, versions, name } => {
                assert_eq!(document, vec![Vec::new()]);
                assert!(versions.is_none());
                assert!(name.is_none());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Message::decode(br#"{"sourceId":"p","type":"Bogus"}"#).is_err());
        assert!(Message::decode(b"not json").is_err());
    }
}
