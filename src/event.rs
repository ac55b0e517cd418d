//! The decoded event shape delivered to subscribers, and the publish
//! interface the session manager calls into. The event bus itself (broker,
//! channel, callback list) is out of scope — we specify only the trait and
//! ship a stdout default, the way the teacher ships a stdout sink alongside
//! its HTTP/Hook0 ones.

use crate::tuple::Tuple;
use async_trait::async_trait;
use serde::Serialize;

/// A decoded, self-describing row-change or transaction-boundary event.
///
/// Begin and Relation messages are not represented here: spec.md is
/// explicit that they produce no event, only cache/state side effects.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecodedEvent {
    Insert { table: String, data: Tuple },
    Update { table: String, old: Option<Tuple>, new: Tuple },
    Delete { table: String, old: Tuple },
    Commit { lsn: u64, timestamp: i64 },
}

impl DecodedEvent {
    /// The table name this event concerns, if any (Commit has none).
    pub fn table(&self) -> Option<&str> {
        match self {
            DecodedEvent::Insert { table, .. }
            | DecodedEvent::Update { table, .. }
            | DecodedEvent::Delete { table, .. } => Some(table),
            DecodedEvent::Commit { .. } => None,
        }
    }

    /// Serialize to the single JSON string delivered to subscribers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Delivers decoded events to an in-process subscriber.
///
/// Publication is synchronous with respect to the decode loop: the session
/// manager awaits `publish` before reading the next frame, so a slow
/// consumer slows decoding, which slows status feedback, which is the
/// intended backpressure path (see spec.md §4.5).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DecodedEvent) -> crate::errors::ReplicationResult<()>;
}

/// Writes each event's JSON serialization to stdout. Useful standalone and
/// as the default when no other publisher is wired in.
pub struct StdoutPublisher;

#[async_trait]
impl EventPublisher for StdoutPublisher {
    async fn publish(&self, event: &DecodedEvent) -> crate::errors::ReplicationResult<()> {
        let json = event
            .to_json()
            .map_err(|e| crate::errors::ReplicationError::publish(e.to_string()))?;
        println!("{json}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{ColumnInfo, RelationInfo};

    fn users_relation() -> RelationInfo {
        RelationInfo {
            relation_id: 42,
            namespace: "public".into(),
            name: "users".into(),
            columns: vec![
                ColumnInfo { name: "id".into(), type_oid: 23 },
                ColumnInfo { name: "name".into(), type_oid: 25 },
            ],
        }
    }

    #[test]
    fn insert_event_serializes_per_spec_shape() {
        let mut reader = crate::buffer::BufferReader::new(&{
            let mut b = vec![0x00, 0x02];
            b.push(b't');
            b.extend_from_slice(&1i32.to_be_bytes());
            b.push(b'7');
            b.push(b't');
            b.extend_from_slice(&5i32.to_be_bytes());
            b.extend_from_slice(b"Alice");
            b
        });
        let data = crate::tuple::decode_tuple_data(&mut reader, &users_relation()).unwrap();
        let event = DecodedEvent::Insert { table: "users".into(), data };

        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "insert");
        assert_eq!(json["table"], "users");
        assert_eq!(json["data"]["id"], "7");
        assert_eq!(json["data"]["name"], "Alice");
    }

    #[test]
    fn update_with_no_old_image_serializes_old_as_null() {
        let event = DecodedEvent::Update {
            table: "users".into(),
            old: None,
            new: {
                let mut reader = crate::buffer::BufferReader::new(&{
                    let mut b = vec![0x00, 0x02];
                    b.push(b't');
                    b.extend_from_slice(&1i32.to_be_bytes());
                    b.push(b'8');
                    b.push(b'n');
                    b
                });
                crate::tuple::decode_tuple_data(&mut reader, &users_relation()).unwrap()
            },
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert!(json["old"].is_null());
        assert_eq!(json["type"], "update");
    }
}
