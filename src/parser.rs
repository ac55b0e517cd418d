//! The message dispatcher and per-tag handlers.
//!
//! Given a buffer positioned at the first byte of the next logical
//! replication message, [`dispatch`] reads one ASCII tag byte, selects the
//! handler for that tag, and returns whatever `DecodedEvent` (if any) the
//! handler produced. A table keyed by tag byte (here, a `match`) is an
//! equally valid — and clearer — implementation than a polymorphic
//! handler-object design, per spec.md §9.
//!
//! Each handler consumes exactly its message's declared bytes; callers are
//! expected to keep dispatching against the same buffer (a `BufferReader`)
//! until it is drained, since a single frame may carry more than one
//! message back to back.

use crate::buffer::BufferReader;
use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::DecodedEvent;
use crate::relation::{ColumnInfo, RelationCache, RelationInfo};
use crate::tuple::{decode_tuple_data, skip_tuple_data};
use tracing::{debug, trace};

/// Dispatch one logical-replication message from `reader` against `cache`,
/// returning the event it produced, if any.
pub fn dispatch(reader: &mut BufferReader<'_>, cache: &mut RelationCache) -> ReplicationResult<Option<DecodedEvent>> {
    let tag = reader.read_char()?;
    trace!(%tag, "dispatching replication message");

    match tag {
        'R' => {
            handle_relation(reader, cache)?;
            Ok(None)
        }
        'I' => Ok(Some(handle_insert(reader, cache)?)),
        'U' => Ok(Some(handle_update(reader, cache)?)),
        'D' => Ok(Some(handle_delete(reader, cache)?)),
        'B' => {
            handle_begin(reader)?;
            Ok(None)
        }
        'C' => Ok(Some(handle_commit(reader)?)),
        'T' => {
            handle_truncate(reader)?;
            Ok(None)
        }
        'S' => {
            handle_stream_start(reader)?;
            Ok(None)
        }
        'E' => Ok(None), // Stream Stop carries no further fields
        'c' => {
            handle_stream_commit(reader)?;
            Ok(None)
        }
        'A' => {
            handle_stream_abort(reader)?;
            Ok(None)
        }
        other => Err(ReplicationError::protocol(format!("unknown message tag '{other}'"))),
    }
}

fn handle_relation(reader: &mut BufferReader<'_>, cache: &mut RelationCache) -> ReplicationResult<()> {
    let relation_id = reader.read_u32()?;
    let namespace = reader.read_cstring()?;
    let name = reader.read_cstring()?;
    let _replica_identity = reader.read_i8()?;

    let column_count = reader.read_i16()?;
    let mut columns = Vec::with_capacity(column_count.max(0) as usize);
    for _ in 0..column_count {
        let _flags = reader.read_i8()?;
        let column_name = reader.read_cstring()?;
        let type_oid = reader.read_u32()?;
        let _type_modifier = reader.read_i32()?;
        columns.push(ColumnInfo { name: column_name, type_oid });
    }

    debug!(relation_id, %namespace, %name, columns = columns.len(), "cached relation schema");
    cache.insert(RelationInfo { relation_id, namespace, name, columns });
    Ok(())
}

fn lookup_relation<'c>(cache: &'c RelationCache, relation_id: u32) -> ReplicationResult<&'c RelationInfo> {
    cache.get(relation_id).ok_or_else(|| {
        ReplicationError::protocol(format!(
            "relation {relation_id} referenced before a Relation message announced it"
        ))
    })
}

fn handle_insert(reader: &mut BufferReader<'_>, cache: &RelationCache) -> ReplicationResult<DecodedEvent> {
    let relation_id = reader.read_u32()?;
    let marker = reader.read_char()?;
    if marker != 'N' {
        return Err(ReplicationError::protocol(format!("expected 'N' marker in insert message, got '{marker}'")));
    }

    let relation = lookup_relation(cache, relation_id)?;
    let data = decode_tuple_data(reader, relation)?;
    Ok(DecodedEvent::Insert { table: relation.name.clone(), data })
}

fn handle_update(reader: &mut BufferReader<'_>, cache: &RelationCache) -> ReplicationResult<DecodedEvent> {
    let relation_id = reader.read_u32()?;
    let relation = lookup_relation(cache, relation_id)?;

    let mut marker = reader.read_char()?;
    let old = match marker {
        'K' => {
            skip_tuple_data(reader)?;
            marker = reader.read_char()?;
            None
        }
        'O' => {
            let old = decode_tuple_data(reader, relation)?;
            marker = reader.read_char()?;
            Some(old)
        }
        'N' => None,
        other => return Err(ReplicationError::protocol(format!("invalid marker in update message: '{other}'"))),
    };

    if marker != 'N' {
        return Err(ReplicationError::protocol(format!("expected 'N' marker for new tuple, got '{marker}'")));
    }

    let new = decode_tuple_data(reader, relation)?;
    Ok(DecodedEvent::Update { table: relation.name.clone(), old, new })
}

fn handle_delete(reader: &mut BufferReader<'_>, cache: &RelationCache) -> ReplicationResult<DecodedEvent> {
    let relation_id = reader.read_u32()?;
    let marker = reader.read_char()?;
    if marker != 'K' && marker != 'O' {
        return Err(ReplicationError::protocol(format!("invalid marker in delete message: '{marker}'")));
    }

    let relation = lookup_relation(cache, relation_id)?;
    let old = decode_tuple_data(reader, relation)?;
    Ok(DecodedEvent::Delete { table: relation.name.clone(), old })
}

fn handle_begin(reader: &mut BufferReader<'_>) -> ReplicationResult<()> {
    let _final_lsn = reader.read_u64()?;
    let _timestamp = reader.read_i64()?;
    let _xid = reader.read_u32()?;
    Ok(())
}

fn handle_commit(reader: &mut BufferReader<'_>) -> ReplicationResult<DecodedEvent> {
    let _flags = reader.read_i8()?;
    let commit_lsn = reader.read_u64()?;
    let _end_lsn = reader.read_u64()?;
    let timestamp = reader.read_i64()?;
    Ok(DecodedEvent::Commit { lsn: commit_lsn, timestamp })
}

/// Truncate: int32 number_of_relations, int8 flags, then that many int32
/// relation ids, per the teacher's own `parse_truncate_message`.
fn handle_truncate(reader: &mut BufferReader<'_>) -> ReplicationResult<()> {
    let num_relations = reader.read_u32()?;
    let _flags = reader.read_i8()?;
    for _ in 0..num_relations {
        let _relation_id = reader.read_u32()?;
    }
    Ok(())
}

fn handle_stream_start(reader: &mut BufferReader<'_>) -> ReplicationResult<()> {
    let _xid = reader.read_u32()?;
    let _first_segment = reader.read_u8()?;
    Ok(())
}

fn handle_stream_commit(reader: &mut BufferReader<'_>) -> ReplicationResult<()> {
    let _xid = reader.read_u32()?;
    let _flags = reader.read_u8()?;
    let _commit_lsn = reader.read_u64()?;
    let _end_lsn = reader.read_u64()?;
    let _timestamp = reader.read_i64()?;
    Ok(())
}

fn handle_stream_abort(reader: &mut BufferReader<'_>) -> ReplicationResult<()> {
    let _xid = reader.read_u32()?;
    let _subtransaction_xid = reader.read_u32()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation_message_bytes() -> Vec<u8> {
        let mut b = vec![b'R'];
        b.extend_from_slice(&42u32.to_be_bytes());
        b.extend_from_slice(b"public\0");
        b.extend_from_slice(b"users\0");
        b.push(0); // replica identity
        b.extend_from_slice(&2i16.to_be_bytes());
        b.push(0);
        b.extend_from_slice(b"id\0");
        b.extend_from_slice(&23u32.to_be_bytes());
        b.extend_from_slice(&(-1i32).to_be_bytes());
        b.push(0);
        b.extend_from_slice(b"name\0");
        b.extend_from_slice(&1043u32.to_be_bytes());
        b.extend_from_slice(&(-1i32).to_be_bytes());
        b
    }

    // Scenario S1: Relation then Insert.
    #[test]
    fn s1_relation_then_insert() {
        let mut cache = RelationCache::new();
        let rel_bytes = relation_message_bytes();
        let mut reader = BufferReader::new(&rel_bytes);
        assert!(dispatch(&mut reader, &mut cache).unwrap().is_none());

        let mut ins_bytes = vec![b'I'];
        ins_bytes.extend_from_slice(&42u32.to_be_bytes());
        ins_bytes.push(b'N');
        ins_bytes.extend_from_slice(&2i16.to_be_bytes());
        ins_bytes.push(b't');
        ins_bytes.extend_from_slice(&1i32.to_be_bytes());
        ins_bytes.push(b'7');
        ins_bytes.push(b't');
        ins_bytes.extend_from_slice(&5i32.to_be_bytes());
        ins_bytes.extend_from_slice(b"Alice");

        let mut reader = BufferReader::new(&ins_bytes);
        let event = dispatch(&mut reader, &mut cache).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "insert", "table": "users", "data": {"id": "7", "name": "Alice"}}));
    }

    fn cache_with_users() -> RelationCache {
        let mut cache = RelationCache::new();
        let rel_bytes = relation_message_bytes();
        let mut reader = BufferReader::new(&rel_bytes);
        dispatch(&mut reader, &mut cache).unwrap();
        cache
    }

    fn key_tuple_bytes() -> Vec<u8> {
        let mut b = vec![];
        b.extend_from_slice(&1i16.to_be_bytes());
        b.push(b't');
        b.extend_from_slice(&1i32.to_be_bytes());
        b.push(b'7');
        b
    }

    fn full_tuple_bytes(id: &str, name: &str) -> Vec<u8> {
        let mut b = vec![];
        b.extend_from_slice(&2i16.to_be_bytes());
        b.push(b't');
        b.extend_from_slice(&(id.len() as i32).to_be_bytes());
        b.extend_from_slice(id.as_bytes());
        b.push(b't');
        b.extend_from_slice(&(name.len() as i32).to_be_bytes());
        b.extend_from_slice(name.as_bytes());
        b
    }

    // Scenario S2: Update with key-only identity -> old is null.
    #[test]
    fn s2_update_with_key_only_identity() {
        let mut cache = cache_with_users();
        let mut bytes = vec![b'U'];
        bytes.extend_from_slice(&42u32.to_be_bytes());
        bytes.push(b'K');
        bytes.extend(key_tuple_bytes());
        bytes.push(b'N');
        bytes.extend(full_tuple_bytes("7", "Alicia"));

        let mut reader = BufferReader::new(&bytes);
        let event = dispatch(&mut reader, &mut cache).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert!(json["old"].is_null());
        assert_eq!(json["new"]["name"], "Alicia");
    }

    // Scenario S3: Update with full old image -> old is populated.
    #[test]
    fn s3_update_with_full_old_image() {
        let mut cache = cache_with_users();
        let mut bytes = vec![b'U'];
        bytes.extend_from_slice(&42u32.to_be_bytes());
        bytes.push(b'O');
        bytes.extend(full_tuple_bytes("7", "Alice"));
        bytes.push(b'N');
        bytes.extend(full_tuple_bytes("7", "Alicia"));

        let mut reader = BufferReader::new(&bytes);
        let event = dispatch(&mut reader, &mut cache).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["old"]["name"], "Alice");
        assert_eq!(json["new"]["name"], "Alicia");
    }

    // Scenario S4: Delete.
    #[test]
    fn s4_delete() {
        let mut cache = cache_with_users();
        let mut bytes = vec![b'D'];
        bytes.extend_from_slice(&42u32.to_be_bytes());
        bytes.push(b'K');
        bytes.extend(full_tuple_bytes("7", "Alice"));

        let mut reader = BufferReader::new(&bytes);
        let event = dispatch(&mut reader, &mut cache).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "delete", "table": "users", "old": {"id": "7", "name": "Alice"}}));
    }

    // Scenario S5: Commit.
    #[test]
    fn s5_commit() {
        let mut cache = RelationCache::new();
        let mut bytes = vec![b'C'];
        bytes.push(0);
        bytes.extend_from_slice(&100u64.to_be_bytes());
        bytes.extend_from_slice(&200u64.to_be_bytes());
        bytes.extend_from_slice(&300i64.to_be_bytes());

        let mut reader = BufferReader::new(&bytes);
        let event = dispatch(&mut reader, &mut cache).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "commit", "lsn": 100, "timestamp": 300}));
    }

    #[test]
    fn insert_before_relation_is_a_protocol_error() {
        let mut cache = RelationCache::new();
        let mut bytes = vec![b'I'];
        bytes.extend_from_slice(&99u32.to_be_bytes());
        bytes.push(b'N');
        bytes.extend_from_slice(&0i16.to_be_bytes());

        let mut reader = BufferReader::new(&bytes);
        let err = dispatch(&mut reader, &mut cache).unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol { .. }));
    }

    #[test]
    fn unknown_tag_is_a_protocol_error() {
        let mut cache = RelationCache::new();
        let mut reader = BufferReader::new(&[b'Z']);
        assert!(dispatch(&mut reader, &mut cache).is_err());
    }

    #[test]
    fn begin_produces_no_event() {
        let mut cache = RelationCache::new();
        let mut bytes = vec![b'B'];
        bytes.extend_from_slice(&100u64.to_be_bytes());
        bytes.extend_from_slice(&200i64.to_be_bytes());
        bytes.extend_from_slice(&7u32.to_be_bytes());

        let mut reader = BufferReader::new(&bytes);
        assert!(dispatch(&mut reader, &mut cache).unwrap().is_none());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn truncate_is_recognized_and_skipped_without_emitting_an_event() {
        let mut cache = RelationCache::new();
        let mut bytes = vec![b'T'];
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&42u32.to_be_bytes());
        bytes.extend_from_slice(&43u32.to_be_bytes());

        let mut reader = BufferReader::new(&bytes);
        assert!(dispatch(&mut reader, &mut cache).unwrap().is_none());
        assert_eq!(reader.remaining(), 0);
    }
}
