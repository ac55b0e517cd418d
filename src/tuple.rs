//! `Tuple` and the `TupleData` wire sub-grammar shared by Insert/Update/Delete.
//!
//! A tuple is an ordered sequence of `(column name, value)` pairs; order
//! matters because consumers rely on stable field ordering matching the
//! relation's declared column order (spec invariant: a tuple's key set
//! equals, in order, the cached relation's column names).

use crate::buffer::BufferReader;
use crate::errors::{ReplicationError, ReplicationResult};
use crate::relation::RelationInfo;
use serde::Serialize;

/// An ordered row of column values. `None` represents SQL NULL. Backed by a
/// `Vec` rather than a map so insertion order is preserved exactly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "serde_json::Map<String, serde_json::Value>")]
pub struct Tuple {
    columns: Vec<(String, Option<String>)>,
}

impl Tuple {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Option<String>)> {
        self.columns.iter()
    }

    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value.as_deref())
    }
}

impl From<Tuple> for serde_json::Map<String, serde_json::Value> {
    fn from(tuple: Tuple) -> Self {
        tuple
            .columns
            .into_iter()
            .map(|(name, value)| (name, value.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null)))
            .collect()
    }
}

/// Decode one `TupleData` payload (int16 column count, then that many
/// `(format, [len, bytes])` entries) against a relation's column list,
/// pairing each wire column with the relation's column name at that
/// position. Returns the decoded tuple and the number of bytes consumed.
pub fn decode_tuple_data(reader: &mut BufferReader<'_>, relation: &RelationInfo) -> ReplicationResult<Tuple> {
    let column_count = reader.read_i16()?;

    if column_count as usize != relation.columns.len() {
        return Err(ReplicationError::protocol(format!(
            "tuple has {column_count} columns but relation {} ({}) has {}",
            relation.name,
            relation.relation_id,
            relation.columns.len()
        )));
    }

    let mut columns = Vec::with_capacity(relation.columns.len());
    for column in &relation.columns {
        let value = decode_column_value(reader)?;
        columns.push((column.name.clone(), value));
    }

    Ok(Tuple { columns })
}

/// Skip a `TupleData` payload without building a `Tuple` — used for the
/// replica-identity key tuple that precedes an Update's old-row image when
/// only the key is sent, which carries a potentially different column
/// subset than the relation's full column list so it isn't parsed into a
/// `Tuple` at all, only discarded.
pub fn skip_tuple_data(reader: &mut BufferReader<'_>) -> ReplicationResult<()> {
    let column_count = reader.read_i16()?;
    for _ in 0..column_count {
        decode_column_value(reader)?;
    }
    Ok(())
}

fn decode_column_value(reader: &mut BufferReader<'_>) -> ReplicationResult<Option<String>> {
    match reader.read_char()? {
        'n' => Ok(None),
        't' | 'u' => {
            let len = reader.read_i32()?;
            if len < 0 {
                return Err(ReplicationError::parse("negative text length in tuple data"));
            }
            Ok(Some(reader.read_text(len as usize)?))
        }
        other => Err(ReplicationError::protocol(format!("unknown tuple column format '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::ColumnInfo;

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
    fn decodes_text_columns_in_relation_order() {
        let mut bytes = vec![0x00, 0x02];
        bytes.push(b't');
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.push(b'7');
        bytes.push(b't');
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(b"Alice");

        let mut reader = BufferReader::new(&bytes);
        let tuple = decode_tuple_data(&mut reader, &users_relation()).unwrap();

        assert_eq!(tuple.get("id"), Some(Some("7")));
        assert_eq!(tuple.get("name"), Some(Some("Alice")));
        assert_eq!(tuple.len(), 2);
    }

    #[test]
    fn null_column_decodes_to_none() {
        let mut bytes = vec![0x00, 0x02];
        bytes.push(b'n');
        bytes.push(b't');
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(b"Alice");

        let mut reader = BufferReader::new(&bytes);
        let tuple = decode_tuple_data(&mut reader, &users_relation()).unwrap();

        assert_eq!(tuple.get("id"), Some(None));
        assert_eq!(tuple.get("name"), Some(Some("Alice")));
    }

    #[test]
    fn unchanged_toast_format_decodes_as_text_like_t() {
        let mut bytes = vec![0x00, 0x02];
        bytes.push(b'u');
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.push(b'7');
        bytes.push(b't');
        bytes.extend_from_slice(&5i32.to_be_bytes());
        bytes.extend_from_slice(b"Alice");

        let mut reader = BufferReader::new(&bytes);
        let tuple = decode_tuple_data(&mut reader, &users_relation()).unwrap();

        assert_eq!(tuple.get("id"), Some(Some("7")));
        assert_eq!(tuple.get("name"), Some(Some("Alice")));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn column_count_mismatch_is_a_protocol_error() {
        let bytes = [0x00, 0x01, b'n'];
        let mut reader = BufferReader::new(&bytes);
        let err = decode_tuple_data(&mut reader, &users_relation()).unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol { .. }));
    }
}
