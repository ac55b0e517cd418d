//! Byte-level and timestamp helpers shared by the buffer readers/writers
//! and the wire-format decoders.
//!
//! PostgreSQL's replication protocol is entirely big-endian; these are thin
//! wrappers around `from_be_bytes`/`to_be_bytes` so callers don't sprinkle
//! `try_into().unwrap()` everywhere.

use chrono::DateTime;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds from the Unix epoch (1970-01-01) to the PostgreSQL epoch (2000-01-01).
pub const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

// Type aliases matching PostgreSQL's internal wire types.
pub type Oid = u32;
pub type Xid = u32;

pub fn buf_recv_i16(buf: &[u8]) -> i16 {
    i16::from_be_bytes(buf[..2].try_into().unwrap())
}

pub fn buf_recv_i32(buf: &[u8]) -> i32 {
    i32::from_be_bytes(buf[..4].try_into().unwrap())
}

pub fn buf_recv_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes(buf[..4].try_into().unwrap())
}

pub fn buf_recv_u64(buf: &[u8]) -> u64 {
    u64::from_be_bytes(buf[..8].try_into().unwrap())
}

pub fn buf_recv_i64(buf: &[u8]) -> i64 {
    i64::from_be_bytes(buf[..8].try_into().unwrap())
}

pub fn buf_send_u64(val: u64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

pub fn buf_send_i64(val: i64, buf: &mut [u8]) {
    buf[..8].copy_from_slice(&val.to_be_bytes());
}

/// Convert a `SystemTime` to a PostgreSQL `TimestampTz`: microseconds since
/// the PostgreSQL epoch (2000-01-01 UTC), as used in status feedback
/// messages sent back to the server.
pub fn system_time_to_postgres_timestamp(time: SystemTime) -> i64 {
    let since_unix = time
        .duration_since(UNIX_EPOCH)
        .expect("SystemTime is before the Unix epoch");

    let unix_micros = since_unix.as_secs() as i64 * 1_000_000 + since_unix.subsec_micros() as i64;
    unix_micros - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Format a PostgreSQL commit timestamp (microseconds since 2000-01-01 UTC,
/// as decoded from a Commit message) as a human-readable UTC string, for
/// log lines.
pub fn format_pg_timestamp(ts: i64) -> String {
    let secs = ts.div_euclid(1_000_000) + PG_EPOCH_OFFSET_SECS;
    let micros = ts.rem_euclid(1_000_000);

    match DateTime::from_timestamp(secs, (micros * 1_000) as u32) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string(),
        None => format!("<invalid timestamp {ts}>"),
    }
}
