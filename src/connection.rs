//! Safe wrapper around PostgreSQL's C client library (libpq) for replication
//! operations. This is the "concrete database-client library" collaborator:
//! it owns the socket, issues the `IDENTIFY_SYSTEM`/slot/publication checks
//! and `START_REPLICATION` command, and exposes the COPY-both stream as
//! `get_copy_data`/`put_copy_data`. Everything above this module — framing,
//! schema caching, message decoding — is agnostic to how bytes actually
//! arrive, which is what makes the session manager testable without a
//! running Postgres (see `ReplicationStream` below and `session.rs`'s tests).

use crate::errors::{ReplicationError, ReplicationResult};
use libpq_sys::*;
use std::ffi::{CStr, CString};
use std::ptr;

/// The subset of the replication connection the session manager's main loop
/// actually drives. `PGConnection` implements it against real libpq calls;
/// tests implement it against an in-memory fake to exercise reconnect logic
/// without a database.
pub trait ReplicationStream: Send {
    /// Pull the next pending COPY row (a 'w' WAL message or 'k' keepalive),
    /// or `None` if nothing is available yet.
    fn get_copy_data(&self) -> ReplicationResult<Option<Vec<u8>>>;

    /// Send a standby status update (feedback) back to the server.
    fn put_copy_data(&self, data: &[u8]) -> ReplicationResult<()>;

    /// Flush any buffered output on the connection.
    fn flush(&self) -> ReplicationResult<()>;
}

/// Safe wrapper for a PostgreSQL replication connection using libpq.
pub struct PGConnection {
    conn: *mut PGconn,
}

// libpq connections are not implicitly thread-affine once established; we
// only ever touch this from the single worker thread that owns the session.
unsafe impl Send for PGConnection {}

impl PGConnection {
    /// Establishes a connection to PostgreSQL using the provided connection
    /// info (a libpq keyword/value or URI connection string).
    pub fn connect(conninfo: &str) -> ReplicationResult<Self> {
        let c_conninfo = CString::new(conninfo)?;
        let conn = unsafe { PQconnectdb(c_conninfo.as_ptr()) };

        if conn.is_null() {
            return Err(ReplicationError::connection("failed to allocate connection object"));
        }

        let status = unsafe { PQstatus(conn) };
        if status != ConnStatusType::CONNECTION_OK {
            let message = get_error_message(conn).unwrap_or_else(|| "unknown error".to_string());
            unsafe { PQfinish(conn) };
            return Err(ReplicationError::connection(format!("connection failed: {message}")));
        }

        Ok(Self { conn })
    }

    /// Executes a simple query (simple query protocol) and returns its result.
    pub fn exec(&self, query: &str) -> ReplicationResult<PGResult> {
        let c_query = CString::new(query)?;
        let result = unsafe { PQexec(self.conn, c_query.as_ptr()) };

        if result.is_null() {
            let message = get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(ReplicationError::protocol(format!("query execution failed: {message}")));
        }

        Ok(PGResult { result })
    }
}

impl ReplicationStream for PGConnection {
    fn get_copy_data(&self) -> ReplicationResult<Option<Vec<u8>>> {
        let mut buffer: *mut std::os::raw::c_char = ptr::null_mut();

        // PQgetCopyData(async=0) blocks until a row is available or the COPY
        // ends. -1 means COPY is done, -2 an error, >0 a row of that many
        // bytes. async=0 means 0 is never returned.
        let len = unsafe { PQgetCopyData(self.conn, &mut buffer, 0) };

        match len {
            -2 => {
                let message = get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
                Err(ReplicationError::protocol(message))
            }
            -1 => {
                let result = PGResult { result: unsafe { PQgetResult(self.conn) } };
                if !result.is_ok() {
                    let message = get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
                    return Err(ReplicationError::protocol(message));
                }
                Ok(None)
            }
            0 => Ok(None),
            len => {
                if buffer.is_null() {
                    return Err(ReplicationError::buffer("received null copy-data buffer"));
                }
                let data = unsafe { std::slice::from_raw_parts(buffer as *const u8, len as usize).to_vec() };
                unsafe { PQfreemem(buffer as *mut std::os::raw::c_void) };
                Ok(Some(data))
            }
        }
    }

    fn put_copy_data(&self, data: &[u8]) -> ReplicationResult<()> {
        let result = unsafe {
            PQputCopyData(self.conn, data.as_ptr() as *const std::os::raw::c_char, data.len() as i32)
        };

        if result != 1 {
            let message = get_error_message(self.conn).unwrap_or_else(|| "unknown error".to_string());
            return Err(ReplicationError::protocol(format!("failed to send copy data: {message}")));
        }
        Ok(())
    }

    fn flush(&self) -> ReplicationResult<()> {
        let result = unsafe { PQflush(self.conn) };
        if result != 0 {
            return Err(ReplicationError::protocol("failed to flush connection"));
        }
        Ok(())
    }
}

impl Drop for PGConnection {
    fn drop(&mut self) {
        if !self.conn.is_null() {
            unsafe { PQfinish(self.conn) };
        }
    }
}

/// Produces a ready-to-stream `ReplicationStream` from scratch: connect,
/// verify the server is configured for logical replication, verify the
/// slot and publication exist, then issue `START_REPLICATION`. The session
/// manager calls this once at startup and again on every reconnect.
///
/// A trait rather than a free function so tests can substitute a connector
/// that hands back an in-memory fake stream without a running Postgres.
pub trait StreamConnector: Send + Sync {
    fn connect(&self) -> ReplicationResult<Box<dyn ReplicationStream>>;
}

/// The real connector: talks to Postgres over libpq.
pub struct PgConnector {
    pub conninfo: String,
    pub slot_name: String,
    pub publication_name: String,
}

impl PgConnector {
    pub fn new(conninfo: String, slot_name: String, publication_name: String) -> Self {
        Self { conninfo, slot_name, publication_name }
    }

    fn check_wal_level(&self, conn: &PGConnection) -> ReplicationResult<()> {
        let result = conn.exec("SHOW wal_level;")?;
        if !result.is_ok() {
            return Err(ReplicationError::protocol("failed to check wal_level"));
        }
        match result.getvalue(0, 0) {
            Some(level) if level == "logical" => Ok(()),
            Some(level) => Err(ReplicationError::protocol(format!(
                "wal_level is '{level}', not 'logical'; logical replication requires wal_level = logical"
            ))),
            None => Err(ReplicationError::protocol("could not retrieve wal_level")),
        }
    }

    fn check_replication_slot(&self, conn: &PGConnection) -> ReplicationResult<()> {
        let query = format!(
            "SELECT slot_name FROM pg_replication_slots WHERE slot_name = '{}';",
            self.slot_name
        );
        let result = conn.exec(&query)?;
        if !result.is_ok() {
            return Err(ReplicationError::protocol("failed to check replication slots"));
        }
        if result.ntuples() == 0 {
            return Err(ReplicationError::protocol(format!(
                "replication slot '{}' does not exist", self.slot_name
            )));
        }
        Ok(())
    }

    fn check_publication(&self, conn: &PGConnection) -> ReplicationResult<()> {
        let query = format!("SELECT * FROM pg_publication WHERE pubname = '{}';", self.publication_name);
        let result = conn.exec(&query)?;
        if !result.is_ok() {
            return Err(ReplicationError::protocol("failed to check publications"));
        }
        if result.ntuples() == 0 {
            return Err(ReplicationError::protocol(format!(
                "publication '{}' does not exist", self.publication_name
            )));
        }
        Ok(())
    }
}

impl StreamConnector for PgConnector {
    fn connect(&self) -> ReplicationResult<Box<dyn ReplicationStream>> {
        let conn = PGConnection::connect(&self.conninfo)?;

        self.check_wal_level(&conn)?;
        self.check_replication_slot(&conn)?;
        self.check_publication(&conn)?;

        let start_replication_sql = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL 0/0 (proto_version '1', publication_names '{}');",
            self.slot_name, self.publication_name
        );
        let result = conn.exec(&start_replication_sql)?;
        if result.status() != ExecStatusType::PGRES_COPY_BOTH {
            return Err(ReplicationError::protocol(format!(
                "START_REPLICATION failed: {:?}", result.status()
            )));
        }

        Ok(Box::new(conn))
    }
}

fn get_error_message(conn: *const PGconn) -> Option<String> {
    unsafe {
        let error_ptr = PQerrorMessage(conn);
        if error_ptr.is_null() {
            None
        } else {
            Some(CStr::from_ptr(error_ptr).to_string_lossy().into_owned())
        }
    }
}

/// Safe wrapper for a PostgreSQL query result.
pub struct PGResult {
    result: *mut PGresult,
}

impl PGResult {
    pub fn status(&self) -> ExecStatusType {
        unsafe { PQresultStatus(self.result) }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status(), ExecStatusType::PGRES_TUPLES_OK | ExecStatusType::PGRES_COMMAND_OK)
    }

    pub fn ntuples(&self) -> i32 {
        unsafe { PQntuples(self.result) }
    }

    pub fn getvalue(&self, row: i32, col: i32) -> Option<String> {
        let value_ptr = unsafe { PQgetvalue(self.result, row, col) };
        if value_ptr.is_null() {
            None
        } else {
            unsafe { Some(CStr::from_ptr(value_ptr).to_string_lossy().into_owned()) }
        }
    }
}

impl Drop for PGResult {
    fn drop(&mut self) {
        if !self.result.is_null() {
            unsafe { PQclear(self.result) };
        }
    }
}
