//! The boundary between the driver core and the PostgreSQL protocol layer.
//!
//! Everything on the far side of these traits (sockets, message framing,
//! authentication, parameter interpolation) belongs to the connection layer.
//! The core only consumes what that layer has already parsed: column
//! descriptions, raw column buffers and command tags, plus the COPY and
//! large-object primitives.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use super::error::PgResult;
use super::types::{Oid, Value};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl From<i16> for Format {
    fn from(code: i16) -> Self {
        if code == 1 {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

/// Large object open flags, as understood by `lo_open`.
pub const INV_WRITE: i32 = 0x0002_0000;
pub const INV_READ: i32 = 0x0004_0000;

/// Origin for large object seeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Whence {
    Start = 0,
    Current = 1,
    End = 2,
}

// ============================================================================
// Parsed results
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

impl FieldDescription {
    /// A text-format column with no table origin.
    pub fn new(name: &str, type_oid: Oid) -> Self {
        Self {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: Format::Text,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_size(mut self, type_size: i16, type_modifier: i32) -> Self {
        self.type_size = type_size;
        self.type_modifier = type_modifier;
        self
    }
}

/// Shared column descriptions, so a result can be rebound without cloning them.
pub type SharedColumns = Arc<Vec<FieldDescription>>;

/// One row of raw column buffers; `None` is SQL NULL.
pub type RawRow = Vec<Option<Bytes>>;

/// What kind of response a statement produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// A row-producing statement.
    Tuples,
    /// DDL/DML without rows.
    Command,
    /// The server entered COPY OUT mode; data follows via `copy_out_read`.
    CopyOut,
    /// The server entered COPY IN mode; data is sent via `copy_in_write`.
    CopyIn,
    /// The query string was empty.
    Empty,
}

/// A fully buffered statement result.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub kind: ResultKind,
    pub columns: SharedColumns,
    pub rows: Vec<RawRow>,
    /// Command tag (e.g., "SELECT 5" or "INSERT 0 1")
    pub command_tag: String,
}

impl RawResult {
    pub fn tuples(columns: Vec<FieldDescription>, rows: Vec<RawRow>) -> Self {
        let command_tag = format!("SELECT {}", rows.len());
        Self {
            kind: ResultKind::Tuples,
            columns: Arc::new(columns),
            rows,
            command_tag,
        }
    }

    pub fn command(tag: &str) -> Self {
        Self {
            kind: ResultKind::Command,
            columns: Arc::new(Vec::new()),
            rows: Vec::new(),
            command_tag: tag.to_string(),
        }
    }

    pub fn copy(kind: ResultKind) -> Self {
        Self {
            kind,
            columns: Arc::new(Vec::new()),
            rows: Vec::new(),
            command_tag: String::new(),
        }
    }

    /// Rows affected according to the command tag, if it carries a count.
    ///
    /// `INSERT` tags carry the row oid first, the count last.
    pub fn affected_rows(&self) -> Option<i64> {
        let mut parts = self.command_tag.split_whitespace();
        let verb = parts.next()?;
        let count = parts.last()?;
        match verb {
            "SELECT" | "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => {
                count.parse().ok()
            }
            _ => None,
        }
    }

    /// The oid of the inserted row for a single-row `INSERT` into a table with oids.
    pub fn inserted_oid(&self) -> Option<Oid> {
        let mut parts = self.command_tag.split_whitespace();
        if parts.next()? != "INSERT" {
            return None;
        }
        let oid: i32 = parts.next()?.parse().ok()?;
        let count: i64 = parts.next()?.parse().ok()?;
        (oid != 0 && count == 1).then_some(Oid(oid))
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Statement execution, transaction control and COPY streaming.
pub trait QueryBackend {
    /// Run one statement and buffer its complete result.
    fn execute(&mut self, query: &str, params: &[Value]) -> PgResult<RawResult>;

    /// Open a transaction block at the given isolation level name
    /// (e.g. "READ COMMITTED").
    fn begin(&mut self, isolation: &str) -> PgResult<()>;

    fn commit(&mut self) -> PgResult<()>;

    fn rollback(&mut self) -> PgResult<()>;

    /// Next chunk of COPY OUT data; `None` once the server sent CopyDone.
    fn copy_out_read(&mut self) -> PgResult<Option<Bytes>>;

    /// Send one chunk of COPY IN data.
    fn copy_in_write(&mut self, data: &[u8]) -> PgResult<()>;

    /// Finish COPY IN; returns the command tag.
    fn copy_in_done(&mut self) -> PgResult<String>;

    /// Abandon the COPY in progress so the connection is usable again.
    fn copy_abort(&mut self, reason: &str) -> PgResult<()>;

    /// A server run-time parameter reported at startup (e.g. "DateStyle").
    fn parameter(&self, _name: &str) -> Option<String> {
        None
    }

    fn close(&mut self) -> PgResult<()>;
}

/// Large object primitives, keyed by object id and descriptor.
pub trait LargeObjectBackend {
    /// Create an object; `None` lets the server pick the id.
    fn lo_create(&mut self, oid: Option<Oid>) -> PgResult<Oid>;

    /// Create an object from a client-side file.
    fn lo_import(&mut self, path: &Path) -> PgResult<Oid>;

    fn lo_open(&mut self, oid: Oid, flags: i32) -> PgResult<i32>;

    fn lo_read(&mut self, fd: i32, len: usize) -> PgResult<Bytes>;

    fn lo_write(&mut self, fd: i32, data: &[u8]) -> PgResult<usize>;

    fn lo_lseek(&mut self, fd: i32, offset: i64, whence: Whence) -> PgResult<i64>;

    fn lo_tell(&mut self, fd: i32) -> PgResult<i64>;

    fn lo_close(&mut self, fd: i32) -> PgResult<()>;

    fn lo_unlink(&mut self, oid: Oid) -> PgResult<()>;

    /// Write the object's content to a client-side file.
    fn lo_export(&mut self, oid: Oid, path: &Path) -> PgResult<()>;
}

/// Everything a [`Connection`](super::connection::Connection) needs from the protocol layer.
pub trait Backend: QueryBackend + LargeObjectBackend + Send {}

impl<T: QueryBackend + LargeObjectBackend + Send> Backend for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affected_rows_from_tags() {
        assert_eq!(RawResult::command("INSERT 0 3").affected_rows(), Some(3));
        assert_eq!(RawResult::command("UPDATE 7").affected_rows(), Some(7));
        assert_eq!(RawResult::command("COPY 12").affected_rows(), Some(12));
        assert_eq!(RawResult::command("CREATE TABLE").affected_rows(), None);
        assert_eq!(RawResult::command("").affected_rows(), None);
    }

    #[test]
    fn test_inserted_oid() {
        assert_eq!(RawResult::command("INSERT 16412 1").inserted_oid(), Some(Oid(16412)));
        assert_eq!(RawResult::command("INSERT 0 1").inserted_oid(), None);
        assert_eq!(RawResult::command("INSERT 16412 2").inserted_oid(), None);
        assert_eq!(RawResult::command("UPDATE 1").inserted_oid(), None);
    }

    #[test]
    fn test_tuples_tag_counts_rows() {
        let result = RawResult::tuples(
            vec![FieldDescription::new("n", Oid::INT4)],
            vec![vec![Some(Bytes::from_static(b"1"))]],
        );
        assert_eq!(result.kind, ResultKind::Tuples);
        assert_eq!(result.affected_rows(), Some(1));
    }

    #[test]
    fn test_format_codes() {
        assert_eq!(Format::from(1), Format::Binary);
        assert_eq!(Format::from(0), Format::Text);
    }
}
