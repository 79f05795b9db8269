//! Result cursors.
//!
//! A [`Cursor`] owns one buffered result at a time. Casters are resolved
//! once per column when a result is bound; fetching runs them over the raw
//! buffers of one row at a time and hands the values to the cursor's
//! [`RowFactory`].
//!
//! State machine: unbound -> bound (with or without rows) -> closed.
//! `execute` rebinds from any state but closed; `close` is idempotent.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use super::caster::{CastContext, Caster, CasterGroup};
use super::connection::{Connection, ConnectionConfig, ConnectionState};
use super::protocol::{FieldDescription, Format, QueryBackend, RawResult, RawRow, ResultKind};
use super::registry::{self, TypeRegistry};
use super::row::{RowFactory, TupleRowFactory};
use super::types::{Oid, Value};
use crate::error::{Error, Result};

// ============================================================================
// Column description
// ============================================================================

/// One entry of [`Cursor::description`], shaped like a DB-API 7-item sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_code: Oid,
    pub display_size: Option<i32>,
    pub internal_size: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    /// Not reported by the server.
    pub null_ok: Option<bool>,
    pub format: Format,
}

impl Column {
    pub fn named(name: &str, type_code: Oid) -> Self {
        Self::from(&FieldDescription::new(name, type_code))
    }
}

impl From<&FieldDescription> for Column {
    fn from(field: &FieldDescription) -> Self {
        // numeric(p, s) packs both into the modifier, offset by the varlena header
        let (precision, scale) = if field.type_oid == Oid::NUMERIC && field.type_modifier >= 4 {
            let packed = field.type_modifier - 4;
            (Some((packed >> 16) & 0xffff), Some(packed & 0xffff))
        } else {
            (None, None)
        };
        let internal_size = (field.type_size >= 0).then_some(i32::from(field.type_size));
        Self {
            name: field.name.clone(),
            type_code: field.type_oid,
            display_size: None,
            internal_size,
            precision,
            scale,
            null_ok: None,
            format: field.format,
        }
    }
}

/// How [`Cursor::scroll`] interprets its offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollMode {
    #[default]
    Relative,
    Absolute,
}

/// Sink or source for [`Cursor::copy_expert`].
pub enum CopyStream<'a> {
    /// `COPY ... TO STDOUT` writes into this sink.
    Out(&'a mut dyn Write),
    /// `COPY ... FROM STDIN` reads from this source.
    In(&'a mut dyn Read),
}

// ============================================================================
// Cursor
// ============================================================================

/// A cursor over buffered statement results.
pub struct Cursor<F: RowFactory = TupleRowFactory> {
    conn: Connection,
    factory: F,
    /// Cursor-level overrides, consulted before the connection's.
    types: TypeRegistry,
    closed: bool,
    description: Vec<Column>,
    fields: Vec<FieldDescription>,
    casters: Vec<Arc<Caster>>,
    /// `None` when the last statement produced no rows.
    rows: Option<Vec<RawRow>>,
    parameters: Arc<HashMap<String, String>>,
    row_count: i64,
    position: usize,
    array_size: usize,
    copy_size: usize,
    status_message: Option<String>,
    last_row_oid: Option<Oid>,
    query: Option<String>,
}

impl<F: RowFactory> Cursor<F> {
    pub(crate) fn new(conn: Connection, factory: F, config: &ConnectionConfig) -> Self {
        Self {
            conn,
            factory,
            types: TypeRegistry::new(),
            closed: false,
            description: Vec::new(),
            fields: Vec::new(),
            casters: Vec::new(),
            rows: None,
            parameters: Arc::new(HashMap::new()),
            row_count: -1,
            position: 0,
            array_size: config.array_size.max(1),
            copy_size: config.copy_size.max(1),
            status_message: None,
            last_row_oid: None,
            query: None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::interface("cursor already closed"));
        }
        Ok(())
    }

    fn ensure_rows(&self) -> Result<&[RawRow]> {
        self.ensure_open()?;
        self.rows
            .as_deref()
            .ok_or_else(|| Error::programming("no results to fetch"))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Column metadata of the bound result; empty when nothing is bound.
    pub fn description(&self) -> &[Column] {
        &self.description
    }

    /// The caster resolved for each column of the bound result.
    pub fn casters(&self) -> &[Arc<Caster>] {
        &self.casters
    }

    /// Rows returned or affected by the last statement; -1 when unknown.
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    /// Whether the bound result produced rows.
    pub fn has_rows(&self) -> bool {
        self.rows.is_some()
    }

    /// Index of the next row `fetch_one` returns.
    pub fn row_number(&self) -> usize {
        self.position
    }

    pub fn array_size(&self) -> usize {
        self.array_size
    }

    pub fn set_array_size(&mut self, size: usize) {
        self.array_size = size.max(1);
    }

    pub fn copy_size(&self) -> usize {
        self.copy_size
    }

    pub fn set_copy_size(&mut self, size: usize) {
        self.copy_size = size.max(1);
    }

    /// Command tag of the last statement, e.g. `"INSERT 0 1"`.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Oid of the row inserted by the last single-row `INSERT`, if the table has oids.
    pub fn last_row_oid(&self) -> Option<Oid> {
        self.last_row_oid
    }

    /// Text of the last executed statement.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Register a caster for this cursor only. Takes effect on the next execute.
    pub fn register_type(&mut self, caster: Arc<Caster>, format: Format) -> Result<()> {
        self.ensure_open()?;
        self.types.register(caster, format)
    }

    pub fn register_type_group(&mut self, group: &CasterGroup, format: Format) -> Result<()> {
        self.ensure_open()?;
        self.types.register_group(group, format)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute a statement and bind its result.
    ///
    /// On failure the previously bound result is left untouched.
    pub fn execute(&mut self, query: &str, params: &[Value]) -> Result<()> {
        self.ensure_open()?;
        let (result, conn_types, parameters) = {
            let mut state = self.conn.lock();
            let result = state.execute(query, params)?;
            if matches!(result.kind, ResultKind::CopyIn | ResultKind::CopyOut) {
                abort_copy(&mut state, "COPY issued through execute()");
                return Err(Error::programming(
                    "can't execute COPY: use copy_from(), copy_to() or copy_expert() instead",
                ));
            }
            (result, Arc::clone(&state.types), Arc::clone(&state.parameters))
        };
        self.query = Some(query.to_string());
        self.bind(result, &conn_types, parameters);
        Ok(())
    }

    /// Execute a statement once per parameter set.
    ///
    /// `row_count` ends up as the total of the affected rows, or -1 if any
    /// statement did not report a count.
    pub fn execute_many(&mut self, query: &str, param_sets: &[Vec<Value>]) -> Result<()> {
        self.ensure_open()?;
        let mut total = 0i64;
        let mut known = true;
        for params in param_sets {
            self.execute(query, params)?;
            if self.row_count < 0 {
                known = false;
            } else {
                total += self.row_count;
            }
        }
        self.row_count = if known { total } else { -1 };
        Ok(())
    }

    fn bind(&mut self, result: RawResult, conn_types: &TypeRegistry, parameters: Arc<HashMap<String, String>>) {
        let fields: Vec<FieldDescription> = result.columns.iter().cloned().collect();
        self.casters = fields
            .iter()
            .map(|field| {
                let caster = registry::resolve(field.type_oid, field.format, &[&self.types, conn_types]);
                tracing::trace!(
                    column = %field.name,
                    oid = %field.type_oid,
                    format = ?field.format,
                    caster = caster.name().unwrap_or("<anonymous>"),
                    "Resolved caster"
                );
                caster
            })
            .collect();
        self.description = fields.iter().map(Column::from).collect();
        self.fields = fields;
        self.parameters = parameters;
        self.position = 0;
        self.status_message = Some(result.command_tag.clone());
        self.last_row_oid = result.inserted_oid();

        match result.kind {
            ResultKind::Tuples => {
                self.row_count = result.rows.len() as i64;
                self.rows = Some(result.rows);
            }
            ResultKind::Command => {
                self.row_count = result.affected_rows().unwrap_or(-1);
                self.rows = None;
            }
            ResultKind::Empty | ResultKind::CopyIn | ResultKind::CopyOut => {
                self.row_count = -1;
                self.rows = None;
            }
        }
        self.factory.bind(&self.description);
    }

    fn unbind(&mut self) {
        self.description.clear();
        self.fields.clear();
        self.casters.clear();
        self.rows = None;
        self.position = 0;
        self.last_row_oid = None;
        self.factory.bind(&[]);
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    fn materialize(&self, raw: &RawRow) -> Result<F::Row> {
        if raw.len() != self.fields.len() {
            return Err(Error::interface(format!(
                "row has {} values for {} columns",
                raw.len(),
                self.fields.len()
            )));
        }
        let mut values = Vec::with_capacity(raw.len());
        let columns = self.fields.iter().zip(&self.casters);
        for (i, (value, (field, caster))) in raw.iter().zip(columns).enumerate() {
            let ctx = CastContext::new(i, &field.name, field.type_oid, field.format, &self.parameters);
            values.push(caster.cast(value.as_deref(), &ctx)?);
        }
        Ok(self.factory.make_row(values))
    }

    /// The next row, or `None` once the result is exhausted.
    pub fn fetch_one(&mut self) -> Result<Option<F::Row>> {
        let rows = self.ensure_rows()?;
        let Some(raw) = rows.get(self.position) else {
            return Ok(None);
        };
        let row = self.materialize(raw)?;
        self.position += 1;
        Ok(Some(row))
    }

    /// Up to `size` rows (default: [`array_size`](Self::array_size)).
    pub fn fetch_many(&mut self, size: Option<usize>) -> Result<Vec<F::Row>> {
        let rows = self.ensure_rows()?;
        let size = size.unwrap_or(self.array_size);
        let end = rows.len().min(self.position.saturating_add(size));
        let mut out = Vec::with_capacity(end.saturating_sub(self.position));
        for raw in &rows[self.position.min(end)..end] {
            out.push(self.materialize(raw)?);
        }
        self.position = end.max(self.position);
        Ok(out)
    }

    /// Every remaining row.
    pub fn fetch_all(&mut self) -> Result<Vec<F::Row>> {
        let remaining = self.ensure_rows()?.len().saturating_sub(self.position);
        self.fetch_many(Some(remaining))
    }

    /// Move the row position.
    pub fn scroll(&mut self, value: i64, mode: ScrollMode) -> Result<()> {
        let len = self.ensure_rows()?.len() as i64;
        let target = match mode {
            ScrollMode::Relative => (self.position as i64).checked_add(value),
            ScrollMode::Absolute => Some(value),
        };
        let Some(target) = target.filter(|t| (0..len).contains(t)) else {
            return Err(Error::programming("scroll destination out of bounds"));
        };
        self.position = target as usize;
        Ok(())
    }

    /// Release the buffered result. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.unbind();
        tracing::trace!("Cursor closed");
    }

    // ------------------------------------------------------------------
    // COPY
    // ------------------------------------------------------------------

    /// Run a `COPY ... TO STDOUT` statement, streaming its output into `sink`.
    pub fn begin_copy_out(&mut self, sql: &str, sink: &mut dyn Write) -> Result<()> {
        self.ensure_open()?;
        let copy_size = self.copy_size;
        let outcome = {
            let mut state = self.conn.lock();
            copy_out(&mut state, sql, sink, copy_size)
        };
        self.finish_copy(sql, outcome)
    }

    /// Run a `COPY ... FROM STDIN` statement, feeding it from `source`.
    pub fn begin_copy_in(&mut self, sql: &str, source: &mut dyn Read) -> Result<()> {
        self.ensure_open()?;
        let copy_size = self.copy_size;
        let outcome = {
            let mut state = self.conn.lock();
            copy_in(&mut state, sql, source, copy_size)
        };
        self.finish_copy(sql, outcome)
    }

    /// Run an arbitrary COPY statement against a sink or source.
    pub fn copy_expert(&mut self, sql: &str, stream: CopyStream<'_>) -> Result<()> {
        match stream {
            CopyStream::Out(sink) => self.begin_copy_out(sql, sink),
            CopyStream::In(source) => self.begin_copy_in(sql, source),
        }
    }

    /// Dump `table` into `sink` in COPY text format.
    pub fn copy_to(&mut self, sink: &mut dyn Write, table: &str, sep: &str, null: &str) -> Result<()> {
        let sql = format!(
            "COPY {table} TO STDOUT WITH DELIMITER AS {} NULL AS {}",
            quote_literal(sep),
            quote_literal(null)
        );
        self.begin_copy_out(&sql, sink)
    }

    /// Load `table` from `source` in COPY text format.
    pub fn copy_from(&mut self, source: &mut dyn Read, table: &str, sep: &str, null: &str) -> Result<()> {
        let sql = format!(
            "COPY {table} FROM STDIN WITH DELIMITER AS {} NULL AS {}",
            quote_literal(sep),
            quote_literal(null)
        );
        self.begin_copy_in(&sql, source)
    }

    fn finish_copy(&mut self, sql: &str, outcome: Result<Option<String>>) -> Result<()> {
        self.unbind();
        self.query = Some(sql.to_string());
        self.row_count = -1;
        self.status_message = None;
        let tag = outcome?;
        if let Some(tag) = tag {
            self.row_count = RawResult::command(&tag).affected_rows().unwrap_or(-1);
            self.status_message = Some(tag);
        }
        Ok(())
    }
}

impl<F: RowFactory> std::fmt::Debug for Cursor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("closed", &self.closed)
            .field("row_count", &self.row_count)
            .field("position", &self.position)
            .field("columns", &self.description.len())
            .finish()
    }
}

/// Quote a string as an escape-string literal.
fn quote_literal(s: &str) -> String {
    format!("E'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

fn abort_copy(state: &mut ConnectionState, reason: &str) {
    tracing::warn!(reason, "COPY aborted");
    if let Err(err) = state.backend.copy_abort(reason) {
        tracing::warn!(error = %err, "Failed to abort COPY");
    }
}

fn start_copy(state: &mut ConnectionState, sql: &str, expected: ResultKind) -> Result<()> {
    let result = state.execute(sql, &[])?;
    if result.kind != expected {
        return Err(Error::programming(format!(
            "statement did not start a COPY {}",
            if expected == ResultKind::CopyOut { "TO STDOUT" } else { "FROM STDIN" }
        )));
    }
    tracing::debug!(sql, "COPY started");
    Ok(())
}

fn copy_out(state: &mut ConnectionState, sql: &str, sink: &mut dyn Write, copy_size: usize) -> Result<Option<String>> {
    start_copy(state, sql, ResultKind::CopyOut)?;
    let mut total = 0usize;
    while let Some(chunk) = state.backend.copy_out_read()? {
        for piece in chunk.chunks(copy_size) {
            if let Err(err) = sink.write_all(piece) {
                abort_copy(state, &format!("sink failed: {err}"));
                return Err(Error::IoError(err));
            }
        }
        total += chunk.len();
    }
    sink.flush()?;
    tracing::debug!(bytes = total, "COPY OUT finished");
    Ok(None)
}

fn copy_in(state: &mut ConnectionState, sql: &str, source: &mut dyn Read, copy_size: usize) -> Result<Option<String>> {
    start_copy(state, sql, ResultKind::CopyIn)?;
    let mut buf = vec![0u8; copy_size];
    let mut total = 0usize;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                abort_copy(state, &format!("source failed: {err}"));
                return Err(Error::IoError(err));
            }
        };
        state.backend.copy_in_write(&buf[..n])?;
        total += n;
    }
    let tag = state.backend.copy_in_done()?;
    tracing::debug!(bytes = total, tag = %tag, "COPY IN finished");
    Ok(Some(tag))
}
