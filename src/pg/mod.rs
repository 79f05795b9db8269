//! PostgreSQL result typecasting and transaction-scoped resources.
//!
//! Architecture:
//! - `protocol`: the boundary to the wire-protocol layer (parsed results,
//!   COPY and large-object primitives)
//! - `types`: type ids and the host values casters produce
//! - `caster`, `decode`, `datetime`, `array`, `builtins`: value conversion
//! - `registry`: text/binary caster mappings and the process-wide registry
//! - `connection`: connection handle, isolation level, generation counter
//! - `cursor`, `row`: buffered results and row construction
//! - `lobject`: large objects scoped to one transaction

pub mod array;
pub mod builtins;
pub mod caster;
pub mod connection;
pub mod cursor;
pub mod datetime;
pub mod decode;
pub mod error;
pub mod lobject;
pub mod protocol;
pub mod registry;
pub mod row;
pub mod types;


// Public API re-exports for library consumers
pub use caster::{CastContext, CastError, CastFn, Caster, CasterGroup};
pub use connection::{Connection, ConnectionConfig, IsolationLevel};
pub use cursor::{Column, CopyStream, Cursor, ScrollMode};
pub use error::{PgError, PgResult};
pub use lobject::{LargeObject, LoMode};
pub use protocol::{Backend, FieldDescription, Format, LargeObjectBackend, QueryBackend, RawResult, ResultKind, Whence};
pub use registry::TypeRegistry;
pub use row::{DictRow, DictRowFactory, RowFactory, TupleRowFactory};
pub use types::{Interval, Oid, Value};
