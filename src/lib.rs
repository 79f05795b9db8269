//! pgcast - PostgreSQL result typecasting, cursors and large objects.
//!
//! The crate sits between a PostgreSQL protocol layer (anything
//! implementing [`pg::Backend`]) and application code: it turns raw
//! column buffers into typed [`Value`]s through an extensible caster
//! registry, buffers results behind DB-API style cursors, and manages
//! large-object handles that expire with the transaction that opened them.

pub mod error;
pub mod pg;

pub use error::{BoxError, Error, Result};
pub use pg::{
    Caster, CasterGroup, Connection, ConnectionConfig, Cursor, Format, IsolationLevel, LargeObject,
    Oid, TypeRegistry, Value,
};
