//! Error types for the driver core.
//!
//! The variants mirror the DB-API exception families: misuse of a driver
//! resource is an interface error, misuse of a result is a programming error.

use thiserror::Error;

use crate::pg::{Oid, PgError};

/// Boxed error returned by user-supplied casters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    /// Driver or resource misuse: closed cursor, closed or invalidated large
    /// object, large object used in autocommit mode.
    #[error("{0}")]
    InterfaceError(String),

    /// Result misuse: no results to fetch, bad scroll target, invalid
    /// caster registration.
    #[error("{0}")]
    ProgrammingError(String),

    /// A caster failed on a specific raw value.
    #[error("cannot convert column {column} (type {type_oid}): {source}")]
    ConversionError {
        column: usize,
        type_oid: Oid,
        raw: Vec<u8>,
        #[source]
        source: BoxError,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] PgError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    pub(crate) fn interface(msg: impl Into<String>) -> Self {
        Error::InterfaceError(msg.into())
    }

    pub(crate) fn programming(msg: impl Into<String>) -> Self {
        Error::ProgrammingError(msg.into())
    }

    /// The raw bytes a failed conversion was applied to.
    pub fn raw_value(&self) -> Option<&[u8]> {
        match self {
            Error::ConversionError { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
