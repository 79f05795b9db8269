//! Casters: immutable conversion units bound to server type identifiers.
//!
//! A [`Caster`] turns the raw bytes of one column value into a [`Value`].
//! It either wraps a native routine from this crate or a callable supplied
//! by the embedding application. Casters never change after construction
//! and are shared through `Arc` by registries and cursors alike.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use smallvec::SmallVec;
use thiserror::Error;

use super::array;
use super::protocol::Format;
use super::types::{Oid, Value};
use crate::error::{BoxError, Error, Result};

// ============================================================================
// Errors from native conversion routines
// ============================================================================

/// Why a native conversion routine rejected its input.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("invalid {type_name} length: {len}")]
    InvalidLength { type_name: &'static str, len: usize },

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid {type_name} value: {text:?}")]
    Parse { type_name: &'static str, text: String },

    #[error("{type_name} value out of range")]
    OutOfRange { type_name: &'static str },

    #[error("malformed array: {0}")]
    Array(String),

    #[error("unsupported DateStyle {0:?}, only ISO output can be parsed")]
    DateStyle(String),
}

impl CastError {
    pub(crate) fn parse(type_name: &'static str, text: &[u8]) -> Self {
        CastError::Parse {
            type_name,
            text: String::from_utf8_lossy(text).into_owned(),
        }
    }
}

// ============================================================================
// Cast context
// ============================================================================

static NO_PARAMETERS: Lazy<HashMap<String, String>> = Lazy::new(HashMap::new);

/// Read-only information about the value being converted.
#[derive(Debug, Clone, Copy)]
pub struct CastContext<'a> {
    /// Zero-based column index in the result.
    pub column: usize,
    /// Type id the server reported for the column.
    pub type_oid: Oid,
    /// Wire format of the raw bytes.
    pub format: Format,
    pub column_name: &'a str,
    parameters: &'a HashMap<String, String>,
}

impl<'a> CastContext<'a> {
    pub fn new(
        column: usize,
        column_name: &'a str,
        type_oid: Oid,
        format: Format,
        parameters: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            column,
            type_oid,
            format,
            column_name,
            parameters,
        }
    }

    /// A context with no cursor or connection behind it.
    pub fn detached(type_oid: Oid, format: Format) -> CastContext<'static> {
        CastContext {
            column: 0,
            type_oid,
            format,
            column_name: "",
            parameters: &NO_PARAMETERS,
        }
    }

    /// A server run-time parameter of the owning connection (e.g. "DateStyle").
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Same context, retargeted at an element type (used by array casters).
    pub(crate) fn for_element(&self, type_oid: Oid) -> Self {
        Self { type_oid, ..*self }
    }
}

// ============================================================================
// Caster
// ============================================================================

/// Signature of the native conversion routines.
pub type NativeCast = fn(&[u8], &CastContext<'_>) -> std::result::Result<Value, CastError>;

/// A conversion callable supplied by the embedding application.
pub type UserCast =
    Arc<dyn Fn(&[u8], &CastContext<'_>) -> std::result::Result<Value, BoxError> + Send + Sync>;

/// The conversion behaviour of a caster.
#[derive(Clone)]
pub enum CastFn {
    /// A routine implemented in this crate.
    Native(NativeCast),
    /// Element-wise conversion of an array with the given element caster.
    Array(Arc<Caster>),
    /// A callable supplied by the embedding application.
    User(UserCast),
    /// No behaviour: every value converts to [`Value::Null`].
    Absent,
}

/// An immutable value-conversion unit bound to one or more type ids.
pub struct Caster {
    name: Option<String>,
    type_ids: SmallVec<[Oid; 4]>,
    convert: CastFn,
}

impl Caster {
    /// Build a caster; duplicate ids are dropped, first occurrence wins the position.
    pub fn new(name: Option<&str>, type_ids: impl IntoIterator<Item = Oid>, convert: CastFn) -> Self {
        let mut ids: SmallVec<[Oid; 4]> = SmallVec::new();
        for oid in type_ids {
            if !ids.contains(&oid) {
                ids.push(oid);
            }
        }
        Self {
            name: name.map(str::to_string),
            type_ids: ids,
            convert,
        }
    }

    pub fn native(name: &str, type_ids: &[Oid], cast: NativeCast) -> Self {
        Self::new(Some(name), type_ids.iter().copied(), CastFn::Native(cast))
    }

    /// Wrap an application callable.
    pub fn user<F>(name: Option<&str>, type_ids: &[Oid], cast: F) -> Self
    where
        F: Fn(&[u8], &CastContext<'_>) -> std::result::Result<Value, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, type_ids.iter().copied(), CastFn::User(Arc::new(cast)))
    }

    /// An array caster converting each element with `element`.
    pub fn array(name: &str, type_ids: &[Oid], element: Arc<Caster>) -> Self {
        Self::new(Some(name), type_ids.iter().copied(), CastFn::Array(element))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn type_ids(&self) -> &[Oid] {
        &self.type_ids
    }

    pub fn cast_fn(&self) -> &CastFn {
        &self.convert
    }

    /// Check whether this caster is bound to `oid`.
    #[inline]
    pub fn accepts(&self, oid: Oid) -> bool {
        self.type_ids.contains(&oid)
    }

    /// Convert one column value.
    ///
    /// SQL NULL (`None`) converts to [`Value::Null`] without running any
    /// conversion code. Failures carry the column index and raw bytes.
    pub fn cast(&self, raw: Option<&[u8]>, ctx: &CastContext<'_>) -> Result<Value> {
        let Some(raw) = raw else {
            return Ok(Value::Null);
        };
        self.convert(raw, ctx)
            .map_err(|source| Error::ConversionError {
                column: ctx.column,
                type_oid: ctx.type_oid,
                raw: raw.to_vec(),
                source,
            })
    }

    /// Convert a non-null value, leaving errors unwrapped.
    pub(crate) fn convert(
        &self,
        raw: &[u8],
        ctx: &CastContext<'_>,
    ) -> std::result::Result<Value, BoxError> {
        match &self.convert {
            CastFn::Native(cast) => cast(raw, ctx).map_err(BoxError::from),
            CastFn::User(cast) => cast(raw, ctx),
            CastFn::Array(element) => array::decode(raw, element, ctx),
            CastFn::Absent => Ok(Value::Null),
        }
    }

    /// Compare how specifically two casters claim type ids.
    ///
    /// A caster bound to a single id is more specific (`Greater`) than one
    /// bound to several. Two single-id casters are `Equal` when they claim
    /// the same id. Two multi-id casters are `Equal` when one id set
    /// contains the other. Anything else has no defined order and yields
    /// `None`; callers settle those by registration order.
    pub fn precedence(&self, other: &Caster) -> Option<Ordering> {
        match (self.type_ids.len(), other.type_ids.len()) {
            (0, _) | (_, 0) => None,
            (1, 1) => (self.type_ids[0] == other.type_ids[0]).then_some(Ordering::Equal),
            (1, _) => Some(Ordering::Greater),
            (_, 1) => Some(Ordering::Less),
            _ => {
                let covers = |a: &Caster, b: &Caster| b.type_ids.iter().all(|t| a.accepts(*t));
                (covers(self, other) || covers(other, self)).then_some(Ordering::Equal)
            }
        }
    }
}

impl fmt::Debug for Caster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.convert {
            CastFn::Native(_) => "native",
            CastFn::Array(_) => "array",
            CastFn::User(_) => "user",
            CastFn::Absent => "absent",
        };
        f.debug_struct("Caster")
            .field("name", &self.name)
            .field("type_ids", &self.type_ids)
            .field("kind", &kind)
            .finish()
    }
}

/// DB-API type object comparison: a type code equals a caster that claims it.
impl PartialEq<Oid> for Caster {
    fn eq(&self, other: &Oid) -> bool {
        self.accepts(*other)
    }
}

// ============================================================================
// Caster groups
// ============================================================================

/// A named family of casters registered as one unit.
#[derive(Debug, Clone)]
pub struct CasterGroup {
    name: String,
    members: Vec<Arc<Caster>>,
}

impl CasterGroup {
    pub fn new(name: &str, members: Vec<Arc<Caster>>) -> Self {
        Self {
            name: name.to_string(),
            members,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Arc<Caster>] {
        &self.members
    }

    /// The member that should handle `oid`.
    ///
    /// The most specific claimant wins; when two members are equally
    /// specific or not comparable, the later member wins.
    pub fn resolve(&self, oid: Oid) -> Option<&Arc<Caster>> {
        let mut best: Option<&Arc<Caster>> = None;
        for candidate in self.members.iter().filter(|c| c.accepts(oid)) {
            best = match best {
                Some(current) if candidate.precedence(current) == Some(Ordering::Less) => {
                    Some(current)
                }
                _ => Some(candidate),
            };
        }
        best
    }

    /// Every id the group binds, paired with its resolved member, in member order.
    pub fn bindings(&self) -> Vec<(Oid, Arc<Caster>)> {
        let mut seen: SmallVec<[Oid; 16]> = SmallVec::new();
        let mut out = Vec::new();
        for member in &self.members {
            for &oid in member.type_ids() {
                if seen.contains(&oid) {
                    continue;
                }
                seen.push(oid);
                if let Some(winner) = self.resolve(oid) {
                    out.push((oid, Arc::clone(winner)));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &[u8], _: &CastContext<'_>) -> std::result::Result<Value, CastError> {
        Ok(Value::Bool(true))
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let c = Caster::native("X", &[Oid(1), Oid(2), Oid(1)], nop);
        assert_eq!(c.type_ids(), &[Oid(1), Oid(2)]);
        assert_eq!(c.name(), Some("X"));
    }

    #[test]
    fn test_null_never_reaches_user_code() {
        let c = Caster::user(None, &[Oid(9000)], |_, _| -> std::result::Result<Value, BoxError> {
            panic!("user cast invoked for NULL")
        });
        let ctx = CastContext::detached(Oid(9000), Format::Text);
        assert_eq!(c.cast(None, &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_absent_caster_yields_null() {
        let c = Caster::new(Some("NONE"), [Oid(1)], CastFn::Absent);
        let ctx = CastContext::detached(Oid(1), Format::Text);
        assert_eq!(c.cast(Some(b"anything"), &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_user_error_is_wrapped_with_column_context() {
        let c = Caster::user(Some("FAIL"), &[Oid(9001)], |raw, _| {
            Err(format!("refusing {} bytes", raw.len()).into())
        });
        let mut ctx = CastContext::detached(Oid(9001), Format::Text);
        ctx.column = 3;
        let err = c.cast(Some(b"abc"), &ctx).unwrap_err();
        match err {
            Error::ConversionError {
                column,
                type_oid,
                raw,
                source,
            } => {
                assert_eq!(column, 3);
                assert_eq!(type_oid, Oid(9001));
                assert_eq!(raw, b"abc");
                assert_eq!(source.to_string(), "refusing 3 bytes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_precedence_single_beats_multi() {
        let single = Caster::native("S", &[Oid(1)], nop);
        let multi = Caster::native("M", &[Oid(1), Oid(2)], nop);
        assert_eq!(single.precedence(&multi), Some(Ordering::Greater));
        assert_eq!(multi.precedence(&single), Some(Ordering::Less));
    }

    #[test]
    fn test_precedence_multi_vs_multi() {
        let ab = Caster::native("AB", &[Oid(1), Oid(2)], nop);
        let abc = Caster::native("ABC", &[Oid(1), Oid(2), Oid(3)], nop);
        let cd = Caster::native("CD", &[Oid(3), Oid(4)], nop);
        let bc = Caster::native("BC", &[Oid(2), Oid(3)], nop);
        assert_eq!(ab.precedence(&abc), Some(Ordering::Equal));
        assert_eq!(abc.precedence(&ab), Some(Ordering::Equal));
        assert_eq!(ab.precedence(&cd), None);
        // overlapping but neither contains the other
        assert_eq!(ab.precedence(&bc), None);
    }

    #[test]
    fn test_precedence_single_vs_single() {
        let a = Caster::native("A", &[Oid(1)], nop);
        let a2 = Caster::native("A2", &[Oid(1)], nop);
        let b = Caster::native("B", &[Oid(2)], nop);
        assert_eq!(a.precedence(&a2), Some(Ordering::Equal));
        assert_eq!(a.precedence(&b), None);
    }

    #[test]
    fn test_type_object_comparison() {
        let c = Caster::native("STRING", &[Oid::TEXT, Oid::VARCHAR], nop);
        assert!(c == Oid::VARCHAR);
        assert!(c != Oid::INT4);
    }

    #[test]
    fn test_group_resolution_prefers_specific_then_later() {
        let wide = Arc::new(Caster::native("WIDE", &[Oid(1), Oid(2)], nop));
        let narrow = Arc::new(Caster::native("NARROW", &[Oid(2)], nop));
        let other = Arc::new(Caster::native("OTHER", &[Oid(2), Oid(3)], nop));
        let group = CasterGroup::new(
            "g",
            vec![Arc::clone(&narrow), Arc::clone(&wide), Arc::clone(&other)],
        );

        assert_eq!(group.resolve(Oid(2)).unwrap().name(), Some("NARROW"));
        assert_eq!(group.resolve(Oid(1)).unwrap().name(), Some("WIDE"));
        assert!(group.resolve(Oid(4)).is_none());

        // WIDE and OTHER are not comparable: the later one wins for the shared id
        let ambiguous = CasterGroup::new("a", vec![wide, other]);
        assert_eq!(ambiguous.resolve(Oid(2)).unwrap().name(), Some("OTHER"));

        let ids: Vec<Oid> = ambiguous.bindings().into_iter().map(|(oid, _)| oid).collect();
        assert_eq!(ids, vec![Oid(1), Oid(2), Oid(3)]);
    }
}
