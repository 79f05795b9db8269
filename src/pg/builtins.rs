//! The built-in caster table.
//!
//! Every built-in exists twice: once for text-format columns and once for
//! binary-format columns, each registered into its own mapping.

use std::sync::Arc;

use once_cell::sync::Lazy;

use super::caster::{CastFn, Caster, CasterGroup, NativeCast};
use super::datetime;
use super::decode;
use super::types::Oid;

struct Builtin {
    name: &'static str,
    type_ids: &'static [Oid],
    cast: NativeCast,
}

struct BuiltinArray {
    name: &'static str,
    type_ids: &'static [Oid],
    element: &'static str,
}

const STRING_TYPES: &[Oid] = &[
    Oid::BPCHAR,
    Oid::CHAR,
    Oid::NAME,
    Oid::TEXT,
    Oid::VARCHAR,
    Oid::UNKNOWN,
];

const TEXT_BUILTINS: &[Builtin] = &[
    Builtin { name: "STRING", type_ids: STRING_TYPES, cast: decode::cast_string },
    Builtin { name: "INTEGER", type_ids: &[Oid::INT2, Oid::INT4], cast: decode::cast_integer },
    Builtin { name: "LONGINTEGER", type_ids: &[Oid::INT8], cast: decode::cast_integer },
    Builtin { name: "FLOAT", type_ids: &[Oid::FLOAT4, Oid::FLOAT8], cast: decode::cast_float },
    Builtin { name: "DECIMAL", type_ids: &[Oid::NUMERIC], cast: decode::cast_numeric },
    Builtin { name: "BOOLEAN", type_ids: &[Oid::BOOL], cast: decode::cast_boolean },
    Builtin { name: "BINARY", type_ids: &[Oid::BYTEA], cast: decode::cast_binary },
    Builtin { name: "ROWID", type_ids: &[Oid::OID_TYPE], cast: decode::cast_rowid },
    Builtin { name: "UUID", type_ids: &[Oid::UUID], cast: decode::cast_uuid },
    Builtin { name: "JSON", type_ids: &[Oid::JSON, Oid::JSONB], cast: decode::cast_json },
];

const TEMPORAL_BUILTINS: &[Builtin] = &[
    Builtin { name: "DATETIME", type_ids: &[Oid::TIMESTAMP, Oid::TIMESTAMPTZ], cast: datetime::cast_datetime },
    Builtin { name: "TIME", type_ids: &[Oid::TIME, Oid::TIMETZ], cast: datetime::cast_time },
    Builtin { name: "DATE", type_ids: &[Oid::DATE], cast: datetime::cast_date },
    Builtin { name: "INTERVAL", type_ids: &[Oid::INTERVAL], cast: datetime::cast_interval },
];

const BINARY_BUILTINS: &[Builtin] = &[
    Builtin { name: "STRING", type_ids: STRING_TYPES, cast: decode::bin_string },
    Builtin { name: "INTEGER", type_ids: &[Oid::INT2, Oid::INT4], cast: decode::bin_integer },
    Builtin { name: "LONGINTEGER", type_ids: &[Oid::INT8], cast: decode::bin_integer },
    Builtin { name: "FLOAT", type_ids: &[Oid::FLOAT4, Oid::FLOAT8], cast: decode::bin_float },
    Builtin { name: "DECIMAL", type_ids: &[Oid::NUMERIC], cast: decode::bin_numeric },
    Builtin { name: "BOOLEAN", type_ids: &[Oid::BOOL], cast: decode::bin_bool },
    Builtin { name: "BINARY", type_ids: &[Oid::BYTEA], cast: decode::bin_bytea },
    Builtin { name: "ROWID", type_ids: &[Oid::OID_TYPE], cast: decode::bin_rowid },
    Builtin { name: "UUID", type_ids: &[Oid::UUID], cast: decode::bin_uuid },
    Builtin { name: "JSON", type_ids: &[Oid::JSON, Oid::JSONB], cast: decode::bin_json },
    Builtin { name: "DATETIME", type_ids: &[Oid::TIMESTAMP, Oid::TIMESTAMPTZ], cast: datetime::bin_datetime },
    Builtin { name: "TIME", type_ids: &[Oid::TIME, Oid::TIMETZ], cast: datetime::bin_time },
    Builtin { name: "DATE", type_ids: &[Oid::DATE], cast: datetime::bin_date },
    Builtin { name: "INTERVAL", type_ids: &[Oid::INTERVAL], cast: datetime::bin_interval },
];

const ARRAYS: &[BuiltinArray] = &[
    BuiltinArray {
        name: "STRINGARRAY",
        type_ids: &[
            Oid::TEXT_ARRAY,
            Oid::VARCHAR_ARRAY,
            Oid::BPCHAR_ARRAY,
            Oid::CHAR_ARRAY,
            Oid::NAME_ARRAY,
        ],
        element: "STRING",
    },
    BuiltinArray { name: "INTEGERARRAY", type_ids: &[Oid::INT2_ARRAY, Oid::INT4_ARRAY], element: "INTEGER" },
    BuiltinArray { name: "LONGINTEGERARRAY", type_ids: &[Oid::INT8_ARRAY], element: "LONGINTEGER" },
    BuiltinArray { name: "FLOATARRAY", type_ids: &[Oid::FLOAT4_ARRAY, Oid::FLOAT8_ARRAY], element: "FLOAT" },
    BuiltinArray { name: "DECIMALARRAY", type_ids: &[Oid::NUMERIC_ARRAY], element: "DECIMAL" },
    BuiltinArray { name: "BOOLEANARRAY", type_ids: &[Oid::BOOL_ARRAY], element: "BOOLEAN" },
    BuiltinArray { name: "BINARYARRAY", type_ids: &[Oid::BYTEA_ARRAY], element: "BINARY" },
    BuiltinArray { name: "UUIDARRAY", type_ids: &[Oid::UUID_ARRAY], element: "UUID" },
    BuiltinArray {
        name: "DATETIMEARRAY",
        type_ids: &[Oid::TIMESTAMP_ARRAY, Oid::TIMESTAMPTZ_ARRAY],
        element: "DATETIME",
    },
    BuiltinArray { name: "TIMEARRAY", type_ids: &[Oid::TIME_ARRAY], element: "TIME" },
    BuiltinArray { name: "DATEARRAY", type_ids: &[Oid::DATE_ARRAY], element: "DATE" },
    BuiltinArray { name: "INTERVALARRAY", type_ids: &[Oid::INTERVAL_ARRAY], element: "INTERVAL" },
];

static DEFAULT_CASTER: Lazy<Arc<Caster>> = Lazy::new(|| {
    Arc::new(Caster::new(
        Some("DEFAULT"),
        std::iter::empty(),
        CastFn::Native(decode::cast_default),
    ))
});

/// The fallback caster: raw text unchanged. Bound to no type id.
pub fn default_caster() -> Arc<Caster> {
    Arc::clone(&DEFAULT_CASTER)
}

fn build(table: &[Builtin]) -> Vec<Arc<Caster>> {
    table
        .iter()
        .map(|b| Arc::new(Caster::native(b.name, b.type_ids, b.cast)))
        .collect()
}

/// Append the array casters, wiring each to its element caster from `scalars`.
fn with_arrays(mut scalars: Vec<Arc<Caster>>) -> Vec<Arc<Caster>> {
    let arrays: Vec<Arc<Caster>> = ARRAYS
        .iter()
        .filter_map(|spec| {
            let element = scalars.iter().find(|c| c.name() == Some(spec.element))?;
            Some(Arc::new(Caster::array(spec.name, spec.type_ids, Arc::clone(element))))
        })
        .collect();
    scalars.extend(arrays);
    scalars
}

/// Built-in casters for text-format columns, temporal family included.
pub fn text_casters() -> Vec<Arc<Caster>> {
    let mut scalars = build(TEXT_BUILTINS);
    scalars.extend(temporal_group().members().iter().cloned());
    with_arrays(scalars)
}

/// Built-in casters for binary-format columns.
pub fn binary_casters() -> Vec<Arc<Caster>> {
    with_arrays(build(BINARY_BUILTINS))
}

/// The date/time family producing chrono values.
pub fn temporal_group() -> CasterGroup {
    CasterGroup::new("temporal", build(TEMPORAL_BUILTINS))
}

/// The date/time family keeping the server's ISO text.
pub fn temporal_iso_group() -> CasterGroup {
    let members = TEMPORAL_BUILTINS
        .iter()
        .map(|b| Arc::new(Caster::native(b.name, b.type_ids, datetime::cast_iso_text)))
        .collect();
    CasterGroup::new("temporal_iso", members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_has_ids() {
        for caster in text_casters().iter().chain(binary_casters().iter()) {
            assert!(!caster.type_ids().is_empty(), "{:?} has no ids", caster.name());
        }
        assert!(default_caster().type_ids().is_empty());
    }

    #[test]
    fn test_text_and_binary_tables_cover_the_same_arrays() {
        let count = |casters: &[Arc<Caster>]| {
            casters
                .iter()
                .filter(|c| matches!(c.cast_fn(), CastFn::Array(_)))
                .count()
        };
        assert_eq!(count(&text_casters()), ARRAYS.len());
        assert_eq!(count(&binary_casters()), ARRAYS.len());
    }

    #[test]
    fn test_no_id_is_claimed_twice_per_format() {
        for casters in [text_casters(), binary_casters()] {
            let mut seen = std::collections::HashSet::new();
            for caster in &casters {
                for oid in caster.type_ids() {
                    assert!(seen.insert(*oid), "{oid} claimed twice");
                }
            }
        }
    }

    #[test]
    fn test_temporal_groups_cover_same_ids() {
        let ids = |g: CasterGroup| -> Vec<Oid> { g.bindings().into_iter().map(|(o, _)| o).collect() };
        assert_eq!(ids(temporal_group()), ids(temporal_iso_group()));
    }
}
