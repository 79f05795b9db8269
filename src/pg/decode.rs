//! Native conversion routines for the non-temporal built-in types.
//!
//! Text-format routines take the server's output representation, binary
//! routines take the send/recv representation.
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use std::fmt::Write as _;

use bytes::Buf;

use super::caster::{CastContext, CastError};
use super::types::{Oid, Value};

type CastResult = Result<Value, CastError>;

/// Validate UTF-8 and copy into an owned string.
pub(crate) fn utf8(data: &[u8]) -> Result<&str, CastError> {
    Ok(std::str::from_utf8(data)?)
}

// ============================================================================
// Fallback
// ============================================================================

/// The default cast: hand back the raw text unchanged.
///
/// Bytes that are not valid UTF-8 (binary columns without a binary caster)
/// come back as [`Value::Bytes`].
pub fn cast_default(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    Ok(match std::str::from_utf8(data) {
        Ok(s) => Value::Text(s.to_string()),
        Err(_) => Value::Bytes(data.to_vec()),
    })
}

// ============================================================================
// Text format
// ============================================================================

pub fn cast_string(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    Ok(Value::Text(utf8(data)?.to_string()))
}

pub fn cast_integer(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    utf8(data)?
        .trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| CastError::parse("integer", data))
}

/// `oid` values are unsigned 32-bit.
pub fn cast_rowid(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    utf8(data)?
        .trim()
        .parse::<u32>()
        .map(|v| Value::Int(i64::from(v)))
        .map_err(|_| CastError::parse("oid", data))
}

pub fn cast_float(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    // Rust accepts "NaN", "Infinity" and "-Infinity" case-insensitively
    utf8(data)?
        .trim()
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| CastError::parse("float", data))
}

pub fn cast_numeric(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    let text = utf8(data)?.trim();
    if is_numeric_literal(text) {
        Ok(Value::Numeric(text.to_string()))
    } else {
        Err(CastError::parse("numeric", data))
    }
}

fn is_numeric_literal(text: &str) -> bool {
    if matches!(text, "NaN" | "Infinity" | "-Infinity") {
        return true;
    }
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok = digits(int_part) && digits(frac_part) && !(int_part.is_empty() && frac_part.is_empty());
    let exponent_ok = exponent.map_or(true, |e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    mantissa_ok && exponent_ok
}

pub fn cast_boolean(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    match utf8(data)?.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(Value::Bool(false)),
        _ => Err(CastError::parse("boolean", data)),
    }
}

/// `bytea` in either `hex` or legacy `escape` output format.
pub fn cast_binary(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    if let Some(hex) = data.strip_prefix(b"\\x") {
        return decode_hex(hex).map(Value::Bytes);
    }
    decode_escape(data).map(Value::Bytes)
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>, CastError> {
    fn nibble(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    if hex.len() % 2 != 0 {
        return Err(CastError::InvalidLength {
            type_name: "bytea hex",
            len: hex.len(),
        });
    }
    hex.chunks_exact(2)
        .map(|pair| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
            _ => Err(CastError::parse("bytea", pair)),
        })
        .collect()
}

fn decode_escape(data: &[u8]) -> Result<Vec<u8>, CastError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != b'\\' {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1..i + 4) {
            _ if data.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(oct) if oct.iter().all(|b| (b'0'..=b'7').contains(b)) => {
                let value = oct
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                let byte = u8::try_from(value).map_err(|_| CastError::OutOfRange {
                    type_name: "bytea",
                })?;
                out.push(byte);
                i += 4;
            }
            _ => return Err(CastError::parse("bytea", &data[i..])),
        }
    }
    Ok(out)
}

pub fn cast_uuid(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    uuid::Uuid::parse_str(utf8(data)?.trim())
        .map(Value::Uuid)
        .map_err(|_| CastError::parse("uuid", data))
}

pub fn cast_json(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    serde_json::from_slice(data)
        .map(Value::Json)
        .map_err(|_| CastError::parse("json", data))
}

// ============================================================================
// Binary format
// ============================================================================

fn expect_len(data: &[u8], type_name: &'static str, lens: &[usize]) -> Result<(), CastError> {
    if lens.contains(&data.len()) {
        Ok(())
    } else {
        Err(CastError::InvalidLength {
            type_name,
            len: data.len(),
        })
    }
}

pub fn bin_bool(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "BOOL", &[1])?;
    Ok(Value::Bool(data[0] != 0))
}

/// `int2`, `int4` and `int8` all come through here; the length picks the width.
pub fn bin_integer(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "integer", &[2, 4, 8])?;
    let mut buf = data;
    Ok(Value::Int(match data.len() {
        2 => i64::from(buf.get_i16()),
        4 => i64::from(buf.get_i32()),
        _ => buf.get_i64(),
    }))
}

pub fn bin_rowid(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "OID", &[4])?;
    let mut buf = data;
    Ok(Value::Int(i64::from(buf.get_u32())))
}

pub fn bin_float(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    expect_len(data, "float", &[4, 8])?;
    let mut buf = data;
    Ok(Value::Float(if data.len() == 4 {
        f64::from(buf.get_f32())
    } else {
        buf.get_f64()
    }))
}

pub fn bin_string(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    Ok(Value::Text(utf8(data)?.to_string()))
}

pub fn bin_bytea(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    Ok(Value::Bytes(data.to_vec()))
}

pub fn bin_uuid(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    uuid::Uuid::from_slice(data)
        .map(Value::Uuid)
        .map_err(|_| CastError::InvalidLength {
            type_name: "UUID",
            len: data.len(),
        })
}

/// `jsonb` carries a version byte before the document text.
pub fn bin_json(data: &[u8], ctx: &CastContext<'_>) -> CastResult {
    let json_data = if ctx.type_oid == Oid::JSONB {
        match data.split_first() {
            Some((1, rest)) => rest,
            _ => return Err(CastError::parse("jsonb", data)),
        }
    } else {
        data
    };
    cast_json(json_data, ctx)
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// `numeric` send format: base-10000 digits with weight, sign and display scale.
pub fn bin_numeric(data: &[u8], _ctx: &CastContext<'_>) -> CastResult {
    if data.len() < 8 {
        return Err(CastError::InvalidLength {
            type_name: "NUMERIC",
            len: data.len(),
        });
    }
    let mut buf = data;
    let ndigits = buf.get_i16();
    let weight = buf.get_i16();
    let sign = buf.get_u16();
    let dscale = buf.get_u16();

    match sign {
        NUMERIC_NAN => return Ok(Value::Numeric("NaN".to_string())),
        NUMERIC_PINF => return Ok(Value::Numeric("Infinity".to_string())),
        NUMERIC_NINF => return Ok(Value::Numeric("-Infinity".to_string())),
        0 | NUMERIC_NEG => {}
        _ => return Err(CastError::parse("numeric sign", &sign.to_be_bytes())),
    }

    let ndigits = usize::try_from(ndigits).map_err(|_| CastError::OutOfRange {
        type_name: "NUMERIC",
    })?;
    if buf.remaining() != ndigits * 2 {
        return Err(CastError::InvalidLength {
            type_name: "NUMERIC",
            len: data.len(),
        });
    }
    let digits: Vec<i16> = (0..ndigits).map(|_| buf.get_i16()).collect();
    let digit = |idx: i32| -> i16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    let weight = i32::from(weight);
    if weight < 0 {
        out.push('0');
    } else {
        for idx in 0..=weight {
            if idx == 0 {
                let _ = write!(out, "{}", digit(idx));
            } else {
                let _ = write!(out, "{:04}", digit(idx));
            }
        }
    }
    if dscale > 0 {
        let dscale = usize::from(dscale);
        let mut frac = String::with_capacity(dscale + 4);
        let mut idx = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(idx));
            idx += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(Value::Numeric(out))
}
