//! Array decoding for array casters.
//!
//! Text arrays look like `{1,2,NULL,"a \"b\""}` (optionally prefixed with
//! explicit bounds such as `[0:2]=`); binary arrays carry a dimension header
//! followed by length-prefixed elements.

use bytes::Buf;

use super::caster::{CastContext, CastError, Caster};
use super::protocol::Format;
use super::types::{Oid, Value};
use crate::error::BoxError;

/// Decode an array value, converting every element with `element`.
pub(crate) fn decode(raw: &[u8], element: &Caster, ctx: &CastContext<'_>) -> Result<Value, BoxError> {
    match ctx.format {
        Format::Text => {
            let element_oid = element_type(ctx.type_oid)
                .or_else(|| element.type_ids().first().copied())
                .unwrap_or(ctx.type_oid);
            let ctx = ctx.for_element(element_oid);
            TextArrayParser::new(raw).parse(element, &ctx).map(Value::Array)
        }
        Format::Binary => decode_binary(raw, element, ctx),
    }
}

/// Element type of the built-in array types.
pub fn element_type(array: Oid) -> Option<Oid> {
    Some(match array {
        Oid::BOOL_ARRAY => Oid::BOOL,
        Oid::BYTEA_ARRAY => Oid::BYTEA,
        Oid::CHAR_ARRAY => Oid::CHAR,
        Oid::NAME_ARRAY => Oid::NAME,
        Oid::INT2_ARRAY => Oid::INT2,
        Oid::INT4_ARRAY => Oid::INT4,
        Oid::TEXT_ARRAY => Oid::TEXT,
        Oid::BPCHAR_ARRAY => Oid::BPCHAR,
        Oid::VARCHAR_ARRAY => Oid::VARCHAR,
        Oid::INT8_ARRAY => Oid::INT8,
        Oid::FLOAT4_ARRAY => Oid::FLOAT4,
        Oid::FLOAT8_ARRAY => Oid::FLOAT8,
        Oid::TIMESTAMP_ARRAY => Oid::TIMESTAMP,
        Oid::DATE_ARRAY => Oid::DATE,
        Oid::TIME_ARRAY => Oid::TIME,
        Oid::TIMESTAMPTZ_ARRAY => Oid::TIMESTAMPTZ,
        Oid::INTERVAL_ARRAY => Oid::INTERVAL,
        Oid::NUMERIC_ARRAY => Oid::NUMERIC,
        Oid::UUID_ARRAY => Oid::UUID,
        _ => return None,
    })
}

// ============================================================================
// Text format
// ============================================================================

struct TextArrayParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> TextArrayParser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, what: &str) -> CastError {
        CastError::Array(format!("{} at offset {}", what, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse(mut self, element: &Caster, ctx: &CastContext<'_>) -> Result<Vec<Value>, BoxError> {
        self.skip_whitespace();
        // explicit bounds decoration: "[1:3]={...}"
        if self.peek() == Some(b'[') {
            let eq = self.input[self.pos..]
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| self.error("missing '=' after dimensions"))?;
            self.pos += eq + 1;
            self.skip_whitespace();
        }
        let items = self.parse_level(element, ctx)?;
        self.skip_whitespace();
        if self.pos != self.input.len() {
            return Err(self.error("trailing characters").into());
        }
        Ok(items)
    }

    fn parse_level(&mut self, element: &Caster, ctx: &CastContext<'_>) -> Result<Vec<Value>, BoxError> {
        if self.peek() != Some(b'{') {
            return Err(self.error("expected '{'").into());
        }
        self.pos += 1;
        let mut items = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(items);
        }

        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some(b'{') => Value::Array(self.parse_level(element, ctx)?),
                Some(b'"') => {
                    let text = self.quoted()?;
                    element.convert(&text, ctx)?
                }
                Some(_) => {
                    let text = self.unquoted()?;
                    if text.eq_ignore_ascii_case(b"NULL") {
                        Value::Null
                    } else {
                        element.convert(&text, ctx)?
                    }
                }
                None => return Err(self.error("unterminated array").into()),
            };
            items.push(item);

            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error("expected ',' or '}'").into()),
            }
        }
    }

    fn quoted(&mut self) -> Result<Vec<u8>, CastError> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    out.push(escaped);
                    self.pos += 1;
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated quoted element")),
            }
        }
    }

    fn unquoted(&mut self) -> Result<Vec<u8>, CastError> {
        let mut out = Vec::new();
        while let Some(b) = self.peek() {
            match b {
                b',' | b'}' => break,
                b'{' | b'"' => return Err(self.error("unexpected character in element")),
                b'\\' => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    out.push(escaped);
                    self.pos += 1;
                }
                _ => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        while out.last().is_some_and(|b| b.is_ascii_whitespace()) {
            out.pop();
        }
        if out.is_empty() {
            return Err(self.error("empty element"));
        }
        Ok(out)
    }
}

// ============================================================================
// Binary format
// ============================================================================

/// Deepest nesting the server allows (MAXDIM).
const MAX_DIMENSIONS: usize = 6;

fn read_i32(buf: &mut &[u8]) -> Result<i32, CastError> {
    if buf.remaining() < 4 {
        return Err(CastError::Array("truncated binary array".to_string()));
    }
    Ok(buf.get_i32())
}

fn decode_binary(raw: &[u8], element: &Caster, ctx: &CastContext<'_>) -> Result<Value, BoxError> {
    let mut buf = raw;
    let ndim = read_i32(&mut buf)?;
    let _has_nulls = read_i32(&mut buf)?;
    let element_oid = Oid(read_i32(&mut buf)?);
    let ctx = ctx.for_element(element_oid);

    let ndim = usize::try_from(ndim)
        .ok()
        .filter(|&n| n <= MAX_DIMENSIONS)
        .ok_or_else(|| CastError::Array(format!("bad dimension count {ndim}")))?;
    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let len = read_i32(&mut buf)?;
        let _lower_bound = read_i32(&mut buf)?;
        dims.push(usize::try_from(len).map_err(|_| CastError::Array(format!("bad dimension length {len}")))?);
    }
    if dims.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    // every element carries at least its 4-byte length word
    let total = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|&n| n > 0 && n <= buf.remaining() / 4)
        .ok_or_else(|| CastError::Array(format!("dimensions {dims:?} exceed the payload")))?;
    tracing::trace!(ndim, elements = total, "Decoding binary array");

    let items = binary_level(&mut buf, &dims, element, &ctx)?;
    if buf.has_remaining() {
        return Err(CastError::Array("trailing bytes in binary array".to_string()).into());
    }
    Ok(Value::Array(items))
}

fn binary_level(
    buf: &mut &[u8],
    dims: &[usize],
    element: &Caster,
    ctx: &CastContext<'_>,
) -> Result<Vec<Value>, BoxError> {
    let (&len, inner) = dims
        .split_first()
        .ok_or_else(|| CastError::Array("missing dimension".to_string()))?;
    let mut items = Vec::with_capacity(len.min(buf.remaining() / 4));
    for _ in 0..len {
        if !inner.is_empty() {
            items.push(Value::Array(binary_level(buf, inner, element, ctx)?));
            continue;
        }
        let size = read_i32(buf)?;
        if size < 0 {
            items.push(Value::Null);
            continue;
        }
        let size = usize::try_from(size).map_err(|_| CastError::Array("bad element size".to_string()))?;
        if buf.remaining() < size {
            return Err(CastError::Array("truncated element".to_string()).into());
        }
        let current: &[u8] = *buf;
        let (data, rest) = current.split_at(size);
        *buf = rest;
        items.push(element.convert(data, ctx)?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::decode::{bin_integer, cast_integer, cast_string};

    fn int_caster() -> Caster {
        Caster::native("INTEGER", &[Oid::INT4], cast_integer)
    }

    fn parse(text: &str, element: &Caster) -> Result<Value, BoxError> {
        let ctx = CastContext::detached(Oid::INT4_ARRAY, Format::Text);
        decode(text.as_bytes(), element, &ctx)
    }

    #[test]
    fn test_flat_and_empty() {
        let ints = int_caster();
        assert_eq!(
            parse("{1,2,3}", &ints).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(parse("{}", &ints).unwrap(), Value::Array(vec![]));
        assert_eq!(
            parse("{1,NULL, 3 }", &ints).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Null, Value::Int(3)])
        );
    }

    #[test]
    fn test_nested_and_bounds() {
        let ints = int_caster();
        assert_eq!(
            parse("[0:1][1:2]={{1,2},{3,4}}", &ints).unwrap(),
            Value::Array(vec![
                Value::Array(vec![Value::Int(1), Value::Int(2)]),
                Value::Array(vec![Value::Int(3), Value::Int(4)]),
            ])
        );
    }

    #[test]
    fn test_quoted_strings() {
        let strings = Caster::native("STRING", &[Oid::TEXT], cast_string);
        assert_eq!(
            parse(r#"{"a b","say \"hi\"",NULL,"NULL",plain}"#, &strings).unwrap(),
            Value::Array(vec![
                Value::Text("a b".into()),
                Value::Text("say \"hi\"".into()),
                Value::Null,
                Value::Text("NULL".into()),
                Value::Text("plain".into()),
            ])
        );
    }

    #[test]
    fn test_malformed() {
        let ints = int_caster();
        assert!(parse("{1,2", &ints).is_err());
        assert!(parse("1,2}", &ints).is_err());
        assert!(parse("{1,,2}", &ints).is_err());
        assert!(parse("{1} x", &ints).is_err());
        assert!(parse("{1,x}", &ints).is_err());
    }

    #[test]
    fn test_binary_array() {
        let ints = Caster::native("INTEGER", &[Oid::INT4], bin_integer);
        let mut raw = Vec::new();
        for v in [1i32, 1, Oid::INT4.as_i32(), 3, 1] {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        for v in [Some(7i32), None, Some(-1)] {
            match v {
                Some(v) => {
                    raw.extend_from_slice(&4i32.to_be_bytes());
                    raw.extend_from_slice(&v.to_be_bytes());
                }
                None => raw.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        let ctx = CastContext::detached(Oid::INT4_ARRAY, Format::Binary);
        assert_eq!(
            decode(&raw, &ints, &ctx).unwrap(),
            Value::Array(vec![Value::Int(7), Value::Null, Value::Int(-1)])
        );

        assert!(decode(&raw[..raw.len() - 2], &ints, &ctx).is_err());
    }

    fn header(words: &[i32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn test_binary_dimensions_bounded_by_payload() {
        let ints = Caster::native("INTEGER", &[Oid::INT4], bin_integer);
        let ctx = CastContext::detached(Oid::INT4_ARRAY, Format::Binary);

        let huge = header(&[1, 0, Oid::INT4.as_i32(), i32::MAX, 1]);
        assert!(decode(&huge, &ints, &ctx).is_err());

        let wide = header(&[2, 0, Oid::INT4.as_i32(), 65_536, 1, 65_536, 1]);
        assert!(decode(&wide, &ints, &ctx).is_err());

        let zero = header(&[1, 0, Oid::INT4.as_i32(), 0, 1]);
        assert!(decode(&zero, &ints, &ctx).is_err());
    }

    #[test]
    fn test_binary_too_many_dimensions() {
        let ints = Caster::native("INTEGER", &[Oid::INT4], bin_integer);
        let ctx = CastContext::detached(Oid::INT4_ARRAY, Format::Binary);
        let mut words = vec![7, 0, Oid::INT4.as_i32()];
        for _ in 0..7 {
            words.extend([1, 1]);
        }
        words.extend([4, 9]);
        let err = decode(&header(&words), &ints, &ctx).unwrap_err();
        assert!(err.to_string().contains("bad dimension count 7"), "{err}");
    }
}
