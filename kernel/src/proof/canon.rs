//! Canonical JSON bytes: the single serialization-for-hashing implementation.
//!
//! **Exactly one place** produces canonical JSON bytes. Every document that is
//! hashed, written into a bundle, or compared for rerun equivalence must route
//! through this module.
//!
//! # Canonicalization rules
//!
//! 1. Object keys are sorted lexicographically (byte order).
//! 2. Arrays keep the order the caller built them in. Callers pre-sort data
//!    whose order has no meaning.
//! 3. Strings are JSON-escaped per RFC 8259 §7; non-ASCII passes through as
//!    UTF-8 and control characters become `\u00XX`.
//! 4. Integers (`i64` / `u64`) are written exactly.
//! 5. Floats are rounded to [`FLOAT_DIGITS`] decimal places (or fewer, per
//!    field override), trailing zeros and a trailing `.` are stripped, `-0`
//!    becomes `0`, and exponential notation is never produced.
//! 6. NaN and Infinity are rejected.
//! 7. `null`, `true`, `false` are written literally.
//!
//! Two renderings share these rules: the compact form ([`canonical_json_bytes`])
//! used for hashing and equivalence, and the pretty form
//! ([`canonical_json_pretty`]) used for files on disk (two-space indent, `\n`
//! line endings, one trailing newline).

use std::collections::BTreeMap;
use std::io::Write;

use serde_json::{Map, Number, Value};

/// Decimal places kept for floating-point numbers unless a field overrides it.
pub const FLOAT_DIGITS: u32 = 6;

/// Maximum nesting depth accepted by the serializer.
///
/// Owned JSON trees cannot contain cycles; runaway nesting is the only
/// unbounded shape left, so it is cut off here.
pub const MAX_DEPTH: usize = 64;

/// Error type for canonical JSON serialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonError {
    /// A float was NaN or infinite.
    #[error("non-finite number in canonical JSON at {path}: {raw}")]
    NonFiniteNumber { path: String, raw: String },
    /// Two entries of one object normalize to the same key.
    #[error("key collision in canonical JSON object at {path}: {key:?}")]
    KeyCollision { path: String, key: String },
    /// Nesting deeper than [`MAX_DEPTH`].
    #[error("canonical JSON nesting exceeds {max} levels at {path}")]
    DepthExceeded { path: String, max: usize },
    /// A per-field precision override asked for more digits than the default.
    #[error("precision override for {field:?} asks for {digits} digits, maximum is {max}")]
    PrecisionOverride { field: String, digits: u32, max: u32 },
}

/// Per-field-class float precision.
///
/// A float takes the digit count registered for the nearest enclosing object
/// key, falling back to [`FLOAT_DIGITS`]. Overrides may only lower precision:
/// a value rounded to fewer digits re-renders identically at the default,
/// which is what lets a verifier re-canonicalize documents without knowing
/// the producer's overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalOptions {
    field_digits: BTreeMap<String, u32>,
}

impl CanonicalOptions {
    /// Register a precision for every float found under `field`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonError::PrecisionOverride`] if `digits` exceeds
    /// [`FLOAT_DIGITS`].
    pub fn with_field_digits(mut self, field: &str, digits: u32) -> Result<Self, CanonError> {
        if digits > FLOAT_DIGITS {
            return Err(CanonError::PrecisionOverride {
                field: field.to_string(),
                digits,
                max: FLOAT_DIGITS,
            });
        }
        self.field_digits.insert(field.to_string(), digits);
        Ok(self)
    }

    fn digits_for(&self, field: Option<&str>) -> u32 {
        field
            .and_then(|f| self.field_digits.get(f).copied())
            .unwrap_or(FLOAT_DIGITS)
    }
}

/// Produce compact canonical JSON bytes from a `serde_json::Value`.
///
/// # Errors
///
/// Returns [`CanonError`] for non-finite numbers or excessive nesting.
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>, CanonError> {
    canonical_json_bytes_with(value, &CanonicalOptions::default())
}

/// Compact canonical JSON with explicit precision options.
///
/// # Errors
///
/// Returns [`CanonError`] for non-finite numbers or excessive nesting.
pub fn canonical_json_bytes_with(
    value: &Value,
    options: &CanonicalOptions,
) -> Result<Vec<u8>, CanonError> {
    let mut writer = CanonWriter::new(options, false);
    writer.write_value(value, None, "$", 0)?;
    Ok(writer.buf)
}

/// Produce pretty canonical JSON bytes (two-space indent, trailing `\n`).
///
/// # Errors
///
/// Returns [`CanonError`] for non-finite numbers or excessive nesting.
pub fn canonical_json_pretty(value: &Value) -> Result<Vec<u8>, CanonError> {
    canonical_json_pretty_with(value, &CanonicalOptions::default())
}

/// Pretty canonical JSON with explicit precision options.
///
/// # Errors
///
/// Returns [`CanonError`] for non-finite numbers or excessive nesting.
pub fn canonical_json_pretty_with(
    value: &Value,
    options: &CanonicalOptions,
) -> Result<Vec<u8>, CanonError> {
    let mut writer = CanonWriter::new(options, true);
    writer.write_value(value, None, "$", 0)?;
    writer.buf.push(b'\n');
    Ok(writer.buf)
}

/// Whether `bytes` are already in pretty canonical form (parse, re-render, compare).
#[must_use]
pub fn is_canonical_pretty(bytes: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
        return false;
    };
    canonical_json_pretty(&value).is_ok_and(|rendered| rendered == bytes)
}

/// Insert one entry into an object under construction at `path`,
/// rejecting duplicate keys.
///
/// `serde_json::Map::insert` silently replaces an existing entry; evidence
/// documents must never lose one that way.
///
/// # Errors
///
/// Returns [`CanonError::KeyCollision`] if `key` is already present; the map
/// is left unchanged.
pub fn insert_unique(
    map: &mut Map<String, Value>,
    path: &str,
    key: String,
    value: Value,
) -> Result<(), CanonError> {
    if map.contains_key(&key) {
        return Err(CanonError::KeyCollision {
            path: path.into(),
            key,
        });
    }
    map.insert(key, value);
    Ok(())
}

/// Convert a float into a JSON number, rejecting NaN and Infinity.
///
/// `serde_json` quietly maps non-finite floats to `null`; use this at every
/// boundary where a float enters an evidence document.
///
/// # Errors
///
/// Returns [`CanonError::NonFiniteNumber`] for NaN or infinite input.
pub fn float_value(value: f64) -> Result<Value, CanonError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| CanonError::NonFiniteNumber {
            path: "$".into(),
            raw: value.to_string(),
        })
}

/// Render a float with the fixed-precision policy.
#[must_use]
pub fn format_float(value: f64, digits: u32) -> String {
    let mut s = format!("{value:.prec$}", prec = digits as usize);
    if s.contains('.') {
        let trimmed = s.trim_end_matches('0').trim_end_matches('.').len();
        s.truncate(trimmed);
    }
    if s == "-0" {
        s = "0".into();
    }
    s
}

struct CanonWriter<'a> {
    buf: Vec<u8>,
    options: &'a CanonicalOptions,
    pretty: bool,
}

impl<'a> CanonWriter<'a> {
    fn new(options: &'a CanonicalOptions, pretty: bool) -> Self {
        Self {
            buf: Vec::new(),
            options,
            pretty,
        }
    }

    fn write_value(
        &mut self,
        value: &Value,
        field: Option<&str>,
        path: &str,
        depth: usize,
    ) -> Result<(), CanonError> {
        if depth > MAX_DEPTH {
            return Err(CanonError::DepthExceeded {
                path: path.to_string(),
                max: MAX_DEPTH,
            });
        }
        match value {
            Value::Null => self.buf.extend_from_slice(b"null"),
            Value::Bool(true) => self.buf.extend_from_slice(b"true"),
            Value::Bool(false) => self.buf.extend_from_slice(b"false"),
            Value::Number(n) => self.write_number(n, field, path)?,
            Value::String(s) => write_string(&mut self.buf, s),
            Value::Array(items) => {
                if items.is_empty() {
                    self.buf.extend_from_slice(b"[]");
                    return Ok(());
                }
                self.buf.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.buf.push(b',');
                    }
                    self.newline(depth + 1);
                    let item_path = format!("{path}[{i}]");
                    self.write_value(item, field, &item_path, depth + 1)?;
                }
                self.newline(depth);
                self.buf.push(b']');
            }
            Value::Object(map) => {
                if map.is_empty() {
                    self.buf.extend_from_slice(b"{}");
                    return Ok(());
                }
                // Sorted keys (lexicographic byte order).
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

                self.buf.push(b'{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        self.buf.push(b',');
                    }
                    self.newline(depth + 1);
                    write_string(&mut self.buf, key);
                    self.buf.push(b':');
                    if self.pretty {
                        self.buf.push(b' ');
                    }
                    let key_path = format!("{path}.{key}");
                    self.write_value(&map[*key], Some(key), &key_path, depth + 1)?;
                }
                self.newline(depth);
                self.buf.push(b'}');
            }
        }
        Ok(())
    }

    fn write_number(
        &mut self,
        n: &Number,
        field: Option<&str>,
        path: &str,
    ) -> Result<(), CanonError> {
        // Try i64 first (handles negatives), then u64 (handles large positives).
        if let Some(i) = n.as_i64() {
            let _ = write!(self.buf, "{i}");
        } else if let Some(u) = n.as_u64() {
            let _ = write!(self.buf, "{u}");
        } else {
            match n.as_f64() {
                Some(f) if f.is_finite() => {
                    let digits = self.options.digits_for(field);
                    self.buf.extend_from_slice(format_float(f, digits).as_bytes());
                }
                _ => {
                    return Err(CanonError::NonFiniteNumber {
                        path: path.to_string(),
                        raw: n.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn newline(&mut self, depth: usize) {
        if self.pretty {
            self.buf.push(b'\n');
            for _ in 0..depth {
                self.buf.extend_from_slice(b"  ");
            }
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            // Control characters U+0000..U+001F (except those handled above).
            c if c < '\u{0020}' => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => {
                let mut utf8_buf = [0u8; 4];
                let encoded = c.encode_utf8(&mut utf8_buf);
                buf.extend_from_slice(encoded.as_bytes());
            }
        }
    }
    buf.push(b'"');
}
