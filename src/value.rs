//! Column values and their SQL literal encoding.
//!
//! Every column carries a declared database type name (`BIGINT UNSIGNED`,
//! `VARCHAR`, `JSON`, ...). The name resolves to one [`TypeCategory`], and the
//! category alone decides how a [`SqlValue`] is rendered as a literal.
//!
//! ```
//! use rsdump::value::{encode_value, SqlValue};
//!
//! let literal = encode_value(&SqlValue::from("O'Brien"), "VARCHAR").unwrap();
//! assert_eq!(literal, "'O''Brien'");
//! ```

use std::borrow::Cow;
use std::fmt::{self, Write};

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{DumpError, DumpResult};

/// Literal emitted for an absent value, whatever the column type.
pub const NULL_LITERAL: &str = "NULL";

/// The closed set of column type categories the encoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Date,
    DateTime,
    Time,
    Year,
    Text,
    Binary,
    Enum,
    Boolean,
    Json,
}

impl TypeCategory {
    /// Resolve a declared database type name.
    ///
    /// The `UNSIGNED` modifier and any length suffix are ignored, so
    /// `"BIGINT UNSIGNED"` and `"varchar(64)"` resolve like `"BIGINT"` and
    /// `"VARCHAR"`.
    pub fn from_type_name(name: &str) -> DumpResult<Self> {
        let base = name.split('(').next().unwrap_or_default();
        let normalized: String = base
            .to_ascii_uppercase()
            .replace("UNSIGNED", "")
            .replace("ZEROFILL", "")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let category = match normalized.as_str() {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => Self::Integer,
            "FLOAT" | "DOUBLE" | "REAL" => Self::Float,
            "DECIMAL" | "DEC" | "NUMERIC" => Self::Decimal,
            "DATE" => Self::Date,
            "DATETIME" | "TIMESTAMP" => Self::DateTime,
            "TIME" => Self::Time,
            "YEAR" => Self::Year,
            "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" => Self::Text,
            "BIT" | "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                Self::Binary
            }
            "ENUM" | "SET" => Self::Enum,
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "JSON" => Self::Json,
            _ => return Err(DumpError::UnsupportedType(name.trim().to_string())),
        };

        Ok(category)
    }

    /// Canonical upper-case name of the category.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Decimal => "DECIMAL",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Time => "TIME",
            Self::Year => "YEAR",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Enum => "ENUM",
            Self::Boolean => "BOOLEAN",
            Self::Json => "JSON",
        }
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column value as read from the source database.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Exact decimal in the driver's canonical string form.
    Decimal(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short description of the runtime representation, used in errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Int(_) => "integer",
            SqlValue::UInt(_) => "unsigned integer",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Date(_) => "date",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Bool(_) => "boolean",
        }
    }
}

/// Encode a value for a column declared with `type_name`.
///
/// NULL short-circuits before the type name is looked at, so a NULL in a
/// column of unknown type still encodes.
pub fn encode_value(value: &SqlValue, type_name: &str) -> DumpResult<String> {
    if value.is_null() {
        return Ok(NULL_LITERAL.to_string());
    }
    let category = TypeCategory::from_type_name(type_name)?;
    encode_literal(value, category)
}

/// Encode a value as a SQL literal according to its category.
pub fn encode_literal(value: &SqlValue, category: TypeCategory) -> DumpResult<String> {
    let mismatch = || DumpError::mismatch(category, value.kind_name());

    let literal = match (category, value) {
        (_, SqlValue::Null) => NULL_LITERAL.to_string(),

        (TypeCategory::Integer, SqlValue::Int(n)) => n.to_string(),
        (TypeCategory::Integer, SqlValue::UInt(n)) => n.to_string(),
        (TypeCategory::Integer, SqlValue::Bool(b)) => u8::from(*b).to_string(),
        (TypeCategory::Integer, _) => {
            let text = text_of(value, category)?;
            if !is_integer_text(&text) {
                return Err(mismatch());
            }
            text.into_owned()
        }

        (TypeCategory::Float, SqlValue::Float(f)) => {
            if !f.is_finite() {
                return Err(mismatch());
            }
            // f64's Display never switches to exponent notation.
            f.to_string()
        }
        (TypeCategory::Float, SqlValue::Int(n)) => n.to_string(),
        (TypeCategory::Float, SqlValue::UInt(n)) => n.to_string(),
        (TypeCategory::Float, _) => {
            let text = text_of(value, category)?;
            match text.parse::<f64>() {
                Ok(f) if !f.is_finite() => return Err(mismatch()),
                Ok(f) if text.contains(['e', 'E']) => f.to_string(),
                Ok(_) => text.into_owned(),
                Err(_) => return Err(mismatch()),
            }
        }

        (TypeCategory::Decimal, SqlValue::Int(n)) => n.to_string(),
        (TypeCategory::Decimal, SqlValue::UInt(n)) => n.to_string(),
        (TypeCategory::Decimal, SqlValue::Decimal(d)) | (TypeCategory::Decimal, SqlValue::Text(d)) => {
            if !is_decimal_text(d) {
                return Err(mismatch());
            }
            d.clone()
        }

        (TypeCategory::Date, SqlValue::Date(d)) => d.format("'%Y-%m-%d'").to_string(),
        (TypeCategory::DateTime, SqlValue::DateTime(dt)) => {
            dt.format("'%Y-%m-%d %H:%M:%S'").to_string()
        }

        (TypeCategory::Time, _) => quote(&text_of(value, category)?),
        (TypeCategory::Year, SqlValue::Int(n)) => n.to_string(),
        (TypeCategory::Year, SqlValue::UInt(n)) => n.to_string(),
        (TypeCategory::Year, _) => text_of(value, category)?.into_owned(),

        (TypeCategory::Text, _) | (TypeCategory::Json, _) => {
            quote(&escape_quotes(&text_of(value, category)?))
        }
        (TypeCategory::Enum, _) => quote(&text_of(value, category)?),

        (TypeCategory::Binary, SqlValue::Bytes(bytes)) => hex_literal(bytes),
        (TypeCategory::Binary, SqlValue::Text(s)) => hex_literal(s.as_bytes()),

        (TypeCategory::Boolean, SqlValue::Bool(b)) => b.to_string(),
        (TypeCategory::Boolean, SqlValue::Int(n)) => (*n != 0).to_string(),
        (TypeCategory::Boolean, SqlValue::UInt(n)) => (*n != 0).to_string(),

        _ => return Err(mismatch()),
    };

    Ok(literal)
}

/// Textual view of a text-like value; bytes must be valid UTF-8.
fn text_of(value: &SqlValue, category: TypeCategory) -> DumpResult<Cow<'_, str>> {
    match value {
        SqlValue::Text(s) | SqlValue::Decimal(s) => Ok(Cow::Borrowed(s)),
        SqlValue::Bytes(bytes) => std::str::from_utf8(bytes)
            .map(Cow::Borrowed)
            .map_err(|_| DumpError::mismatch(category, "non-UTF-8 bytes")),
        other => Err(DumpError::mismatch(category, other.kind_name())),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text)
}

/// Double every single quote. No other character is escaped.
pub fn escape_quotes(text: &str) -> Cow<'_, str> {
    if text.contains('\'') {
        Cow::Owned(text.replace('\'', "''"))
    } else {
        Cow::Borrowed(text)
    }
}

/// `0x`-prefixed upper-case hex literal. Empty input becomes `''`.
fn hex_literal(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "''".to_string();
    }
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

fn is_integer_text(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal_text(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    let mut seen_digit = false;
    let mut seen_point = false;
    for b in digits.bytes() {
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_point => seen_point = true,
            _ => return false,
        }
    }
    seen_digit
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}
