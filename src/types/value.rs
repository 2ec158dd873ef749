use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Integer,
    Number,
    Text,
    Binary,
}

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
    /// Text whose stored bytes are not valid UTF-8, kept verbatim.
    TextBytes(Vec<u8>),
    Binary(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Integer(_) => DataType::Integer,
            Value::Number(_) => DataType::Number,
            Value::Text(_) | Value::TextBytes(_) => DataType::Text,
            Value::Binary(_) => DataType::Binary,
        }
    }

    /// Byte length of text/binary payloads; zero for everything else.
    pub fn bytes(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::TextBytes(b) | Value::Binary(b) => b.len(),
            _ => 0,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value. Numbers truncate toward zero, text is read
    /// up to its first non-numeric character.
    pub fn as_integer64(&self) -> i64 {
        match self {
            Value::Integer(i) => *i,
            Value::Number(n) => *n as i64,
            Value::Text(s) => parse_leading_integer(s),
            Value::TextBytes(b) => parse_leading_integer(&String::from_utf8_lossy(b)),
            _ => 0,
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Integer(i) => *i as f64,
            Value::Number(n) => *n,
            Value::Text(s) => parse_leading_number(s),
            Value::TextBytes(b) => parse_leading_number(&String::from_utf8_lossy(b)),
            _ => 0.0,
        }
    }

    /// UTF-8 view of a text value. Text with invalid bytes has none; see
    /// [`Value::as_text_bytes`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(s) => Some(s.as_bytes()),
            Value::TextBytes(b) => Some(b),
            _ => None,
        }
    }

    /// Text value from stored bytes, valid UTF-8 or not.
    pub fn text_from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::TextBytes(bytes.to_vec()),
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Number(n) => ToSqlOutput::Borrowed(ValueRef::Real(*n)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::TextBytes(b) => ToSqlOutput::Borrowed(ValueRef::Text(b)),
            Value::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(n) => Value::Number(n),
            ValueRef::Text(t) => Value::text_from_bytes(t),
            ValueRef::Blob(b) => Value::Binary(b.to_vec()),
        }
    }
}

fn numeric_prefix(text: &str, allow_fraction: bool) -> &str {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {}
            b'.' if allow_fraction && !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if allow_fraction && !seen_exp && end > 0 => {
                seen_exp = true;
                if end + 1 < bytes.len() && (bytes[end + 1] == b'+' || bytes[end + 1] == b'-') {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    &trimmed[..end]
}

/// Reads the longest leading integer of `text`, the way C's `atol` does.
pub fn parse_leading_integer(text: &str) -> i64 {
    let prefix = numeric_prefix(text, false);
    let (negative, digits) = match prefix.as_bytes().first() {
        Some(b'-') => (true, &prefix[1..]),
        Some(b'+') => (false, &prefix[1..]),
        _ => (false, prefix),
    };
    let mut out: i64 = 0;
    for digit in digits.bytes() {
        out = out.wrapping_mul(10).wrapping_add((digit - b'0') as i64);
    }
    if negative { out.wrapping_neg() } else { out }
}

/// Reads the longest leading float of `text`, the way C's `atof` does.
pub fn parse_leading_number(text: &str) -> f64 {
    let mut prefix = numeric_prefix(text, true);
    while !prefix.is_empty() {
        if let Ok(value) = prefix.parse::<f64>() {
            return value;
        }
        prefix = &prefix[..prefix.len() - 1];
    }
    0.0
}
