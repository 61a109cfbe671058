//! Scalar values produced by query engines and their display form.

use std::fmt;

/// A single decoded cell as handed over by a [`crate::engine::RowCursor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Format a value for output.
///
/// Absent values become the literal `NULL`, binary values are shown as their
/// raw (lossily decoded) text, everything else uses its `Display` form.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Format a whole row, one string per column.
pub fn format_row(values: &[Value]) -> Vec<String> {
    values.iter().map(format_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_literal() {
        assert_eq!(format_value(&Value::Null), "NULL");
    }

    #[test]
    fn test_bytes_are_decoded_as_text() {
        assert_eq!(format_value(&Value::Bytes(b"abc".to_vec())), "abc");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let s = format_value(&Value::Bytes(vec![b'a', 0xff]));
        assert!(s.starts_with('a'));
        assert_eq!(s.chars().count(), 2);
    }

    #[test]
    fn test_scalars_use_display() {
        assert_eq!(format_value(&Value::Int(-42)), "-42");
        assert_eq!(format_value(&Value::Float(1.5)), "1.5");
        assert_eq!(format_value(&Value::Bool(true)), "true");
        assert_eq!(format_value(&Value::Text("x y".into())), "x y");
    }

    #[test]
    fn test_format_row_keeps_order() {
        let row = vec![Value::Int(1), Value::Null, Value::from("z")];
        assert_eq!(format_row(&row), vec!["1", "NULL", "z"]);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
    }
}
