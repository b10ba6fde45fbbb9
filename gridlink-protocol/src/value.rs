//! Dynamic record model for schema-driven marshalling.
//!
//! The engine walks a `Value` tree instead of raw memory: pointer-ness lives
//! in the schema, so a NULL pointer is `Value::Null` and a non-null pointer
//! field holds its pointee directly.

/// A native record value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// NULL pointer, or an intentionally zero-filled scalar slot.
    #[default]
    Null,
    Int(i32),
    Int16(i16),
    /// The 64-bit "wide" field (`double` in instruction text).
    Long(i64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Ordered fields of a record, in schema order.
    Struct(Vec<(String, Value)>),
}

impl Value {
    /// Builds a struct value from field pairs.
    pub fn record<N: Into<String>>(fields: impl IntoIterator<Item = (N, Value)>) -> Value {
        Value::Struct(fields.into_iter().map(|(n, v)| (n.into(), v)).collect())
    }

    /// Convenience for string values.
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// Looks up a struct field by name (first match).
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int16(&self) -> Option<i16> {
        match self {
            Value::Int16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}
