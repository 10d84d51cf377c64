use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::TypesError;
use crate::pointer::Pointer;

/// Host-side representation of a value living (or about to live) in guest
/// memory.
///
/// The variant set is closed: every marshaling site matches exhaustively.
/// Object references are carried by origin, never by guest pointer.
/// The borsh encoding is tag-prefixed, so an encoded value is
/// self-describing.
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Value {
    Null,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Set(Vec<Value>),
    /// Key/value pairs in insertion order.
    Map(Vec<(Value, Value)>),
    /// Plain object fields in declaration order.
    Object(Vec<Value>),
    /// Reference to an object by origin.
    Jig(Pointer),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Jig(_) => "jig",
        }
    }

    /// Widen any unsigned integer variant to u64.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::U16(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_jig(&self) -> Option<Pointer> {
        match self {
            Value::Jig(origin) => Some(*origin),
            _ => None,
        }
    }
}

/// Encode an ordered list of field values (an object's state blob).
pub fn encode_values(values: &[Value]) -> Result<Vec<u8>, TypesError> {
    borsh::to_vec(values).map_err(TypesError::encode)
}

/// Decode a state blob produced by [`encode_values`].
pub fn decode_values(bytes: &[u8]) -> Result<Vec<Value>, TypesError> {
    Vec::<Value>::try_from_slice(bytes).map_err(TypesError::decode)
}
