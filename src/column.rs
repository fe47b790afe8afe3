//! Column types and values carried by a row cell. The primary-key-eligible
//! types map onto the three key-ordering families; the rest ride along in
//! the row payload after the key.

use std::fmt;

use crate::error::{Error, Result};
use crate::page::{encode_bytes_key, encode_float_key, encode_int_key, KeyType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataType {
    Int,          // i64, SQL BIGINT-equivalent
    SmallInt,     // i16
    TinyInt,      // i8
    BigInt,       // i128
    Float,        // f32
    Double,       // f64, the 64-bit float family used for keys
    VarChar(u16), // length-prefixed text with a max length
    Text,         // length-prefixed, unbounded text
    Binary,       // length-prefixed raw bytes
    DateTime,
    Timestamp,
    Boolean, // forbidden as a primary key
}

impl DataType {
    /// The key-ordering family this type belongs to, or `None` if it's not
    /// a legal primary-key type (booleans, and the non-64-bit numeric
    /// types, which the spec's three comparator families don't cover).
    pub fn key_type(&self) -> Option<KeyType> {
        match self {
            DataType::Int => Some(KeyType::Int),
            DataType::Double => Some(KeyType::Float),
            DataType::Text => Some(KeyType::Text),
            DataType::VarChar(_) => Some(KeyType::Text),
            DataType::Binary => Some(KeyType::Binary),
            _ => None,
        }
    }

    pub fn is_variable_length(&self) -> bool {
        matches!(self, DataType::VarChar(_) | DataType::Text | DataType::Binary)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::SmallInt => write!(f, "SMALLINT"),
            DataType::TinyInt => write!(f, "TINYINT"),
            DataType::BigInt => write!(f, "BIGINT"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::VarChar(n) => write!(f, "VARCHAR({})", n),
            DataType::Text => write!(f, "TEXT"),
            DataType::Binary => write!(f, "BINARY"),
            DataType::DateTime => write!(f, "DATETIME"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    SmallInt(i16),
    TinyInt(i8),
    BigInt(i128),
    Float(f32),
    Double(f64),
    VarChar(Vec<u8>),
    Text(Vec<u8>),
    Binary(Vec<u8>),
    DateTime(i64),
    Timestamp(i64),
    Boolean(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::VarChar(b) | Value::Text(b) | Value::Binary(b) => {
                write!(f, "{}", String::from_utf8_lossy(b))
            }
            Value::DateTime(v) | Value::Timestamp(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
        }
    }
}

impl Value {
    /// Encodes this value as it appears in a row cell's payload: a
    /// 2-byte length prefix for variable-length types, fixed-width
    /// otherwise.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_le_bytes().to_vec(),
            Value::SmallInt(v) => v.to_le_bytes().to_vec(),
            Value::TinyInt(v) => v.to_le_bytes().to_vec(),
            Value::BigInt(v) => v.to_le_bytes().to_vec(),
            Value::Float(v) => v.to_le_bytes().to_vec(),
            Value::Double(v) => v.to_le_bytes().to_vec(),
            Value::DateTime(v) => v.to_le_bytes().to_vec(),
            Value::Timestamp(v) => v.to_le_bytes().to_vec(),
            Value::Boolean(v) => vec![*v as u8],
            Value::VarChar(b) | Value::Text(b) | Value::Binary(b) => {
                let mut out = Vec::with_capacity(2 + b.len());
                out.extend_from_slice(&(b.len() as u16).to_be_bytes());
                out.extend_from_slice(b);
                out
            }
        }
    }

    /// The number of bytes `encode` consumed from the front of `buf`.
    pub fn encoded_len(data_type: DataType, buf: &[u8]) -> Result<usize> {
        Ok(match data_type {
            DataType::Int | DataType::Double | DataType::DateTime | DataType::Timestamp => 8,
            DataType::SmallInt => 2,
            DataType::TinyInt | DataType::Boolean => 1,
            DataType::BigInt => 16,
            DataType::Float => 4,
            DataType::VarChar(_) | DataType::Text | DataType::Binary => {
                if buf.len() < 2 {
                    return Err(Error::Corruption("truncated variable-length column".into()));
                }
                2 + u16::from_be_bytes(buf[0..2].try_into().unwrap()) as usize
            }
        })
    }

    pub fn decode(data_type: DataType, buf: &[u8]) -> Result<Self> {
        let bad = || Error::Corruption(format!("truncated {} column", data_type));
        Ok(match data_type {
            DataType::Int => Value::Int(i64::from_le_bytes(buf.get(0..8).ok_or_else(bad)?.try_into().unwrap())),
            DataType::SmallInt => Value::SmallInt(i16::from_le_bytes(buf.get(0..2).ok_or_else(bad)?.try_into().unwrap())),
            DataType::TinyInt => Value::TinyInt(i8::from_le_bytes(buf.get(0..1).ok_or_else(bad)?.try_into().unwrap())),
            DataType::BigInt => Value::BigInt(i128::from_le_bytes(buf.get(0..16).ok_or_else(bad)?.try_into().unwrap())),
            DataType::Float => Value::Float(f32::from_le_bytes(buf.get(0..4).ok_or_else(bad)?.try_into().unwrap())),
            DataType::Double => Value::Double(f64::from_le_bytes(buf.get(0..8).ok_or_else(bad)?.try_into().unwrap())),
            DataType::DateTime => Value::DateTime(i64::from_le_bytes(buf.get(0..8).ok_or_else(bad)?.try_into().unwrap())),
            DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(buf.get(0..8).ok_or_else(bad)?.try_into().unwrap())),
            DataType::Boolean => Value::Boolean(*buf.first().ok_or_else(bad)? != 0),
            DataType::VarChar(_) | DataType::Text | DataType::Binary => {
                let len = Value::encoded_len(data_type, buf)? - 2;
                let bytes = buf.get(2..2 + len).ok_or_else(bad)?.to_vec();
                match data_type {
                    DataType::VarChar(_) => Value::VarChar(bytes),
                    DataType::Text => Value::Text(bytes),
                    _ => Value::Binary(bytes),
                }
            }
        })
    }

    /// Encodes this value as a *search key*, per the key-ordering families
    /// above. Only called on primary-key-eligible values.
    pub fn encode_key(&self) -> Result<Vec<u8>> {
        match self {
            Value::Int(v) => Ok(encode_int_key(*v).to_vec()),
            Value::Double(v) => Ok(encode_float_key(*v).to_vec()),
            Value::Text(b) | Value::VarChar(b) => Ok(encode_bytes_key(b)),
            Value::Binary(b) => Ok(encode_bytes_key(b)),
            other => Err(Error::Corruption(format!(
                "{:?} cannot be used as a primary key value",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_values_roundtrip() {
        let v = Value::Int(-42);
        let encoded = v.encode();
        assert_eq!(Value::decode(DataType::Int, &encoded).unwrap(), v);
    }

    #[test]
    fn variable_length_values_roundtrip() {
        let v = Value::Text(b"hello world".to_vec());
        let encoded = v.encode();
        assert_eq!(
            Value::encoded_len(DataType::Text, &encoded).unwrap(),
            encoded.len()
        );
        assert_eq!(Value::decode(DataType::Text, &encoded).unwrap(), v);
    }

    #[test]
    fn boolean_is_not_key_eligible() {
        assert_eq!(DataType::Boolean.key_type(), None);
    }
}
