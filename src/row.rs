//! Row cell encode/decode: primary key bytes followed by the remaining
//! column values in column order.

use crate::catalog::TableInfo;
use crate::column::Value;
use crate::error::{Error, Result};

/// A decoded row: the primary key value plus one value per non-key column,
/// in catalog column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: Value,
    pub columns: Vec<Value>,
}

impl Row {
    /// Builds the leaf cell payload: key bytes (used as the cell's search
    /// key) followed by each column's encoded bytes in order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = self.key.encode_key()?;
        for value in &self.columns {
            out.extend_from_slice(&value.encode());
        }
        Ok(out)
    }

    /// Just the search-key prefix of an already-encoded row cell, given
    /// the primary key's data type (needed to know the prefix length).
    pub fn key_bytes(table: &TableInfo, payload: &[u8]) -> Result<Vec<u8>> {
        let len = key_prefix_len(table, payload)?;
        Ok(payload[..len].to_vec())
    }

    pub fn decode(table: &TableInfo, payload: &[u8]) -> Result<Self> {
        let key_len = key_prefix_len(table, payload)?;
        let key = Value::decode(table.pk_data_type, &payload[..key_len])?;

        let mut columns = Vec::with_capacity(table.columns.len());
        let mut offset = key_len;
        for col in &table.columns {
            let remaining = &payload[offset..];
            let len = Value::encoded_len(col.data_type, remaining)?;
            if len > remaining.len() {
                return Err(Error::Corruption(format!(
                    "row cell truncated at column '{}'",
                    col.name
                )));
            }
            columns.push(Value::decode(col.data_type, remaining)?);
            offset += len;
        }

        Ok(Row { key, columns })
    }
}

fn key_prefix_len(table: &TableInfo, payload: &[u8]) -> Result<usize> {
    Value::encoded_len(table.pk_data_type, payload)
}
