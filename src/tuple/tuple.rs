use crate::common::{Result, StrataError};

use super::data_type::DataType;
use super::schema::Schema;
use super::value::Value;

/// A row of values. Serialized as a null bitmap followed by the non-null
/// column encodings in schema order:
///
/// - Boolean: 1 byte
/// - Integer: 4 bytes little-endian
/// - BigInt: 8 bytes little-endian
/// - Varchar: u16 length + bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    /// Concatenation for join output.
    pub fn concat(left: &Tuple, right: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Tuple::new(values)
    }

    pub fn to_bytes(&self, schema: &Schema) -> Result<Vec<u8>> {
        if self.values.len() != schema.column_count() {
            return Err(StrataError::Execution(format!(
                "tuple has {} values but the schema has {} columns",
                self.values.len(),
                schema.column_count()
            )));
        }

        let bitmap_len = (schema.column_count() + 7) / 8;
        let mut bytes = vec![0u8; bitmap_len];

        for (i, (value, column)) in self.values.iter().zip(schema.columns()).enumerate() {
            if value.is_null() {
                bytes[i / 8] |= 1 << (i % 8);
                continue;
            }
            match (value, column.data_type) {
                (Value::Boolean(v), DataType::Boolean) => bytes.push(u8::from(*v)),
                (Value::Integer(v), DataType::Integer) => bytes.extend(v.to_le_bytes()),
                (Value::BigInt(v), DataType::BigInt) => bytes.extend(v.to_le_bytes()),
                (Value::Varchar(v), DataType::Varchar(max)) => {
                    if v.len() > max as usize {
                        return Err(StrataError::Execution(format!(
                            "string of {} bytes exceeds VARCHAR({max})",
                            v.len()
                        )));
                    }
                    bytes.extend((v.len() as u16).to_le_bytes());
                    bytes.extend(v.as_bytes());
                }
                (value, data_type) => {
                    return Err(StrataError::Execution(format!(
                        "value {value} does not fit column type {data_type}"
                    )));
                }
            }
        }
        Ok(bytes)
    }

    pub fn from_bytes(schema: &Schema, bytes: &[u8]) -> Result<Tuple> {
        let bitmap_len = (schema.column_count() + 7) / 8;
        let corrupt = || StrataError::Execution("tuple bytes truncated".into());
        if bytes.len() < bitmap_len {
            return Err(corrupt());
        }

        let mut offset = bitmap_len;
        let mut values = Vec::with_capacity(schema.column_count());

        for (i, column) in schema.columns().iter().enumerate() {
            if bytes[i / 8] & (1 << (i % 8)) != 0 {
                values.push(Value::Null);
                continue;
            }
            match column.data_type {
                DataType::Boolean => {
                    let byte = *bytes.get(offset).ok_or_else(corrupt)?;
                    values.push(Value::Boolean(byte != 0));
                    offset += 1;
                }
                DataType::Integer => {
                    let raw = bytes.get(offset..offset + 4).ok_or_else(corrupt)?;
                    values.push(Value::Integer(i32::from_le_bytes(raw.try_into().unwrap())));
                    offset += 4;
                }
                DataType::BigInt => {
                    let raw = bytes.get(offset..offset + 8).ok_or_else(corrupt)?;
                    values.push(Value::BigInt(i64::from_le_bytes(raw.try_into().unwrap())));
                    offset += 8;
                }
                DataType::Varchar(_) => {
                    let raw = bytes.get(offset..offset + 2).ok_or_else(corrupt)?;
                    let len = u16::from_le_bytes(raw.try_into().unwrap()) as usize;
                    offset += 2;
                    let raw = bytes.get(offset..offset + len).ok_or_else(corrupt)?;
                    let text = std::str::from_utf8(raw)
                        .map_err(|_| StrataError::Execution("invalid utf-8 in tuple".into()))?;
                    values.push(Value::Varchar(text.to_string()));
                    offset += len;
                }
            }
        }
        Ok(Tuple::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::schema::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Varchar(16)),
            Column::new("active", DataType::Boolean),
            Column::new("score", DataType::BigInt),
        ])
    }

    #[test]
    fn test_roundtrip() {
        let schema = schema();
        let tuple = Tuple::new(vec![
            Value::Integer(7),
            Value::Varchar("alice".into()),
            Value::Boolean(true),
            Value::BigInt(-42),
        ]);

        let bytes = tuple.to_bytes(&schema).unwrap();
        let back = Tuple::from_bytes(&schema, &bytes).unwrap();
        assert_eq!(back, tuple);
    }

    #[test]
    fn test_null_bitmap() {
        let schema = schema();
        let tuple = Tuple::new(vec![
            Value::Integer(7),
            Value::Null,
            Value::Null,
            Value::BigInt(1),
        ]);

        let bytes = tuple.to_bytes(&schema).unwrap();
        let back = Tuple::from_bytes(&schema, &bytes).unwrap();
        assert!(back.value(1).is_null());
        assert!(back.value(2).is_null());
        assert_eq!(back.value(3), &Value::BigInt(1));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let schema = schema();
        let tuple = Tuple::new(vec![
            Value::Varchar("wrong".into()),
            Value::Varchar("x".into()),
            Value::Boolean(false),
            Value::BigInt(0),
        ]);
        assert!(tuple.to_bytes(&schema).is_err());
    }

    #[test]
    fn test_too_long_varchar_rejected() {
        let schema = Schema::new(vec![Column::new("s", DataType::Varchar(3))]);
        let tuple = Tuple::new(vec![Value::Varchar("abcd".into())]);
        assert!(tuple.to_bytes(&schema).is_err());
    }

    #[test]
    fn test_concat() {
        let joined = Tuple::concat(
            &Tuple::new(vec![Value::Integer(1)]),
            &Tuple::new(vec![Value::Varchar("x".into())]),
        );
        assert_eq!(joined.column_count(), 2);
        assert_eq!(joined.value(0), &Value::Integer(1));
    }
}
