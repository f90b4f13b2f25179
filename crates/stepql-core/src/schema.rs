//! Logical schema types. Pure data.
//!
//! `Schema::clone_row` is the one place rows get deep-copied across pipeline
//! boundaries, so it also validates the row against the declared fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{Row, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Boolean => "Boolean",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Utf8 => "Utf8",
            DataType::Binary => "Binary",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self { fields: vec![] }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Like `index_of`, but a missing field is a schema error.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::Schema(format!("field '{}' not found", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Deep-copy `row`, checking it against this schema.
    ///
    /// Fails when the arity differs or a non-null value does not have the
    /// field's declared type. Callers treat the failure as fatal for the row.
    pub fn clone_row(&self, row: &Row) -> Result<Row> {
        if row.len() != self.fields.len() {
            return Err(Error::Row(format!(
                "cannot clone row with {} values against {} fields",
                row.len(),
                self.fields.len()
            )));
        }
        let mut values = Vec::with_capacity(row.len());
        for (field, value) in self.fields.iter().zip(row.values.iter()) {
            if !value.conforms_to(field.data_type) {
                return Err(Error::Row(format!(
                    "cannot clone value {:?} into field '{}' of type {}",
                    value, field.name, field.data_type
                )));
            }
            if value.is_null() && !field.nullable {
                return Err(Error::Row(format!(
                    "null value in non-nullable field '{}'",
                    field.name
                )));
            }
            values.push(value.clone());
        }
        Ok(Row::new(values))
    }
}
