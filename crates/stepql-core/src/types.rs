//! Lightweight logical values and rows.
//!
//! Rows are row-major (`Vec<Scalar>`) because the bridge, observer and
//! replayer all move one row at a time.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataType::Boolean),
            Scalar::I32(_) => Some(DataType::Int32),
            Scalar::I64(_) => Some(DataType::Int64),
            Scalar::F32(_) => Some(DataType::Float32),
            Scalar::F64(_) => Some(DataType::Float64),
            Scalar::Str(_) => Some(DataType::Utf8),
            Scalar::Bin(_) => Some(DataType::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// True if this value can live in a field of type `dt`. Null fits anywhere.
    pub fn conforms_to(&self, dt: DataType) -> bool {
        match self.data_type() {
            None => true,
            Some(own) => own == dt,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I32(v) => Some(*v as f64),
            Scalar::I64(v) => Some(*v as f64),
            Scalar::F32(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I32(v) => Some(*v as i64),
            Scalar::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Plain textual form, used for parameter values and variable substitution.
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::I32(v) => v.to_string(),
            Scalar::I64(v) => v.to_string(),
            Scalar::F32(v) => v.to_string(),
            Scalar::F64(v) => v.to_string(),
            Scalar::Str(s) => s.clone(),
            Scalar::Bin(b) => {
                let mut s = String::with_capacity(b.len() * 2);
                for byte in b {
                    use std::fmt::Write as _;
                    let _ = write!(&mut s, "{:02x}", byte);
                }
                s
            }
        }
    }

    /// Parse `text` as a value of type `dt`.
    pub fn parse_as(text: &str, dt: DataType) -> Result<Scalar> {
        let t = text.trim();
        let bad = || Error::Row(format!("cannot convert '{}' to {}", t, dt));
        Ok(match dt {
            DataType::Boolean => match t.to_ascii_lowercase().as_str() {
                "true" | "y" | "yes" | "1" => Scalar::Bool(true),
                "false" | "n" | "no" | "0" => Scalar::Bool(false),
                _ => return Err(bad()),
            },
            DataType::Int32 => Scalar::I32(t.parse().map_err(|_| bad())?),
            DataType::Int64 => Scalar::I64(t.parse().map_err(|_| bad())?),
            DataType::Float32 => Scalar::F32(t.parse().map_err(|_| bad())?),
            DataType::Float64 => Scalar::F64(t.parse().map_err(|_| bad())?),
            DataType::Utf8 => Scalar::Str(text.to_string()),
            DataType::Binary => Scalar::Bin(text.as_bytes().to_vec()),
        })
    }

    /// Convert a JSON value into a scalar, coercing towards `dt` where the
    /// conversion is lossless. Values that cannot be coerced keep their
    /// natural type, so a drifting source surfaces later as a row error.
    pub fn from_json(value: &serde_json::Value, dt: DataType) -> Scalar {
        use serde_json::Value;
        match (value, dt) {
            (Value::Null, _) => Scalar::Null,
            (Value::Bool(b), _) => Scalar::Bool(*b),
            (Value::Number(n), DataType::Int32) => match n.as_i64() {
                Some(v) if i32::try_from(v).is_ok() => Scalar::I32(v as i32),
                _ => natural_number(n),
            },
            (Value::Number(n), DataType::Int64) => match n.as_i64() {
                Some(v) => Scalar::I64(v),
                None => natural_number(n),
            },
            (Value::Number(n), DataType::Float32) => {
                n.as_f64().map(|v| Scalar::F32(v as f32)).unwrap_or(Scalar::Null)
            }
            (Value::Number(n), DataType::Float64) => {
                n.as_f64().map(Scalar::F64).unwrap_or(Scalar::Null)
            }
            (Value::Number(n), DataType::Utf8) => Scalar::Str(n.to_string()),
            (Value::Number(n), _) => natural_number(n),
            (Value::String(s), DataType::Utf8) => Scalar::Str(s.clone()),
            (Value::String(s), DataType::Binary) => Scalar::Bin(s.as_bytes().to_vec()),
            (Value::String(s), _) => Scalar::Str(s.clone()),
            (other, _) => Scalar::Str(other.to_string()),
        }
    }

    /// Partial comparison used by condition evaluation.
    ///
    /// Numbers compare across widths; strings, booleans and bytes compare with
    /// their own kind. Anything involving null, or mixing kinds, is unordered.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Bin(a), Bin(b)) => Some(a.cmp(b)),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => {
                    let a = self.as_f64()?;
                    let b = other.as_f64()?;
                    a.partial_cmp(&b)
                }
            },
        }
    }

    /// Total order used for sorting: nulls first, then by kind, then by value.
    pub fn sort_cmp(&self, other: &Scalar) -> Ordering {
        scalar_cmp(self, other)
    }
}

fn natural_number(n: &serde_json::Number) -> Scalar {
    if let Some(v) = n.as_i64() {
        Scalar::I64(v)
    } else {
        Scalar::F64(n.as_f64().unwrap_or(0.0))
    }
}

impl fmt::Display for Scalar {
    /// SQL literal form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("NULL"),
            Scalar::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
            other => f.write_str(&other.render()),
        }
    }
}

/// One row of values, ordered like the schema that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Scalar>,
}

impl Row {
    pub fn new(values: Vec<Scalar>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self { values: vec![] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }
}

impl From<Vec<Scalar>> for Row {
    fn from(values: Vec<Scalar>) -> Self {
        Row::new(values)
    }
}

/// Compare two scalars for sorting.
///
/// Nulls are sorted first, then values are compared by type.
fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(x), I32(y)) => x.cmp(y),
        (I64(x), I64(y)) => x.cmp(y),
        (F32(x), F32(y)) => float_cmp(*x as f64, *y as f64),
        (F64(x), F64(y)) => float_cmp(*x, *y),
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        // Mixed numerics compare by value; other mixes by variant order
        _ => match a.compare(b) {
            Some(ord) => ord,
            None => scalar_type_order(a).cmp(&scalar_type_order(b)),
        },
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    if x.is_nan() && y.is_nan() {
        Ordering::Equal
    } else if x.is_nan() {
        Ordering::Greater
    } else if y.is_nan() {
        Ordering::Less
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

/// Assign a numeric order to scalar types for mixed-type comparisons.
fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) => 2,
        I64(_) => 3,
        F32(_) => 4,
        F64(_) => 5,
        Str(_) => 6,
        Bin(_) => 7,
    }
}
