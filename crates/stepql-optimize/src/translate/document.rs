use serde_json::{json, Map, Value};

use stepql_core::condition::Connective;
use stepql_core::types::Scalar;

use super::{FilterDialect, FilterOp, Operand};
use crate::error::OptimizationError;

/// JSON query documents in the `$and`/`$or`/`$gt` style.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentDialect;

fn to_json(v: &Scalar) -> Value {
    match v {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::I32(i) => json!(i),
        Scalar::I64(i) => json!(i),
        Scalar::F32(f) => json!(f),
        Scalar::F64(f) => json!(f),
        Scalar::Str(_) | Scalar::Bin(_) => Value::String(v.render()),
    }
}

/// SQL `LIKE` pattern → anchored regular expression.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c if "\\.^$|?*+()[]{}".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

impl FilterDialect for DocumentDialect {
    type Fragment = Value;

    fn predicate(&self, field: &str, op: FilterOp, operand: &Operand) -> Result<Value, OptimizationError> {
        let condition = match (op, operand) {
            (FilterOp::IsNull, _) => json!({ "$eq": null }),
            (FilterOp::IsNotNull, _) => json!({ "$ne": null }),
            (FilterOp::In, Operand::Many(vs)) => {
                json!({ "$in": vs.iter().map(to_json).collect::<Vec<_>>() })
            }
            (FilterOp::NotIn, Operand::Many(vs)) => {
                json!({ "$nin": vs.iter().map(to_json).collect::<Vec<_>>() })
            }
            (FilterOp::Eq, Operand::One(v)) => to_json(v),
            (FilterOp::Like, Operand::One(v)) => json!({ "$regex": like_to_regex(&v.render()) }),
            (op, Operand::One(v)) => {
                let key = match op {
                    FilterOp::Ne => "$ne",
                    FilterOp::Lt => "$lt",
                    FilterOp::Le => "$lte",
                    FilterOp::Gt => "$gt",
                    FilterOp::Ge => "$gte",
                    other => {
                        return Err(OptimizationError::Translation(format!(
                            "{:?} needs a list operand",
                            other
                        )))
                    }
                };
                let mut m = Map::new();
                m.insert(key.to_string(), to_json(v));
                Value::Object(m)
            }
            (op, _) => {
                return Err(OptimizationError::Translation(format!(
                    "operand does not fit {:?} on '{}'",
                    op, field
                )))
            }
        };
        let mut doc = Map::new();
        doc.insert(field.to_string(), condition);
        Ok(Value::Object(doc))
    }

    fn group(&self, connective: Connective, parts: Vec<Value>) -> Value {
        let key = if connective == Connective::Or { "$or" } else { "$and" };
        let mut doc = Map::new();
        doc.insert(key.to_string(), Value::Array(parts));
        Value::Object(doc)
    }

    fn render(&self, fragment: Value) -> Result<String, OptimizationError> {
        serde_json::to_string(&fragment)
            .map_err(|e| OptimizationError::Translation(e.to_string()))
    }
}
