use stepql_core::condition::Connective;
use stepql_core::types::Scalar;

use super::{FilterDialect, FilterOp, Operand};
use crate::error::OptimizationError;

/// SQL `WHERE` text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlDialect;

fn list(values: &[Scalar]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl FilterDialect for SqlDialect {
    type Fragment = String;

    fn predicate(&self, field: &str, op: FilterOp, operand: &Operand) -> Result<String, OptimizationError> {
        let text = match (op, operand) {
            (FilterOp::IsNull, _) => format!("{} IS NULL", field),
            (FilterOp::IsNotNull, _) => format!("{} IS NOT NULL", field),
            (FilterOp::In, Operand::Many(vs)) => format!("{} IN ({})", field, list(vs)),
            (FilterOp::NotIn, Operand::Many(vs)) => format!("{} NOT IN ({})", field, list(vs)),
            (op, Operand::One(v)) => {
                let sym = match op {
                    FilterOp::Eq => "=",
                    FilterOp::Ne => "<>",
                    FilterOp::Lt => "<",
                    FilterOp::Le => "<=",
                    FilterOp::Gt => ">",
                    FilterOp::Ge => ">=",
                    FilterOp::Like => "LIKE",
                    other => {
                        return Err(OptimizationError::Translation(format!(
                            "{:?} needs a list operand",
                            other
                        )))
                    }
                };
                format!("{} {} {}", field, sym, v)
            }
            (op, _) => {
                return Err(OptimizationError::Translation(format!(
                    "operand does not fit {:?} on '{}'",
                    op, field
                )))
            }
        };
        Ok(text)
    }

    fn group(&self, connective: Connective, parts: Vec<String>) -> String {
        format!("({})", parts.join(&format!(" {} ", connective.sql())))
    }

    fn render(&self, fragment: String) -> Result<String, OptimizationError> {
        Ok(fragment)
    }
}
