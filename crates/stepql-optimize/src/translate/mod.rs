//! Condition translation: render a query condition in a backend's own filter
//! language and hand it to the source step as a variable.
//!
//! Grouping comes from the connective of the second child of a composite
//! (all later children must agree). Negated atomics are rewritten with the
//! inverse comparison from an `InverseTable`; negated composites are refused.

mod document;
mod sql;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use stepql_core::condition::{Comparison, Condition, Connective, IN_LIST_SEPARATOR};
use stepql_core::pipeline::PipelineDef;
use stepql_core::query::QuerySpec;
use stepql_core::schema::{DataType, Schema};
use stepql_core::types::Scalar;

use crate::descriptor::OptimizationDescriptor;
use crate::error::OptimizationError;
use crate::strategy::PushDownStrategy;

pub use document::DocumentDialect;
pub use sql::SqlDialect;

/// Comparisons a backend filter can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Like,
}

impl FilterOp {
    fn from_comparison(c: Comparison) -> Option<FilterOp> {
        Some(match c {
            Comparison::Eq => FilterOp::Eq,
            Comparison::Ne => FilterOp::Ne,
            Comparison::Lt => FilterOp::Lt,
            Comparison::Le => FilterOp::Le,
            Comparison::Gt => FilterOp::Gt,
            Comparison::Ge => FilterOp::Ge,
            Comparison::InList => FilterOp::In,
            Comparison::IsNull => FilterOp::IsNull,
            Comparison::IsNotNull => FilterOp::IsNotNull,
            Comparison::Like => FilterOp::Like,
            Comparison::Contains | Comparison::StartsWith | Comparison::EndsWith => return None,
        })
    }
}

/// Pairs of mutually inverse comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseTable {
    pairs: HashMap<FilterOp, FilterOp>,
}

impl InverseTable {
    pub fn standard() -> Self {
        let mut pairs = HashMap::new();
        for (a, b) in [
            (FilterOp::Eq, FilterOp::Ne),
            (FilterOp::Lt, FilterOp::Ge),
            (FilterOp::Gt, FilterOp::Le),
            (FilterOp::In, FilterOp::NotIn),
            (FilterOp::IsNull, FilterOp::IsNotNull),
        ] {
            pairs.insert(a, b);
            pairs.insert(b, a);
        }
        Self { pairs }
    }

    pub fn inverse(&self, op: FilterOp) -> Option<FilterOp> {
        self.pairs.get(&op).copied()
    }
}

impl Default for InverseTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Right-hand side of a translated predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    One(Scalar),
    Many(Vec<Scalar>),
}

/// A backend filter language.
pub trait FilterDialect {
    type Fragment;

    fn predicate(
        &self,
        field: &str,
        op: FilterOp,
        operand: &Operand,
    ) -> Result<Self::Fragment, OptimizationError>;

    /// Join `parts` with `connective` (`And` or `Or`).
    fn group(&self, connective: Connective, parts: Vec<Self::Fragment>) -> Self::Fragment;

    fn render(&self, fragment: Self::Fragment) -> Result<String, OptimizationError>;
}

/// Translate `condition` with `dialect`. `types` resolves a field's declared type.
pub fn translate<D: FilterDialect>(
    condition: &Condition,
    dialect: &D,
    types: &dyn Fn(&str) -> Option<DataType>,
    inverses: &InverseTable,
) -> Result<String, OptimizationError> {
    let fragment = translate_node(condition, dialect, types, inverses)?;
    dialect.render(fragment)
}

fn translate_node<D: FilterDialect>(
    cond: &Condition,
    dialect: &D,
    types: &dyn Fn(&str) -> Option<DataType>,
    inverses: &InverseTable,
) -> Result<D::Fragment, OptimizationError> {
    if cond.is_composite() {
        if cond.is_negated() {
            return Err(OptimizationError::Translation(
                "negation of a compound condition is not supported".into(),
            ));
        }
        let children = cond.children();
        if children.len() < 2 {
            return Err(OptimizationError::Translation(format!(
                "compound condition has {} child(ren); two are needed to infer the connective",
                children.len()
            )));
        }
        let connective = children[1].connective;
        if !matches!(connective, Connective::And | Connective::Or) {
            return Err(OptimizationError::Translation(format!(
                "unsupported connective {:?}",
                connective
            )));
        }
        if let Some(other) = children[2..].iter().find(|c| c.connective != connective) {
            return Err(OptimizationError::Translation(format!(
                "mixed connectives {:?} and {:?} in one group",
                connective, other.connective
            )));
        }
        let parts = children
            .iter()
            .map(|c| translate_node(&c.condition, dialect, types, inverses))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(dialect.group(connective, parts));
    }

    let predicate = cond
        .predicate()
        .ok_or_else(|| OptimizationError::Translation("empty condition".into()))?;
    let mut op = FilterOp::from_comparison(predicate.comparison).ok_or_else(|| {
        OptimizationError::Translation(format!(
            "unsupported comparison {}",
            predicate.comparison.sql()
        ))
    })?;
    if cond.is_negated() {
        op = inverses.inverse(op).ok_or_else(|| {
            OptimizationError::Translation(format!(
                "comparison {} has no inverse",
                predicate.comparison.sql()
            ))
        })?;
    }
    let declared = types(&predicate.field);
    let operand = match (op, &predicate.value) {
        (FilterOp::IsNull | FilterOp::IsNotNull, _) => Operand::None,
        (FilterOp::In | FilterOp::NotIn, Some(v)) => Operand::Many(
            v.render()
                .split(IN_LIST_SEPARATOR)
                .map(|m| convert(&Scalar::Str(m.to_string()), declared, &predicate.field))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        (_, Some(v)) => Operand::One(convert(v, declared, &predicate.field)?),
        (_, None) => {
            return Err(OptimizationError::Translation(format!(
                "comparison on '{}' has no value",
                predicate.field
            )))
        }
    };
    dialect.predicate(&predicate.field, op, &operand)
}

/// Convert a literal to the field's declared type; undeclared fields keep it as is.
fn convert(v: &Scalar, declared: Option<DataType>, field: &str) -> Result<Scalar, OptimizationError> {
    match declared {
        Some(dt) if !v.conforms_to(dt) => Scalar::parse_as(&v.render(), dt).map_err(|e| {
            OptimizationError::Translation(format!("field '{}': {}", field, e))
        }),
        _ => Ok(v.clone()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// JSON query documents (`{"qty": {"$gt": 3}}`).
    Document,
    /// SQL `WHERE` text.
    Sql,
}

impl Dialect {
    /// Filter that matches everything; the declared default of the variable.
    pub fn match_all(&self) -> &'static str {
        match self {
            Dialect::Document => "{}",
            Dialect::Sql => "1 = 1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTranslation {
    /// Step variable receiving the translated filter.
    pub variable: String,
    pub dialect: Dialect,
    /// Declared field types; they take precedence over the source schema.
    #[serde(default)]
    pub field_types: BTreeMap<String, DataType>,
    #[serde(skip, default)]
    inverses: InverseTable,
}

impl ConditionTranslation {
    pub fn new(variable: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            variable: variable.into(),
            dialect,
            field_types: BTreeMap::new(),
            inverses: InverseTable::standard(),
        }
    }

    pub fn with_field_type(mut self, field: impl Into<String>, dt: DataType) -> Self {
        self.field_types.insert(field.into(), dt);
        self
    }

    /// Render `condition` in this descriptor's dialect.
    pub fn translate(&self, condition: &Condition, source_schema: &Schema) -> Result<String, OptimizationError> {
        let types = |f: &str| {
            self.field_types
                .get(f)
                .copied()
                .or_else(|| source_schema.field_named(f).map(|fd| fd.data_type))
        };
        match self.dialect {
            Dialect::Document => translate(condition, &DocumentDialect, &types, &self.inverses),
            Dialect::Sql => translate(condition, &SqlDialect, &types, &self.inverses),
        }
    }
}

impl PushDownStrategy for ConditionTranslation {
    fn describe(&self, desc: &OptimizationDescriptor) -> String {
        format!(
            "translate the query condition to {:?} into '{}' of step '{}'",
            self.dialect, self.variable, desc.step
        )
    }

    fn init(
        &self,
        definition: &mut PipelineDef,
        _query: &QuerySpec,
        _desc: &OptimizationDescriptor,
    ) -> Result<(), OptimizationError> {
        definition.declare_parameter(self.variable.clone(), self.dialect.match_all());
        Ok(())
    }

    fn assignments(
        &self,
        query: &QuerySpec,
        _desc: &OptimizationDescriptor,
        source_schema: &Schema,
    ) -> Result<Vec<(String, String)>, OptimizationError> {
        match query.condition() {
            None => Ok(vec![]),
            Some(cond) => Ok(vec![(self.variable.clone(), self.translate(cond, source_schema)?)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepql_core::schema::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("region", DataType::Utf8, true),
            Field::new("qty", DataType::Int64, true),
        ])
    }

    fn sql() -> ConditionTranslation {
        ConditionTranslation::new("FILTER", Dialect::Sql)
    }

    #[test]
    fn inverse_pairs_are_symmetric() {
        let t = InverseTable::standard();
        assert_eq!(t.inverse(FilterOp::Lt), Some(FilterOp::Ge));
        assert_eq!(t.inverse(FilterOp::Ge), Some(FilterOp::Lt));
        assert_eq!(t.inverse(FilterOp::NotIn), Some(FilterOp::In));
        assert_eq!(t.inverse(FilterOp::Like), None);
    }

    #[test]
    fn negated_composite_is_an_error() {
        let c = Condition::and(vec![
            Condition::eq("region", Scalar::Str("a".into())),
            Condition::eq("qty", Scalar::I64(1)),
        ])
        .negate();
        assert!(matches!(
            sql().translate(&c, &schema()),
            Err(OptimizationError::Translation(_))
        ));
    }

    #[test]
    fn single_child_composite_is_an_error() {
        let c = Condition::and(vec![Condition::eq("qty", Scalar::I64(1))]);
        assert!(sql().translate(&c, &schema()).is_err());
    }

    #[test]
    fn mixed_connectives_are_an_error() {
        let c = Condition::composite(vec![
            (Connective::None, Condition::eq("qty", Scalar::I64(1))),
            (Connective::And, Condition::eq("qty", Scalar::I64(2))),
            (Connective::Or, Condition::eq("qty", Scalar::I64(3))),
        ]);
        assert!(sql().translate(&c, &schema()).is_err());
    }

    #[test]
    fn negated_like_has_no_inverse() {
        let c = Condition::compare("region", Comparison::Like, Scalar::Str("e%".into())).negate();
        assert!(sql().translate(&c, &schema()).is_err());
    }

    #[test]
    fn in_list_members_are_converted() {
        let c = Condition::in_list("qty", &["1", "2"]);
        assert_eq!(sql().translate(&c, &schema()).unwrap(), "qty IN (1, 2)");
        let bad = Condition::in_list("qty", &["1", "two"]);
        assert!(sql().translate(&bad, &schema()).is_err());
    }

    #[test]
    fn declared_types_override_the_schema() {
        let c = Condition::eq("region", Scalar::Str("7".into()));
        let t = sql().with_field_type("region", DataType::Int64);
        assert_eq!(t.translate(&c, &schema()).unwrap(), "region = 7");
    }

    #[test]
    fn assignments_without_condition_are_empty() {
        let q = QuerySpec::builder().from_source("orders").build();
        let d = OptimizationDescriptor::new(
            "t",
            "read",
            crate::descriptor::Strategy::ConditionTranslation(sql()),
        );
        assert!(sql().assignments(&q, &d, &schema()).unwrap().is_empty());
    }
}
