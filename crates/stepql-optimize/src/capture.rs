//! Parameter capture: lift `field = literal` clauses into named parameters.
//!
//! Only a plain conjunction qualifies: a single equality, or equalities joined
//! with `AND` (the first child's connective is `None`), none of them negated.
//! Any other shape captures nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stepql_core::condition::{Comparison, Condition};
use stepql_core::pipeline::PipelineDef;
use stepql_core::query::QuerySpec;
use stepql_core::schema::Schema;

use crate::descriptor::OptimizationDescriptor;
use crate::error::OptimizationError;
use crate::strategy::PushDownStrategy;

/// Equalities lifted out of a condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capture {
    /// field → literal text
    pub params: BTreeMap<String, String>,
    /// What is left to evaluate after the captured predicates are removed.
    pub residual: Option<Condition>,
}

impl Capture {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Capture the equalities on fields accepted by `accept`.
///
/// Equalities on other fields stay in the residual. When the condition is not
/// a plain conjunction of equalities, or names a field twice, nothing is
/// captured and the residual is the whole condition.
pub fn capture_equalities(condition: Option<&Condition>, accept: impl Fn(&str) -> bool) -> Capture {
    let nothing = || Capture {
        params: BTreeMap::new(),
        residual: condition.cloned(),
    };
    let Some(cond) = condition else {
        return Capture::default();
    };
    let Some(conjuncts) = cond.conjuncts() else {
        return nothing();
    };
    let mut params = BTreeMap::new();
    let mut residual = Vec::new();
    for c in conjuncts {
        let eligible = c.is_atomic()
            && !c.is_negated()
            && c.comparison() == Some(Comparison::Eq)
            && c.value().map_or(false, |v| !v.is_null());
        if !eligible {
            return nothing();
        }
        let (Some(field), Some(value)) = (c.field(), c.value()) else {
            return nothing();
        };
        if params.contains_key(field) || residual.iter().any(|r: &Condition| r.field() == Some(field)) {
            return nothing();
        }
        if accept(field) {
            params.insert(field.to_string(), value.render());
        } else {
            residual.push(c.clone());
        }
    }
    Capture {
        params,
        residual: Condition::from_conjuncts(residual),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterCapture {
    /// Source field → parameter name.
    pub mappings: BTreeMap<String, String>,
    /// Value template; `%s` is replaced by the captured literal.
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "%s".into()
}

impl ParameterCapture {
    pub fn new<K: Into<String>, V: Into<String>>(mappings: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            mappings: mappings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            format: default_format(),
        }
    }
}

impl PushDownStrategy for ParameterCapture {
    fn describe(&self, desc: &OptimizationDescriptor) -> String {
        let params: Vec<&str> = self.mappings.values().map(String::as_str).collect();
        format!(
            "capture equality parameters [{}] into step '{}'",
            params.join(", "),
            desc.step
        )
    }

    fn init(
        &self,
        definition: &mut PipelineDef,
        _query: &QuerySpec,
        _desc: &OptimizationDescriptor,
    ) -> Result<(), OptimizationError> {
        for param in self.mappings.values() {
            definition.declare_parameter(param.clone(), "");
        }
        Ok(())
    }

    /// Captured equalities are answered by the source; the rest stays.
    fn residual_condition(
        &self,
        condition: Option<&Condition>,
        _desc: &OptimizationDescriptor,
    ) -> Option<Condition> {
        capture_equalities(condition, |f| self.mappings.contains_key(f)).residual
    }

    fn assignments(
        &self,
        query: &QuerySpec,
        _desc: &OptimizationDescriptor,
        _source_schema: &Schema,
    ) -> Result<Vec<(String, String)>, OptimizationError> {
        let capture = capture_equalities(query.condition(), |f| self.mappings.contains_key(f));
        Ok(capture
            .params
            .iter()
            .filter_map(|(field, value)| {
                self.mappings
                    .get(field)
                    .map(|param| (param.clone(), self.format.replace("%s", value)))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepql_core::types::Scalar;

    fn s(v: &str) -> Scalar {
        Scalar::Str(v.into())
    }

    #[test]
    fn captures_every_equality_of_a_conjunction() {
        let cond = Condition::and(vec![Condition::eq("a", s("x")), Condition::eq("b", s("y"))]);
        let cap = capture_equalities(Some(&cond), |_| true);
        assert_eq!(cap.params.get("a").map(String::as_str), Some("x"));
        assert_eq!(cap.params.get("b").map(String::as_str), Some("y"));
        assert_eq!(cap.residual, None);
    }

    #[test]
    fn non_equality_or_disjunction_captures_nothing() {
        let gt = Condition::and(vec![
            Condition::eq("a", s("x")),
            Condition::compare("b", Comparison::Gt, Scalar::I64(3)),
        ]);
        let cap = capture_equalities(Some(&gt), |_| true);
        assert!(cap.is_empty());
        assert_eq!(cap.residual.as_ref(), Some(&gt));

        let or = Condition::or(vec![Condition::eq("a", s("x")), Condition::eq("b", s("y"))]);
        assert!(capture_equalities(Some(&or), |_| true).is_empty());

        let negated = Condition::eq("a", s("x")).negate();
        assert!(capture_equalities(Some(&negated), |_| true).is_empty());
    }

    #[test]
    fn unaccepted_fields_stay_in_the_residual() {
        let cond = Condition::and(vec![Condition::eq("a", s("x")), Condition::eq("b", s("y"))]);
        let cap = capture_equalities(Some(&cond), |f| f == "a");
        assert_eq!(cap.params.len(), 1);
        assert_eq!(cap.residual, Some(Condition::eq("b", s("y"))));
    }

    #[test]
    fn assignments_follow_mappings_and_format() {
        let mut strategy = ParameterCapture::new([("region", "REGION")]);
        strategy.format = "'%s'".into();
        let query = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::eq("region", s("east")))
            .build();
        let desc = OptimizationDescriptor::new(
            "pc",
            "read",
            crate::descriptor::Strategy::ParameterCapture(strategy.clone()),
        );
        let got = strategy.assignments(&query, &desc, &Schema::empty()).unwrap();
        assert_eq!(got, vec![("REGION".to_string(), "'east'".to_string())]);
    }

    #[test]
    fn residual_keeps_only_unmapped_predicates() {
        let strategy = ParameterCapture::new([("region", "REGION")]);
        let desc = OptimizationDescriptor::new(
            "pc",
            "read",
            crate::descriptor::Strategy::ParameterCapture(strategy.clone()),
        );
        let both = Condition::and(vec![
            Condition::eq("region", s("east")),
            Condition::eq("qty", Scalar::I64(3)),
        ]);
        assert_eq!(
            strategy.residual_condition(Some(&both), &desc),
            Some(Condition::eq("qty", Scalar::I64(3)))
        );
        assert_eq!(strategy.residual_condition(Some(&Condition::eq("region", s("east"))), &desc), None);

        let or = Condition::or(vec![Condition::eq("region", s("east")), Condition::eq("qty", Scalar::I64(3))]);
        assert_eq!(strategy.residual_condition(Some(&or), &desc), Some(or.clone()));
    }

    #[test]
    fn init_declares_parameter_slots() {
        let strategy = ParameterCapture::new([("region", "REGION")]);
        let desc = OptimizationDescriptor::new(
            "pc",
            "read",
            crate::descriptor::Strategy::ParameterCapture(strategy.clone()),
        );
        let mut def = PipelineDef::new("orders");
        strategy
            .init(&mut def, &QuerySpec::builder().build(), &desc)
            .unwrap();
        assert!(def.parameters.contains_key("REGION"));
    }
}
