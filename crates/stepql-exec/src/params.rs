//! Named parameters written into the where-clause.
//!
//! `PARAMETER('name') = 'value'` at the top level of the condition (alone or
//! as an AND conjunct) sets a parameter and is removed from the condition.
//! A parameter reference anywhere else is a malformed query.

use stepql_core::condition::{Comparison, Condition};
use stepql_core::query::QuerySpec;

use crate::error::ExecError;

/// `PARAMETER('name')` → `name`.
pub fn parameter_name(field: &str) -> Option<&str> {
    let f = field.trim();
    let open = f.find('(')?;
    if !f[..open].trim().eq_ignore_ascii_case("parameter") || !f.ends_with(')') {
        return None;
    }
    let inner = f[open + 1..f.len() - 1].trim();
    let unquoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(inner);
    (!unquoted.is_empty()).then_some(unquoted)
}

fn mentions_parameter(cond: &Condition) -> bool {
    cond.fields().iter().any(|f| parameter_name(f).is_some())
}

/// Move parameter equalities from the condition into the parameter map.
pub fn resolve_parameters(query: &QuerySpec) -> Result<QuerySpec, ExecError> {
    let Some(cond) = query.condition() else {
        return Ok(query.clone());
    };
    if !mentions_parameter(cond) {
        return Ok(query.clone());
    }
    let conjuncts = cond.conjuncts().ok_or_else(|| {
        ExecError::MalformedQuery(format!(
            "PARAMETER(...) may only appear in top-level AND equalities: {}",
            cond
        ))
    })?;

    let mut builder = query.to_builder();
    let mut rest = Vec::new();
    for c in conjuncts {
        let name = c.field().and_then(parameter_name);
        match name {
            Some(name)
                if !c.is_negated()
                    && c.comparison() == Some(Comparison::Eq)
                    && c.value().is_some() =>
            {
                let value = c.value().map(|v| v.render()).unwrap_or_default();
                builder = builder.parameter(name, value);
            }
            _ if mentions_parameter(c) => {
                return Err(ExecError::MalformedQuery(format!(
                    "unsupported use of PARAMETER(...) in '{}'",
                    c
                )));
            }
            _ => rest.push(c.clone()),
        }
    }
    Ok(builder.condition(Condition::from_conjuncts(rest)).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepql_core::types::Scalar;

    fn s(v: &str) -> Scalar {
        Scalar::Str(v.into())
    }

    #[test]
    fn parameter_names() {
        assert_eq!(parameter_name("PARAMETER('region')"), Some("region"));
        assert_eq!(parameter_name("parameter(\"x\")"), Some("x"));
        assert_eq!(parameter_name("PARAMETER('')"), None);
        assert_eq!(parameter_name("region"), None);
    }

    #[test]
    fn extracts_and_strips_parameters() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::and(vec![
                Condition::eq("PARAMETER('REGION')", s("east")),
                Condition::eq("status", s("open")),
            ]))
            .build();
        let r = resolve_parameters(&q).unwrap();
        assert_eq!(r.parameters().get("REGION").map(String::as_str), Some("east"));
        assert_eq!(r.condition(), Some(&Condition::eq("status", s("open"))));
    }

    #[test]
    fn lone_parameter_leaves_no_condition() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::eq("PARAMETER('REGION')", s("east")))
            .build();
        let r = resolve_parameters(&q).unwrap();
        assert_eq!(r.condition(), None);
        assert_eq!(r.parameters().len(), 1);
    }

    #[test]
    fn parameter_under_or_is_malformed() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::or(vec![
                Condition::eq("PARAMETER('REGION')", s("east")),
                Condition::eq("status", s("open")),
            ]))
            .build();
        assert!(matches!(
            resolve_parameters(&q),
            Err(ExecError::MalformedQuery(_))
        ));
    }

    #[test]
    fn parameter_with_inequality_is_malformed() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::compare(
                "PARAMETER('N')",
                Comparison::Gt,
                Scalar::I64(3),
            ))
            .build();
        assert!(resolve_parameters(&q).is_err());
    }

    #[test]
    fn queries_without_parameters_are_untouched() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::eq("status", s("open")))
            .build();
        assert_eq!(resolve_parameters(&q).unwrap(), q);
    }
}
