//! Query plan builder.
//!
//! The query pipeline is always linear:
//!
//! ```text
//! injector → [where] → [group_by] → [order_by] → [select] → [limit] → result
//! ```
//!
//! Bracketed steps are only present when the query needs them. Rows enter at
//! the injector step; callers read the result step.

use stepql_core::pipeline::{AggregateDef, PipelineDef, StepDef, StepKind};
use stepql_core::query::{QuerySpec, SelectItem};
use stepql_core::schema::Schema;

use crate::error::PlanError;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub definition: PipelineDef,
    pub injector_step: String,
    pub result_step: String,
    /// The query has no `FROM`; nothing feeds the injector except synthetic rows.
    pub no_source: bool,
}

#[derive(Debug, Clone)]
pub struct QueryPlanBuilder {
    injector_step: String,
    result_step: String,
}

impl Default for QueryPlanBuilder {
    fn default() -> Self {
        Self {
            injector_step: "injector".into(),
            result_step: "result".into(),
        }
    }
}

impl QueryPlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_names(injector: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            injector_step: injector.into(),
            result_step: result.into(),
        }
    }

    /// Build the query pipeline for `query` over rows shaped like `source`.
    pub fn build(&self, query: &QuerySpec, source: &Schema) -> Result<QueryPlan, PlanError> {
        let input = if query.is_no_source() {
            Schema::empty()
        } else {
            source.clone()
        };
        let name = format!("query:{}", query.source().unwrap_or("-"));
        let mut def = PipelineDef::new(name).with_step(StepDef::new(
            self.injector_step.clone(),
            StepKind::Injector {
                fields: input.fields.clone(),
            },
        ));

        // Names visible to the next step
        let mut visible: Vec<String> = input.names().iter().map(|s| s.to_string()).collect();
        let require = |visible: &[String], f: &str| -> Result<(), PlanError> {
            if visible.iter().any(|v| v == f) {
                Ok(())
            } else {
                Err(PlanError::UnknownField(f.to_string()))
            }
        };

        if let Some(cond) = query.condition() {
            for f in cond.fields() {
                require(&visible, f)?;
            }
            def.steps.push(StepDef::new(
                "where",
                StepKind::Filter {
                    condition: cond.clone(),
                },
            ));
        }

        if query.has_aggregates() {
            for g in query.group_by() {
                require(&visible, g)?;
            }
            let mut aggregates = Vec::new();
            for item in query.select() {
                match item {
                    SelectItem::Aggregate { function, .. } => {
                        if let Some(f) = function.field() {
                            require(&visible, f)?;
                        }
                        let alias = item.output_name().unwrap_or_else(|| function.default_alias());
                        aggregates.push(AggregateDef {
                            function: function.clone(),
                            alias,
                        });
                    }
                    SelectItem::Field { name, .. } if !query.group_by().contains(name) => {
                        return Err(PlanError::Invalid(format!(
                            "field '{}' must appear in GROUP BY or inside an aggregate",
                            name
                        )));
                    }
                    SelectItem::Wildcard => {
                        return Err(PlanError::Invalid(
                            "'*' cannot be combined with aggregation".into(),
                        ));
                    }
                    _ => {}
                }
            }
            visible = query.group_by().to_vec();
            visible.extend(aggregates.iter().map(|a| a.alias.clone()));
            def.steps.push(StepDef::new(
                "group_by",
                StepKind::Aggregate {
                    group_by: query.group_by().to_vec(),
                    aggregates,
                },
            ));
        }

        if !query.order_by().is_empty() {
            for k in query.order_by() {
                require(&visible, &k.field)?;
            }
            def.steps.push(StepDef::new(
                "order_by",
                StepKind::Sort {
                    keys: query.order_by().to_vec(),
                },
            ));
        }

        let projects = !query.select().is_empty()
            && !matches!(query.select(), [SelectItem::Wildcard]);
        if projects {
            for item in query.select() {
                match item {
                    SelectItem::Field { name, .. } => require(&visible, name)?,
                    SelectItem::Aggregate { .. } => {
                        if let Some(n) = item.output_name() {
                            require(&visible, &n)?;
                        }
                    }
                    SelectItem::Wildcard | SelectItem::Constant { .. } => {}
                }
            }
            def.steps.push(StepDef::new(
                "select",
                StepKind::Select {
                    items: query.select().to_vec(),
                },
            ));
        }

        if let Some(n) = query.limit() {
            def.steps.push(StepDef::new("limit", StepKind::Limit { count: n, offset: 0 }));
        }

        def.steps
            .push(StepDef::new(self.result_step.clone(), StepKind::Dummy));
        def.validate()?;

        tracing::debug!(
            pipeline = %def.name,
            steps = def.steps.len(),
            no_source = query.is_no_source(),
            "built query plan"
        );
        Ok(QueryPlan {
            definition: def,
            injector_step: self.injector_step.clone(),
            result_step: self.result_step.clone(),
            no_source: query.is_no_source(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepql_core::condition::Condition;
    use stepql_core::query::{Aggregation, SortKey};
    use stepql_core::schema::{DataType, Field};
    use stepql_core::types::Scalar;

    fn source() -> Schema {
        Schema::new(vec![
            Field::new("region", DataType::Utf8, true),
            Field::new("qty", DataType::Int64, true),
        ])
    }

    fn step_names(plan: &QueryPlan) -> Vec<&str> {
        plan.definition.steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn bare_select_is_injector_to_result() {
        let q = QuerySpec::builder().from_source("orders").build();
        let plan = QueryPlanBuilder::new().build(&q, &source()).unwrap();
        assert_eq!(step_names(&plan), vec!["injector", "result"]);
        assert!(!plan.no_source);
    }

    #[test]
    fn full_query_layout() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .select_fields(["region"])
            .select(SelectItem::aggregate(Aggregation::Sum("qty".into())))
            .filter(Condition::compare(
                "qty",
                stepql_core::condition::Comparison::Gt,
                Scalar::I64(0),
            ))
            .group_by("region")
            .order_by(SortKey::desc("SUM(qty)"))
            .limit(3)
            .build();
        let plan = QueryPlanBuilder::new().build(&q, &source()).unwrap();
        assert_eq!(
            step_names(&plan),
            vec!["injector", "where", "group_by", "order_by", "select", "limit", "result"]
        );
    }

    #[test]
    fn ungrouped_field_is_rejected() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .select_fields(["qty"])
            .select(SelectItem::aggregate(Aggregation::Count))
            .group_by("region")
            .build();
        assert!(matches!(
            QueryPlanBuilder::new().build(&q, &source()),
            Err(PlanError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_condition_field() {
        let q = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::eq("missing", Scalar::I64(1)))
            .build();
        assert!(matches!(
            QueryPlanBuilder::new().build(&q, &source()),
            Err(PlanError::UnknownField(f)) if f == "missing"
        ));
    }

    #[test]
    fn no_source_plan_has_empty_injector() {
        let q = QuerySpec::builder()
            .select(SelectItem::constant(Scalar::I64(1), "one"))
            .build();
        let plan = QueryPlanBuilder::new().build(&q, &Schema::empty()).unwrap();
        assert!(plan.no_source);
        assert_eq!(step_names(&plan), vec!["injector", "select", "result"]);
        match &plan.definition.steps[0].kind {
            StepKind::Injector { fields } => assert!(fields.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
