//! The strategy capability set and its shared `activate`/`preview` logic.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use stepql_core::condition::Condition;
use stepql_core::pipeline::PipelineDef;
use stepql_core::query::QuerySpec;
use stepql_core::schema::Schema;
use stepql_engine::{Pipeline, PipelineEngine, StepInstance};

use crate::descriptor::OptimizationDescriptor;
use crate::error::OptimizationError;
use crate::report::ImpactReport;

/// Everything a strategy may look at for one execution.
#[derive(Clone)]
pub struct OptimizationContext {
    pub query: Arc<QuerySpec>,
    /// Source definition after every enabled `init` ran.
    pub source_definition: Arc<PipelineDef>,
    pub engine: Arc<dyn PipelineEngine>,
    /// The execution's own source pipeline, once instantiated.
    pub source: Option<Arc<dyn Pipeline>>,
    pub source_schema: Schema,
}

pub trait PushDownStrategy: Send + Sync {
    /// Short human-readable summary for impact reports.
    fn describe(&self, desc: &OptimizationDescriptor) -> String;

    /// Prepare the source definition before it is instantiated.
    fn init(
        &self,
        definition: &mut PipelineDef,
        query: &QuerySpec,
        desc: &OptimizationDescriptor,
    ) -> Result<(), OptimizationError>;

    /// Step variables the rewrite sets on the target step.
    fn assignments(
        &self,
        query: &QuerySpec,
        desc: &OptimizationDescriptor,
        source_schema: &Schema,
    ) -> Result<Vec<(String, String)>, OptimizationError>;

    /// What the query pipeline still has to evaluate of `condition` once this
    /// rewrite was applied to the source. Most rewrites only narrow what the
    /// source reads, so the whole condition stays.
    fn residual_condition(
        &self,
        condition: Option<&Condition>,
        _desc: &OptimizationDescriptor,
    ) -> Option<Condition> {
        condition.cloned()
    }

    /// Apply the rewrite to the execution's running source step.
    ///
    /// The assignments are computed now; the step is only touched when the
    /// returned future runs. Resolves to whether the step's query changed.
    fn activate(
        &self,
        ctx: &OptimizationContext,
        desc: &OptimizationDescriptor,
    ) -> BoxFuture<'static, Result<bool, OptimizationError>> {
        let assignments = self.assignments(&ctx.query, desc, &ctx.source_schema);
        let source = ctx.source.clone();
        let name = desc.name.clone();
        let step = desc.step.clone();
        async move {
            let assignments = assignments?;
            let pipeline = source.ok_or(OptimizationError::NoSourcePipeline(name))?;
            let step = pipeline.step(&step)?;
            Ok(apply(step.as_ref(), &assignments))
        }
        .boxed()
    }

    /// Report the rewrite against a throwaway source pipeline.
    fn preview(&self, ctx: &OptimizationContext, desc: &OptimizationDescriptor) -> ImpactReport {
        let report = ImpactReport::new(desc, self.describe(desc));
        let pipeline = match ctx.engine.instantiate(&ctx.source_definition) {
            Ok(p) => p,
            Err(e) => return report.failed(e),
        };
        for (k, v) in ctx.query.parameters() {
            pipeline.set_variable(k, v);
        }
        let step = match pipeline.step(&desc.step) {
            Ok(s) => s,
            Err(e) => return report.failed(e),
        };
        let report = preview_on(self, step.as_ref(), ctx, desc, report);
        step.mark_output_done();
        step.dispose();
        step.mark_stopped();
        report
    }
}

fn preview_on<S: PushDownStrategy + ?Sized>(
    strategy: &S,
    step: &dyn StepInstance,
    ctx: &OptimizationContext,
    desc: &OptimizationDescriptor,
    mut report: ImpactReport,
) -> ImpactReport {
    report.query_before = step.query_text();
    match strategy.assignments(&ctx.query, desc, &ctx.source_schema) {
        Ok(assignments) => {
            let changed = apply(step, &assignments);
            report.query_after = step.query_text();
            report.modified = desc.enabled && changed;
            report
        }
        Err(e) => report.failed(e),
    }
}

/// Set `assignments` on `step`; true when its query text (or, for steps
/// without one, any variable) changed.
pub fn apply(step: &dyn StepInstance, assignments: &[(String, String)]) -> bool {
    let before = step.query_text();
    let mut vars_changed = false;
    for (k, v) in assignments {
        if step.variable(k).as_deref() != Some(v.as_str()) {
            vars_changed = true;
        }
        step.set_variable(k, v);
    }
    let after = step.query_text();
    match (before, after) {
        (Some(b), Some(a)) => b != a,
        _ => vars_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use stepql_core::condition::Condition;
    use stepql_core::pipeline::{StepDef, StepKind};
    use stepql_core::schema::{DataType, Field};
    use stepql_core::types::Scalar;
    use stepql_engine::MemoryEngine;

    use crate::capture::ParameterCapture;
    use crate::descriptor::Strategy;
    use crate::report::DISABLED_PREFIX;

    fn source_def() -> PipelineDef {
        PipelineDef::new("orders")
            .with_step(StepDef::new(
                "read",
                StepKind::Table {
                    fields: vec![Field::new("region", DataType::Utf8, true)],
                    rows: vec![],
                    query: Some("region = '${REGION}'".into()),
                    bindings: BTreeMap::new(),
                    delay_ms: 0,
                },
            ))
            .with_step(StepDef::new("out", StepKind::Dummy))
    }

    fn context(source: Option<Arc<dyn Pipeline>>, def: PipelineDef) -> OptimizationContext {
        let query = QuerySpec::builder()
            .from_source("orders")
            .filter(Condition::eq("region", Scalar::Str("east".into())))
            .build();
        OptimizationContext {
            query: Arc::new(query),
            source_definition: Arc::new(def),
            engine: Arc::new(MemoryEngine::default()),
            source,
            source_schema: Schema::new(vec![Field::new("region", DataType::Utf8, true)]),
        }
    }

    fn descriptor() -> OptimizationDescriptor {
        OptimizationDescriptor::new(
            "capture",
            "read",
            Strategy::ParameterCapture(ParameterCapture::new([("region", "REGION")])),
        )
    }

    #[test]
    fn activate_rewrites_only_the_running_step() {
        let desc = descriptor();
        let mut def = source_def();
        desc.strategy()
            .init(&mut def, &QuerySpec::builder().build(), &desc)
            .unwrap();
        let engine = MemoryEngine::default();
        let pipeline = engine.instantiate(&def).unwrap();
        let other = engine.instantiate(&def).unwrap();
        let ctx = context(Some(Arc::clone(&pipeline)), def);

        let changed = futures::executor::block_on(desc.strategy().activate(&ctx, &desc)).unwrap();
        assert!(changed);
        assert_eq!(
            pipeline.step("read").unwrap().query_text().as_deref(),
            Some("region = 'east'")
        );
        assert_eq!(
            other.step("read").unwrap().query_text().as_deref(),
            Some("region = ''")
        );
    }

    #[test]
    fn activate_without_pipeline_fails() {
        let desc = descriptor();
        let ctx = context(None, source_def());
        let res = futures::executor::block_on(desc.strategy().activate(&ctx, &desc));
        assert!(matches!(res, Err(OptimizationError::NoSourcePipeline(_))));
    }

    #[test]
    fn preview_reports_before_and_after() {
        let desc = descriptor();
        let ctx = context(None, source_def());
        let report = desc.strategy().preview(&ctx, &desc);
        assert_eq!(report.error, None);
        assert_eq!(report.query_before.as_deref(), Some("region = ''"));
        assert_eq!(report.query_after.as_deref(), Some("region = 'east'"));
        assert!(report.modified);
    }

    #[test]
    fn disabled_preview_is_flagged_and_leaves_query_alone() {
        let desc = descriptor().disabled();
        let ctx = context(None, source_def());
        let query_before = ctx.query.as_ref().clone();
        let report = desc.strategy().preview(&ctx, &desc);
        assert!(!report.modified);
        assert!(report.description.starts_with(DISABLED_PREFIX));
        assert_eq!(report.query_after.as_deref(), Some("region = 'east'"));
        assert_eq!(*ctx.query, query_before);
    }

    #[test]
    fn preview_of_missing_step_reports_error() {
        let mut desc = descriptor();
        desc.step = "nope".into();
        let report = desc.strategy().preview(&context(None, source_def()), &desc);
        assert!(report.error.is_some());
        assert!(!report.modified);
    }
}
