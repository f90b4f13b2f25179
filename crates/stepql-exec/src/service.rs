//! The query execution orchestrator.
//!
//! `execute` runs these stages, in order:
//!
//! 1. resolve `PARAMETER(...)` equalities into the parameter map;
//! 2. locate the source and load a fresh copy of its pipeline definition;
//! 3. plan the query pipeline against the source step's schema;
//! 4. let every enabled optimization `init` the source definition;
//! 5. instantiate the source and set parameters on it;
//! 6. drain `Optimize`: each optimization rewrites the source instance; the
//!    query pipeline is instantiated without the predicates the source now answers;
//! 7. derive the cache key from the effective queries;
//! 8. drain `BeforeStart`: wire sink, bridge and observer;
//! 9. start the query pipeline, then the source (or replay a cached run).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use stepql_core::config::ExecConfig;
use stepql_core::id::ExecutionId;
use stepql_core::pipeline::PipelineDef;
use stepql_core::query::QuerySpec;
use stepql_core::schema::Schema;
use stepql_core::types::Row;
use stepql_engine::{Pipeline, PipelineEngine, StepOutcome};
use stepql_optimize::{
    Activation, ExecutionPhase, ImpactReport, OptimizationContext, OptimizationDescriptor,
    OptimizationRegistry, PhaseHooks,
};
use stepql_planner::{QueryParser, QueryPlan, QueryPlanBuilder};

use crate::bridge::{offer_with_retry, BridgeStats, PipelineBridge};
use crate::cache::{CacheKey, Observer, ReplayTarget, Replayer, ResultCache};
use crate::catalog::{SourceCatalog, SourceEntry};
use crate::error::{ExecError, Failure, FailureSlot};
use crate::execution::{Execution, Feed};
use crate::params::resolve_parameters;
use crate::sink::RowSink;

type Hooks = PhaseHooks<ExecError>;
type SharedSink = Arc<Mutex<Box<dyn RowSink>>>;

/// A located source: catalog entry, fresh definition and the schema of the
/// step the query reads.
struct PreparedSource {
    entry: SourceEntry,
    definition: PipelineDef,
    schema: Schema,
}

pub struct QueryService {
    engine: Arc<dyn PipelineEngine>,
    catalog: SourceCatalog,
    registry: OptimizationRegistry,
    cache: Arc<ResultCache>,
    config: ExecConfig,
    planner: QueryPlanBuilder,
}

impl QueryService {
    pub fn new(
        engine: Arc<dyn PipelineEngine>,
        catalog: SourceCatalog,
        registry: OptimizationRegistry,
        config: ExecConfig,
    ) -> Self {
        Self {
            engine,
            catalog,
            registry,
            cache: Arc::new(ResultCache::from_config(&config)),
            config,
            planner: QueryPlanBuilder::new(),
        }
    }

    /// Share a cache between services.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_planner(mut self, planner: QueryPlanBuilder) -> Self {
        self.planner = planner;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn registry(&self) -> &OptimizationRegistry {
        &self.registry
    }

    /// Source names, sorted.
    pub fn list_known_sources(&self) -> Vec<String> {
        self.catalog.names()
    }

    /// Parse `text` against the known sources and execute it.
    pub fn execute_text<S>(
        &self,
        text: &str,
        parser: &dyn QueryParser,
        sink: S,
    ) -> Result<Execution, ExecError>
    where
        S: RowSink + 'static,
    {
        let query = parser.parse(text, &self.list_known_sources())?;
        self.execute(query, sink)
    }

    pub fn execute<S>(&self, query: QuerySpec, sink: S) -> Result<Execution, ExecError>
    where
        S: RowSink + 'static,
    {
        let id = ExecutionId::random();
        let query = Arc::new(resolve_parameters(&query)?);
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(sink)));
        info!(%id, query = %query, "executing query");

        match query.source() {
            None => self.execute_no_source(id, query, sink),
            Some(source) => {
                let prepared = self.prepare_source(source)?;
                self.execute_with_source(id, query, prepared, sink)
            }
        }
    }

    fn prepare_source(&self, name: &str) -> Result<PreparedSource, ExecError> {
        let entry = self
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::SourceNotFound(name.to_string()))?;
        let build_error = |reason: String| ExecError::SourceBuild {
            source_name: entry.name.clone(),
            reason,
        };
        let definition = self
            .engine
            .load(&entry.pipeline)
            .map_err(|e| build_error(e.to_string()))?;
        let schema = self
            .engine
            .step_schema(&definition, &entry.step)
            .map_err(|e| build_error(e.to_string()))?;
        Ok(PreparedSource {
            entry,
            definition,
            schema,
        })
    }

    fn execute_no_source(
        &self,
        id: ExecutionId,
        query: Arc<QuerySpec>,
        sink: SharedSink,
    ) -> Result<Execution, ExecError> {
        let plan = self.planner.build(&query, &Schema::empty())?;
        let query_pipeline = self.engine.instantiate(&plan.definition)?;
        let failure = Arc::new(FailureSlot::default());
        let stats = Arc::new(BridgeStats::new());

        let mut hooks = Hooks::new();
        hooks.drain(ExecutionPhase::Optimize)?;
        let result_finished = Arc::new(AtomicBool::new(false));
        self.schedule_sink(&mut hooks, &query_pipeline, &plan, sink, &result_finished, &failure)?;
        drain_wiring(&mut hooks)?;

        query_pipeline.start()?;
        let injector = query_pipeline.injector(&plan.injector_step)?;
        if !query.select().is_empty() {
            let qp = Arc::clone(&query_pipeline);
            offer_with_retry(
                injector.as_ref(),
                Row::empty(),
                self.config.offer_timeout(),
                || qp.is_running(),
                &stats,
            );
        }
        injector.finished();
        debug!(%id, "no-source query started");

        Ok(Execution::new(
            id,
            query,
            query_pipeline,
            Feed::NoSource,
            vec![],
            None,
            stats,
            failure,
        ))
    }

    fn execute_with_source(
        &self,
        id: ExecutionId,
        query: Arc<QuerySpec>,
        prepared: PreparedSource,
        sink: SharedSink,
    ) -> Result<Execution, ExecError> {
        let PreparedSource {
            entry,
            mut definition,
            schema,
        } = prepared;
        let plan = self.planner.build(&query, &schema)?;

        let mut init_failures: BTreeMap<String, Activation> = BTreeMap::new();
        let mut active: Vec<&OptimizationDescriptor> = Vec::new();
        for desc in self.registry.enabled_for(&entry.name) {
            match desc.strategy().init(&mut definition, &query, desc) {
                Ok(()) => active.push(desc),
                Err(e) => {
                    warn!(%id, optimization = %desc.name, error = %e, "optimization init failed");
                    init_failures.insert(desc.name.clone(), Activation::failed(&desc.name, e));
                }
            }
        }

        let source = self
            .engine
            .instantiate(&definition)
            .map_err(|e| ExecError::SourceBuild {
                source_name: entry.name.clone(),
                reason: e.to_string(),
            })?;
        for (name, value) in query.parameters() {
            source.set_variable(name, value);
        }

        let mut hooks = Hooks::new();
        let ctx = OptimizationContext {
            query: Arc::clone(&query),
            source_definition: Arc::new(definition),
            engine: Arc::clone(&self.engine),
            source: Some(Arc::clone(&source)),
            source_schema: schema.clone(),
        };
        for desc in &active {
            let task: BoxFuture<'static, Result<bool, ExecError>> = desc
                .strategy()
                .activate(&ctx, desc)
                .map(|r| r.map_err(ExecError::from))
                .boxed();
            hooks.schedule(ExecutionPhase::Optimize, desc.name.clone(), task)?;
        }
        let mut activated: BTreeMap<String, Activation> = BTreeMap::new();
        for (desc, outcome) in active.iter().zip(hooks.drain(ExecutionPhase::Optimize)?) {
            let activation = match outcome.result {
                Ok(changed) => Activation {
                    optimization: outcome.label,
                    effective_query: if changed {
                        source.step(&desc.step).ok().and_then(|s| s.query_text())
                    } else {
                        None
                    },
                    changed,
                    error: None,
                },
                Err(e) => {
                    warn!(%id, optimization = %outcome.label, error = %e, "optimization activation failed");
                    Activation::failed(outcome.label, e)
                }
            };
            debug!(%id, optimization = %activation.optimization, changed = activation.changed, "optimization applied");
            activated.insert(desc.name.clone(), activation);
        }
        let activations: Vec<Activation> = self
            .registry
            .enabled_for(&entry.name)
            .filter_map(|d| {
                init_failures
                    .remove(&d.name)
                    .or_else(|| activated.remove(&d.name))
            })
            .collect();

        let plan = match residual_query(&query, &active, &activations) {
            Some(evaluated) => {
                debug!(%id, query = %evaluated, "predicates answered by the source removed");
                self.planner.build(&evaluated, &schema)?
            }
            None => plan,
        };
        let query_pipeline = self.engine.instantiate(&plan.definition)?;

        let cache_key = self.cache_key_for(&entry, &query, &activations);
        let cached = cache_key.as_ref().and_then(|k| self.cache.get(k));
        if let (Some(key), Some(hit)) = (&cache_key, &cached) {
            info!(%id, %key, rows = hit.len(), "serving source rows from cache");
        }

        let failure = Arc::new(FailureSlot::default());
        let stats = Arc::new(BridgeStats::new());
        let result_finished = Arc::new(AtomicBool::new(false));
        let injector = query_pipeline.injector(&plan.injector_step)?;

        self.schedule_sink(&mut hooks, &query_pipeline, &plan, sink, &result_finished, &failure)?;
        let mut wiring = None;
        if cached.is_none() {
            let bridge = PipelineBridge::new(
                Arc::clone(&source),
                Arc::clone(&query_pipeline),
                Arc::clone(&injector),
                self.config.offer_timeout(),
                Arc::clone(&stats),
                Arc::clone(&failure),
            );
            {
                let bridge = Arc::clone(&bridge);
                let source_step = entry.step.clone();
                let result_step = plan.result_step.clone();
                hooks.schedule(
                    ExecutionPhase::BeforeStart,
                    "bridge",
                    async move {
                        bridge.attach(&source_step, &result_step)?;
                        Ok::<_, ExecError>(true)
                    }
                    .boxed(),
                )?;
            }
            let observer = cache_key.clone().map(|key| {
                Arc::new(Observer::new(
                    schema.clone(),
                    self.config.observer_poll(),
                    Some((Arc::clone(&self.cache), key)),
                ))
            });
            if let Some(observer) = &observer {
                let observer = Arc::clone(observer);
                let source = Arc::clone(&source);
                let step = entry.step.clone();
                hooks.schedule(
                    ExecutionPhase::BeforeStart,
                    "observer",
                    async move {
                        observer.attach(source.as_ref(), &step)?;
                        Ok::<_, ExecError>(true)
                    }
                    .boxed(),
                )?;
            }
            wiring = Some((bridge, observer));
        }
        if let Err(e) = drain_wiring(&mut hooks) {
            abandon(source.as_ref(), query_pipeline.as_ref());
            return Err(e);
        }
        if let Err(e) = query_pipeline.start() {
            abandon(source.as_ref(), query_pipeline.as_ref());
            return Err(e.into());
        }
        let feed = match (cached, wiring) {
            (Some(hit), _) => {
                let replayer = Replayer::spawn(
                    hit,
                    ReplayTarget {
                        injector,
                        query: Arc::clone(&query_pipeline),
                        result_finished,
                        offer_timeout: self.config.offer_timeout(),
                        stats: Arc::clone(&stats),
                    },
                    query.row_prefix_limit(),
                );
                match replayer {
                    Ok(replayer) => Feed::Replay { source, replayer },
                    Err(e) => {
                        abandon(source.as_ref(), query_pipeline.as_ref());
                        return Err(e);
                    }
                }
            }
            (None, Some((bridge, observer))) => {
                if let Err(e) = source.start() {
                    abandon(source.as_ref(), query_pipeline.as_ref());
                    return Err(e.into());
                }
                Feed::Live {
                    source,
                    bridge,
                    observer,
                }
            }
            (None, None) => {
                abandon(source.as_ref(), query_pipeline.as_ref());
                return Err(ExecError::Invariant("no row feed was wired".into()));
            }
        };
        debug!(%id, from_cache = matches!(feed, Feed::Replay { .. }), "query started");

        Ok(Execution::new(
            id,
            query,
            query_pipeline,
            feed,
            activations,
            cache_key,
            stats,
            failure,
        ))
    }

    /// `None` when caching is off for this run. A rewrite that changed the
    /// source without changing a query text cannot be keyed and disables it.
    fn cache_key_for(
        &self,
        entry: &SourceEntry,
        query: &QuerySpec,
        activations: &[Activation],
    ) -> Option<CacheKey> {
        if !self.config.cache_enabled || !entry.cacheable {
            return None;
        }
        let mut effective = Vec::new();
        for a in activations.iter().filter(|a| a.changed) {
            match &a.effective_query {
                Some(q) => effective.push(q.clone()),
                None => {
                    debug!(optimization = %a.optimization, "rewrite has no query text, not caching");
                    return None;
                }
            }
        }
        Some(CacheKey::new(
            format!("{}/{}/{}", entry.name, entry.pipeline, entry.step),
            query.parameters().clone(),
            effective,
        ))
    }

    fn schedule_sink(
        &self,
        hooks: &mut Hooks,
        query_pipeline: &Arc<dyn Pipeline>,
        plan: &QueryPlan,
        sink: SharedSink,
        result_finished: &Arc<AtomicBool>,
        failure: &Arc<FailureSlot>,
    ) -> Result<(), ExecError> {
        let pipeline = Arc::clone(query_pipeline);
        let step = plan.result_step.clone();
        let finished = Arc::clone(result_finished);
        let failure = Arc::clone(failure);
        hooks.schedule(
            ExecutionPhase::BeforeStart,
            "sink",
            async move {
                let rows = Arc::clone(&sink);
                pipeline.add_row_listener(
                    &step,
                    Box::new(move |schema: &Schema, row: &Row| rows.lock().on_row(schema, row)),
                )?;
                pipeline.add_finish_listener(
                    &step,
                    Box::new(move |outcome: &StepOutcome| {
                        finished.store(true, Ordering::Release);
                        if let StepOutcome::Failed(msg) = outcome {
                            failure.record(Failure::Query(msg.clone()));
                        }
                        sink.lock().on_finish(outcome);
                    }),
                )?;
                Ok::<_, ExecError>(true)
            }
            .boxed(),
        )?;
        Ok(())
    }

    /// Impact of one optimization on `source` for `query`, without running anything.
    pub fn preview(
        &self,
        source: &str,
        optimization: &str,
        query: &QuerySpec,
    ) -> Result<ImpactReport, ExecError> {
        let desc = self.registry.find(source, optimization).ok_or_else(|| {
            ExecError::UnknownOptimization {
                source_name: source.to_string(),
                name: optimization.to_string(),
            }
        })?;
        let query = Arc::new(resolve_parameters(query)?);
        let prepared = self.prepare_source(source)?;
        Ok(self.preview_one(desc, &query, prepared))
    }

    /// Impact of every optimization registered for `source`, disabled ones included.
    pub fn preview_all(&self, source: &str, query: &QuerySpec) -> Result<Vec<ImpactReport>, ExecError> {
        let query = Arc::new(resolve_parameters(query)?);
        let mut reports = Vec::new();
        for desc in self.registry.for_source(source) {
            let prepared = self.prepare_source(source)?;
            reports.push(self.preview_one(desc, &query, prepared));
        }
        Ok(reports)
    }

    fn preview_one(
        &self,
        desc: &OptimizationDescriptor,
        query: &Arc<QuerySpec>,
        prepared: PreparedSource,
    ) -> ImpactReport {
        let PreparedSource {
            mut definition,
            schema,
            ..
        } = prepared;
        let strategy = desc.strategy();
        if let Err(e) = strategy.init(&mut definition, query, desc) {
            return ImpactReport::new(desc, strategy.describe(desc)).failed(e);
        }
        let ctx = OptimizationContext {
            query: Arc::clone(query),
            source_definition: Arc::new(definition),
            engine: Arc::clone(&self.engine),
            source: None,
            source_schema: schema,
        };
        strategy.preview(&ctx, desc)
    }
}

/// The query left for the query pipeline once the applied rewrites took over
/// some of its predicates. `None` when they took over nothing.
fn residual_query(
    query: &QuerySpec,
    active: &[&OptimizationDescriptor],
    activations: &[Activation],
) -> Option<QuerySpec> {
    let mut condition = query.condition().cloned();
    for desc in active {
        let applied = activations
            .iter()
            .any(|a| a.optimization == desc.name && a.changed && a.error.is_none());
        if applied {
            condition = desc.strategy().residual_condition(condition.as_ref(), desc);
        }
    }
    if condition.as_ref() == query.condition() {
        return None;
    }
    Some(query.to_builder().condition(condition).build())
}

/// Tear down an execution that failed after wiring. Stopping releases the
/// listeners of a pipeline that never started, and with them the bridge and
/// observer that point back at both pipelines.
fn abandon(source: &dyn Pipeline, query: &dyn Pipeline) {
    query.stop();
    source.stop();
}

fn drain_wiring(hooks: &mut Hooks) -> Result<(), ExecError> {
    for outcome in hooks.drain(ExecutionPhase::BeforeStart)? {
        if let Err(e) = outcome.result {
            warn!(task = %outcome.label, error = %e, "wiring failed");
            return Err(e);
        }
    }
    Ok(())
}
