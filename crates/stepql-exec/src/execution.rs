//! A running query.

use std::sync::Arc;

use futures::FutureExt;
use once_cell::sync::OnceCell;
use tracing::debug;

use stepql_core::id::ExecutionId;
use stepql_core::query::QuerySpec;
use stepql_engine::Pipeline;
use stepql_optimize::Activation;

use crate::bridge::{BridgeStats, BridgeStatsSnapshot, PipelineBridge};
use crate::cache::{CacheKey, Observer, Replayer};
use crate::error::{ExecError, Failure, FailureSlot};

/// How rows reach the query pipeline.
pub(crate) enum Feed {
    /// Constant-only query; one synthetic row (or none) was injected up front.
    NoSource,
    Live {
        source: Arc<dyn Pipeline>,
        bridge: Arc<PipelineBridge>,
        observer: Option<Arc<Observer>>,
    },
    Replay {
        /// Instantiated for the optimizations, never started.
        source: Arc<dyn Pipeline>,
        replayer: Replayer,
    },
}

pub struct Execution {
    id: ExecutionId,
    query: Arc<QuerySpec>,
    query_pipeline: Arc<dyn Pipeline>,
    feed: Feed,
    activations: Vec<Activation>,
    cache_key: Option<CacheKey>,
    stats: Arc<BridgeStats>,
    failure: Arc<FailureSlot>,
    outcome: OnceCell<Result<(), Failure>>,
}

impl Execution {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ExecutionId,
        query: Arc<QuerySpec>,
        query_pipeline: Arc<dyn Pipeline>,
        feed: Feed,
        activations: Vec<Activation>,
        cache_key: Option<CacheKey>,
        stats: Arc<BridgeStats>,
        failure: Arc<FailureSlot>,
    ) -> Self {
        Self {
            id,
            query,
            query_pipeline,
            feed,
            activations,
            cache_key,
            stats,
            failure,
            outcome: OnceCell::new(),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The query as executed, with parameters resolved.
    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    /// Block until every pipeline of this execution has terminated.
    ///
    /// Idempotent and callable from several threads; all callers see the
    /// same outcome.
    pub fn wait_until_finished(&self) -> Result<(), ExecError> {
        self.outcome
            .get_or_init(|| {
                self.query_pipeline.wait_until_finished();
                match &self.feed {
                    Feed::NoSource => {}
                    Feed::Live { source, .. } => source.wait_until_finished(),
                    Feed::Replay { replayer, .. } => {
                        if let Err(e) = replayer.wait() {
                            debug!(id = %self.id, error = %e, "replay ended abnormally");
                        }
                    }
                }
                debug!(id = %self.id, "execution finished");
                match self.failure.get() {
                    Some(f) => Err(f),
                    None => Ok(()),
                }
            })
            .clone()
            .map_err(ExecError::from)
    }

    pub fn is_finished(&self) -> bool {
        if self.outcome.get().is_some() {
            return true;
        }
        if !self.query_pipeline.is_finished() {
            return false;
        }
        match &self.feed {
            Feed::NoSource => true,
            Feed::Live { source, .. } => source.is_finished(),
            Feed::Replay { replayer, .. } => replayer.future().now_or_never().is_some(),
        }
    }

    /// Stop both pipelines. Safe to call repeatedly.
    pub fn stop(&self) {
        debug!(id = %self.id, "stopping execution");
        self.query_pipeline.stop();
        match &self.feed {
            Feed::NoSource => {}
            Feed::Live { bridge, .. } => {
                bridge.stop_source();
            }
            Feed::Replay { source, .. } => source.stop(),
        }
    }

    /// What each enabled optimization did, in registration order.
    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    /// Key of the source run, when the run is cacheable.
    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.cache_key.as_ref()
    }

    pub fn served_from_cache(&self) -> bool {
        matches!(self.feed, Feed::Replay { .. })
    }

    pub fn bridge_stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    /// The observer recording this run for the cache, if any.
    pub fn observer(&self) -> Option<&Arc<Observer>> {
        match &self.feed {
            Feed::Live { observer, .. } => observer.as_ref(),
            _ => None,
        }
    }

    pub fn replayer(&self) -> Option<&Replayer> {
        match &self.feed {
            Feed::Replay { replayer, .. } => Some(replayer),
            _ => None,
        }
    }

    pub fn source_pipeline(&self) -> Option<&Arc<dyn Pipeline>> {
        match &self.feed {
            Feed::NoSource => None,
            Feed::Live { source, .. } | Feed::Replay { source, .. } => Some(source),
        }
    }

    pub fn query_pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.query_pipeline
    }

    /// True when a failure was recorded, even before the pipelines terminated.
    pub fn has_failed(&self) -> bool {
        self.failure.is_set()
    }
}
