//! Source → query row bridge.
//!
//! The bridge is a set of listeners on the source pipeline's designated step
//! and on the query pipeline's result step. Rows are deep-copied and offered
//! to the query injector with a bounded wait; a full injector is retried for
//! as long as the query pipeline is running, which throttles the source
//! thread. Shutdown is coordinated through `Once` guards so that finishing the
//! injector and stopping the source each happen at most once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use tracing::{debug, trace, warn};

use stepql_core::schema::Schema;
use stepql_core::types::Row;
use stepql_engine::{Offer, Pipeline, RowInjector, StepOutcome};

use crate::error::{ExecError, Failure, FailureSlot};

/// What happened to one offered row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered { attempts: u64 },
    /// The consumer went away before the row was accepted.
    Abandoned { attempts: u64 },
}

impl Delivery {
    pub fn attempts(&self) -> u64 {
        match self {
            Delivery::Delivered { attempts } | Delivery::Abandoned { attempts } => *attempts,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered { .. })
    }
}

/// Counters shared by the bridge and the replayer.
#[derive(Debug, Default)]
pub struct BridgeStats {
    rows_delivered: AtomicU64,
    rows_abandoned: AtomicU64,
    retries: AtomicU64,
    source_stops: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            rows_delivered: self.rows_delivered.load(Ordering::Relaxed),
            rows_abandoned: self.rows_abandoned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            source_stops: self.source_stops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    pub rows_delivered: u64,
    pub rows_abandoned: u64,
    pub retries: u64,
    pub source_stops: u64,
}

/// Offer `row` until it is accepted or the consumer is gone.
///
/// Every `Full` answer is followed by another attempt while `is_alive()`
/// holds, so a row rejected N times takes N+1 attempts.
pub fn offer_with_retry(
    injector: &dyn RowInjector,
    row: Row,
    timeout: Duration,
    is_alive: impl Fn() -> bool,
    stats: &BridgeStats,
) -> Delivery {
    let mut row = row;
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        match injector.offer(row, timeout) {
            Offer::Accepted => {
                stats.rows_delivered.fetch_add(1, Ordering::Relaxed);
                return Delivery::Delivered { attempts };
            }
            Offer::Closed(_) => {
                stats.rows_abandoned.fetch_add(1, Ordering::Relaxed);
                return Delivery::Abandoned { attempts };
            }
            Offer::Full(back) => {
                if !is_alive() {
                    stats.rows_abandoned.fetch_add(1, Ordering::Relaxed);
                    return Delivery::Abandoned { attempts };
                }
                warn!(
                    attempts,
                    timeout_ms = timeout.as_millis() as u64,
                    "query input still full, retrying"
                );
                stats.retries.fetch_add(1, Ordering::Relaxed);
                row = back;
            }
        }
    }
}

pub struct PipelineBridge {
    source: Arc<dyn Pipeline>,
    query: Arc<dyn Pipeline>,
    injector: Arc<dyn RowInjector>,
    offer_timeout: Duration,
    stats: Arc<BridgeStats>,
    failure: Arc<FailureSlot>,
    input_finished: Once,
    source_stop: Once,
    aborted: AtomicBool,
}

impl PipelineBridge {
    pub(crate) fn new(
        source: Arc<dyn Pipeline>,
        query: Arc<dyn Pipeline>,
        injector: Arc<dyn RowInjector>,
        offer_timeout: Duration,
        stats: Arc<BridgeStats>,
        failure: Arc<FailureSlot>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            query,
            injector,
            offer_timeout,
            stats,
            failure,
            input_finished: Once::new(),
            source_stop: Once::new(),
            aborted: AtomicBool::new(false),
        })
    }

    /// Register the bridge's listeners. Both pipelines must not be started yet.
    pub fn attach(self: &Arc<Self>, source_step: &str, result_step: &str) -> Result<(), ExecError> {
        let bridge = Arc::clone(self);
        self.source.add_row_listener(
            source_step,
            Box::new(move |schema: &Schema, row: &Row| bridge.on_row(schema, row)),
        )?;
        let bridge = Arc::clone(self);
        self.source.add_finish_listener(
            source_step,
            Box::new(move |outcome: &StepOutcome| bridge.on_source_finished(outcome)),
        )?;
        let bridge = Arc::clone(self);
        self.query.add_finish_listener(
            result_step,
            Box::new(move |outcome: &StepOutcome| bridge.on_result_finished(outcome)),
        )?;
        debug!(source_step, result_step, "bridge attached");
        Ok(())
    }

    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// True once the bridge gave up on forwarding rows.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Row listener on the source step. Runs on the source pipeline's thread.
    pub fn on_row(&self, schema: &Schema, row: &Row) {
        if self.is_aborted() {
            return;
        }
        let copy = match schema.clone_row(row) {
            Ok(copy) => copy,
            Err(e) => {
                self.abort(Failure::Row(e.to_string()));
                return;
            }
        };
        let query = &self.query;
        let delivery = offer_with_retry(
            self.injector.as_ref(),
            copy,
            self.offer_timeout,
            || query.is_running(),
            &self.stats,
        );
        match delivery {
            Delivery::Delivered { attempts } => trace!(attempts, "row bridged"),
            Delivery::Abandoned { attempts } => {
                debug!(attempts, "query pipeline no longer accepts rows, stopping source");
                self.aborted.store(true, Ordering::Release);
                self.stop_source();
            }
        }
    }

    /// Finish listener on the source step.
    pub fn on_source_finished(&self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Finished => self.finish_input(),
            StepOutcome::Stopped => {
                // A step cut short by its own pipeline has still produced its last row.
                debug!("source step stopped");
                self.finish_input();
            }
            StepOutcome::Failed(msg) => {
                self.failure.record(Failure::Source(msg.clone()));
                self.query.stop();
            }
        }
    }

    /// Finish listener on the query's result step.
    pub fn on_result_finished(&self, outcome: &StepOutcome) {
        if let StepOutcome::Failed(msg) = outcome {
            self.failure.record(Failure::Query(msg.clone()));
        }
        self.stop_source();
    }

    /// Stop the source pipeline. Only the first call has any effect; returns
    /// whether this call stopped a running source.
    pub fn stop_source(&self) -> bool {
        let mut stopped = false;
        self.source_stop.call_once(|| {
            stopped = self.source.is_running();
            self.source.stop();
            if stopped {
                self.stats.source_stops.fetch_add(1, Ordering::Relaxed);
                debug!("source pipeline stopped by bridge");
            }
        });
        stopped
    }

    fn finish_input(&self) {
        self.input_finished.call_once(|| {
            debug!("source finished, closing query input");
            self.injector.finished();
        });
    }

    fn abort(&self, failure: Failure) {
        self.failure.record(failure);
        self.aborted.store(true, Ordering::Release);
        self.stop_source();
        self.finish_input();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use stepql_core::pipeline::PipelineDef;
    use stepql_core::types::Scalar;
    use stepql_engine::{EngineError, FinishListener, RowListener, StepInstance};

    /// Rejects the first `full` offers, then accepts.
    struct FlakyInjector {
        full: Mutex<u64>,
        accepted: Mutex<Vec<Row>>,
        closed: bool,
    }

    impl FlakyInjector {
        fn new(full: u64) -> Self {
            Self {
                full: Mutex::new(full),
                accepted: Mutex::new(vec![]),
                closed: false,
            }
        }
    }

    impl RowInjector for FlakyInjector {
        fn offer(&self, row: Row, _timeout: Duration) -> Offer {
            if self.closed {
                return Offer::Closed(row);
            }
            let mut full = self.full.lock();
            if *full > 0 {
                *full -= 1;
                return Offer::Full(row);
            }
            self.accepted.lock().push(row);
            Offer::Accepted
        }

        fn finished(&self) {}
    }

    fn row(v: i64) -> Row {
        Row::new(vec![Scalar::I64(v)])
    }

    #[test]
    fn n_rejections_take_n_plus_one_attempts() {
        let stats = BridgeStats::new();
        for n in [0u64, 1, 4] {
            let inj = FlakyInjector::new(n);
            let d = offer_with_retry(&inj, row(1), Duration::ZERO, || true, &stats);
            assert_eq!(d, Delivery::Delivered { attempts: n + 1 });
            assert_eq!(inj.accepted.lock().len(), 1);
        }
        let s = stats.snapshot();
        assert_eq!(s.rows_delivered, 3);
        assert_eq!(s.retries, 5);
    }

    #[test]
    fn dead_consumer_abandons_the_row() {
        let stats = BridgeStats::new();
        let inj = FlakyInjector::new(10);
        let d = offer_with_retry(&inj, row(1), Duration::ZERO, || false, &stats);
        assert_eq!(d, Delivery::Abandoned { attempts: 1 });
        assert_eq!(stats.snapshot().rows_abandoned, 1);
    }

    #[test]
    fn closed_injector_abandons_at_once() {
        let stats = BridgeStats::new();
        let mut inj = FlakyInjector::new(0);
        inj.closed = true;
        let d = offer_with_retry(&inj, row(1), Duration::ZERO, || true, &stats);
        assert!(!d.is_delivered());
        assert_eq!(d.attempts(), 1);
    }

    /// Records how often it was stopped; never runs anything.
    struct CountingPipeline {
        def: PipelineDef,
        running: AtomicBool,
        stops: AtomicU64,
    }

    impl CountingPipeline {
        fn running() -> Arc<Self> {
            Arc::new(Self {
                def: PipelineDef::new("counting"),
                running: AtomicBool::new(true),
                stops: AtomicU64::new(0),
            })
        }

        fn stops(&self) -> u64 {
            self.stops.load(Ordering::SeqCst)
        }
    }

    impl Pipeline for CountingPipeline {
        fn definition(&self) -> &PipelineDef {
            &self.def
        }

        fn start(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }

        fn kill(&self) {
            self.stop();
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn is_stopped(&self) -> bool {
            !self.is_running()
        }

        fn is_finished(&self) -> bool {
            !self.is_running()
        }

        fn wait_until_finished(&self) {}

        fn step(&self, name: &str) -> Result<Arc<dyn StepInstance>, EngineError> {
            Err(EngineError::StepNotFound {
                pipeline: self.def.name.clone(),
                step: name.to_string(),
            })
        }

        fn step_schema(&self, name: &str) -> Result<Schema, EngineError> {
            Err(EngineError::StepNotFound {
                pipeline: self.def.name.clone(),
                step: name.to_string(),
            })
        }

        fn add_row_listener(&self, _step: &str, _listener: RowListener) -> Result<(), EngineError> {
            Ok(())
        }

        fn add_finish_listener(
            &self,
            _step: &str,
            _listener: FinishListener,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        fn injector(&self, step: &str) -> Result<Arc<dyn RowInjector>, EngineError> {
            Err(EngineError::NotAnInjector(step.to_string()))
        }

        fn set_variable(&self, _name: &str, _value: &str) {}

        fn variable(&self, _name: &str) -> Option<String> {
            None
        }
    }

    fn bridge_over(source: &Arc<CountingPipeline>) -> Arc<PipelineBridge> {
        PipelineBridge::new(
            Arc::clone(source) as Arc<dyn Pipeline>,
            CountingPipeline::running(),
            Arc::new(FlakyInjector::new(0)),
            Duration::ZERO,
            Arc::new(BridgeStats::new()),
            Arc::new(FailureSlot::default()),
        )
    }

    #[test]
    fn repeated_result_finish_stops_the_source_once() {
        let source = CountingPipeline::running();
        let bridge = bridge_over(&source);

        bridge.on_result_finished(&StepOutcome::Finished);
        bridge.on_result_finished(&StepOutcome::Finished);

        assert_eq!(source.stops(), 1);
        assert_eq!(bridge.stats().snapshot().source_stops, 1);
        assert!(!bridge.stop_source());
        assert_eq!(source.stops(), 1);
    }

    #[test]
    fn concurrent_result_finish_stops_the_source_once() {
        let source = CountingPipeline::running();
        let bridge = bridge_over(&source);

        std::thread::scope(|s| {
            for _ in 0..2 {
                let bridge = Arc::clone(&bridge);
                s.spawn(move || bridge.on_result_finished(&StepOutcome::Finished));
            }
        });

        assert_eq!(source.stops(), 1);
        assert_eq!(bridge.stats().snapshot().source_stops, 1);
    }

    #[test]
    fn stopped_source_step_closes_the_query_input() {
        struct CountingFinish(AtomicU64);

        impl RowInjector for CountingFinish {
            fn offer(&self, row: Row, _timeout: Duration) -> Offer {
                Offer::Closed(row)
            }

            fn finished(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let injector = Arc::new(CountingFinish(AtomicU64::new(0)));
        let bridge = PipelineBridge::new(
            CountingPipeline::running(),
            CountingPipeline::running(),
            Arc::clone(&injector) as Arc<dyn RowInjector>,
            Duration::ZERO,
            Arc::new(BridgeStats::new()),
            Arc::new(FailureSlot::default()),
        );

        bridge.on_source_finished(&StepOutcome::Stopped);
        bridge.on_source_finished(&StepOutcome::Finished);

        assert_eq!(injector.0.load(Ordering::SeqCst), 1);
        assert!(bridge.failure.get().is_none());
    }
}
