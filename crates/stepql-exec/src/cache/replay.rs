//! Feeds a cached run into a query pipeline's injector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use stepql_engine::{EngineError, Pipeline, RowInjector};

use super::CacheEntry;
use crate::bridge::{offer_with_retry, BridgeStats, Delivery};
use crate::error::ExecError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("replay thread ended without reporting")]
    Interrupted,
}

/// Where a replay goes and when it must stop.
pub struct ReplayTarget {
    pub injector: Arc<dyn RowInjector>,
    pub query: Arc<dyn Pipeline>,
    /// Set once the query's result step has finished.
    pub result_finished: Arc<AtomicBool>,
    pub offer_timeout: Duration,
    pub stats: Arc<BridgeStats>,
}

impl ReplayTarget {
    fn should_stop(&self) -> bool {
        self.result_finished.load(Ordering::Acquire)
            || self.query.is_stopped()
            || self.query.is_finished()
    }
}

pub struct Replayer {
    future: Shared<BoxFuture<'static, Result<u64, ReplayError>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Replayer {
    /// Replay `entry` on a dedicated thread, delivering at most `limit` rows.
    pub fn spawn(
        entry: Arc<CacheEntry>,
        target: ReplayTarget,
        limit: Option<u64>,
    ) -> Result<Self, ExecError> {
        let (tx, rx) = oneshot::channel();
        let handle = thread::Builder::new()
            .name("stepql-replay".into())
            .spawn(move || {
                let delivered = replay(&entry, &target, limit);
                let _ = tx.send(delivered);
            })
            .map_err(|e| EngineError::Thread(e.to_string()))?;
        let future = rx
            .map(|r| r.map_err(|_| ReplayError::Interrupted))
            .boxed()
            .shared();
        Ok(Self {
            future,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Resolves to the number of rows delivered.
    pub fn future(&self) -> Shared<BoxFuture<'static, Result<u64, ReplayError>>> {
        self.future.clone()
    }

    /// Block until the replay thread is done.
    pub fn wait(&self) -> Result<u64, ReplayError> {
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                return Err(ReplayError::Interrupted);
            }
        }
        futures::executor::block_on(self.future())
    }
}

fn replay(entry: &CacheEntry, target: &ReplayTarget, limit: Option<u64>) -> u64 {
    let cap = limit
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX)
        .min(entry.rows.len());
    debug!(rows = entry.rows.len(), cap, "replaying cached rows");
    let mut delivered = 0u64;
    for row in entry.rows.iter().take(cap) {
        if target.should_stop() {
            debug!(delivered, "query done, replay stops early");
            break;
        }
        let query = &target.query;
        match offer_with_retry(
            target.injector.as_ref(),
            row.clone(),
            target.offer_timeout,
            || query.is_running(),
            &target.stats,
        ) {
            Delivery::Delivered { .. } => delivered += 1,
            Delivery::Abandoned { .. } => break,
        }
    }
    target.injector.finished();
    delivered
}
