//! Affinity Lane Pool
//!
//! A fixed set of lanes, each a bounded queue drained by one worker task.
//! The first job from a node pins that node to a lane (round robin) and every
//! later job from it goes to the same lane, so one node's jobs run strictly in
//! submission order while different nodes' jobs run in parallel.
//!
//! ## Failure handling
//! - A job that returns `Err` or panics is logged; the lane moves on to the next job.
//! - A job running past the soft timeout is logged as slow but never cancelled.
//! - `shutdown` stops intake, lets queued jobs drain for the grace period, then aborts.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};

use super::types::{DispatchError, Envelope, PoolStats};
use crate::node::types::NodeId;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    slow: AtomicU64,
}

pub struct AffinityPool {
    name: String,
    lanes: usize,
    soft_timeout: Duration,
    senders: RwLock<Vec<mpsc::Sender<Envelope>>>,
    /// Held until `start` hands each receiver to its worker.
    receivers: Mutex<Vec<mpsc::Receiver<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: DashMap<usize, AbortHandle>,
    routes: DashMap<NodeId, usize>,
    next_lane: AtomicUsize,
    counters: Counters,
}

impl AffinityPool {
    pub fn new(name: &str, lanes: usize, queue_depth: usize, soft_timeout: Duration) -> Arc<Self> {
        let lanes = lanes.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..lanes).map(|_| mpsc::channel(queue_depth.max(1))).unzip();

        Arc::new(Self {
            name: name.to_string(),
            lanes,
            soft_timeout,
            senders: RwLock::new(senders),
            receivers: Mutex::new(receivers),
            workers: Mutex::new(Vec::new()),
            in_flight: DashMap::new(),
            routes: DashMap::new(),
            next_lane: AtomicUsize::new(0),
            counters: Counters::default(),
        })
    }

    /// A pool with one lane: every job runs in submission order.
    pub fn serial(name: &str, queue_depth: usize, soft_timeout: Duration) -> Arc<Self> {
        Self::new(name, 1, queue_depth, soft_timeout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Lane for `origin`, pinning it on first use.
    pub fn route(&self, origin: NodeId) -> usize {
        *self
            .routes
            .entry(origin)
            .or_insert_with(|| self.next_lane.fetch_add(1, Ordering::Relaxed) % self.lanes)
    }

    pub fn lane_of(&self, origin: &NodeId) -> Option<usize> {
        self.routes.get(origin).map(|lane| *lane)
    }

    /// Queues `job` on the origin's lane without waiting.
    pub fn submit<F>(&self, origin: NodeId, label: &str, job: F) -> Result<usize, DispatchError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let lane = self.route(origin);
        let senders = self.senders.read();
        let Some(tx) = senders.get(lane) else {
            return Err(DispatchError::Closed(self.name.clone()));
        };

        let envelope = Envelope {
            label: label.to_string(),
            job: Box::pin(job),
        };

        match tx.try_send(envelope) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(lane)
            }
            Err(TrySendError::Full(envelope)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[{}] lane {} full, dropping {} from node {}",
                    self.name,
                    lane,
                    envelope.label,
                    origin
                );
                Err(DispatchError::LaneFull {
                    pool: self.name.clone(),
                    lane,
                })
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed(self.name.clone())),
        }
    }

    /// Spawns one worker per lane. Jobs submitted before `start` are kept queued.
    pub fn start(self: &Arc<Self>) {
        let receivers = std::mem::take(&mut *self.receivers.lock());
        if receivers.is_empty() {
            tracing::debug!("[{}] already started", self.name);
            return;
        }

        let mut workers = self.workers.lock();
        for (lane, rx) in receivers.into_iter().enumerate() {
            let pool = self.clone();
            workers.push(tokio::spawn(async move {
                pool.lane_loop(lane, rx).await;
            }));
        }

        tracing::info!("[{}] started {} lanes", self.name, self.lanes);
    }

    async fn lane_loop(self: Arc<Self>, lane: usize, mut rx: mpsc::Receiver<Envelope>) {
        tracing::debug!("[{}] lane {} running", self.name, lane);

        while let Some(Envelope { label, job }) = rx.recv().await {
            let mut handle = tokio::spawn(job);
            self.in_flight.insert(lane, handle.abort_handle());

            let result = match tokio::time::timeout(self.soft_timeout, &mut handle).await {
                Ok(result) => result,
                Err(_) => {
                    self.counters.slow.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "[{}] lane {}: {} still running after {:?}",
                        self.name,
                        lane,
                        label,
                        self.soft_timeout
                    );
                    handle.await
                }
            };
            self.in_flight.remove(&lane);

            match result {
                Ok(Ok(())) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("[{}] lane {}: {} done", self.name, lane, label);
                }
                Ok(Err(e)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("[{}] lane {}: {} failed: {:#}", self.name, lane, label, e);
                }
                Err(e) if e.is_panic() => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("[{}] lane {}: {} panicked", self.name, lane, label);
                }
                Err(_) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("[{}] lane {}: {} was cancelled", self.name, lane, label);
                }
            }
        }

        tracing::debug!("[{}] lane {} drained", self.name, lane);
    }

    /// Stops intake and waits up to `grace` for queued jobs to finish.
    /// Returns `false` if lanes had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.senders.write().clear();
        self.receivers.lock().clear();
        let workers = std::mem::take(&mut *self.workers.lock());

        let deadline = tokio::time::Instant::now() + grace;
        let mut drained = true;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                drained = false;
                worker.abort();
            }
        }

        if !drained {
            for entry in self.in_flight.iter() {
                entry.value().abort();
            }
            self.in_flight.clear();
            tracing::warn!("[{}] grace period of {:?} expired, aborted remaining jobs", self.name, grace);
        } else {
            tracing::info!("[{}] drained", self.name);
        }
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.senders.read().is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        let queued = self
            .senders
            .read()
            .iter()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum();

        PoolStats {
            lanes: self.lanes,
            pinned_nodes: self.routes.len(),
            queued,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            slow: self.counters.slow.load(Ordering::Relaxed),
        }
    }
}
