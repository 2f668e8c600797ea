//! Event Bus
//!
//! Maps each event kind to its subscribers. A subscription is a named handler
//! plus the executor it runs on; publishing queues one job per subscriber on that
//! executor, keyed by the event's origin node, and returns without waiting.

use anyhow::Result;
use dashmap::{DashMap, DashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::types::{EventKind, ReportEvent};
use crate::executor::{AffinityPool, DispatchError};

/// Type-erased async handler.
pub type EventHandlerFn =
    Arc<dyn Fn(ReportEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    name: String,
    handler: EventHandlerFn,
    executor: Arc<AffinityPool>,
}

pub struct EventBus {
    subscriptions: DashMap<EventKind, Vec<Subscription>>,
    silent: DashSet<EventKind>,
    closed: AtomicBool,
    published: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: DashMap::new(),
            silent: DashSet::new(),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
        })
    }

    /// Binds `handler` to `kind` on `executor`. Subscribing again under the same
    /// name replaces the previous binding, so a (kind, handler) pair has exactly one executor.
    pub fn subscribe<F, Fut>(
        &self,
        kind: EventKind,
        name: &str,
        executor: Arc<AffinityPool>,
        handler: F,
    ) where
        F: Fn(ReportEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: EventHandlerFn = Arc::new(move |event: ReportEvent| {
            Box::pin(handler(event)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        let subscription = Subscription {
            name: name.to_string(),
            handler,
            executor,
        };

        let mut subs = self.subscriptions.entry(kind).or_default();
        if let Some(i) = subs.iter().position(|s| s.name == name) {
            subs[i] = subscription;
        } else {
            subs.push(subscription);
        }

        tracing::info!("Subscribed {} to {:?}", name, kind);
    }

    /// Silent kinds are only logged at trace level.
    pub fn set_silent(&self, kind: EventKind, silent: bool) {
        if silent {
            self.silent.insert(kind);
        } else {
            self.silent.remove(&kind);
        }
    }

    pub fn is_silent(&self, kind: EventKind) -> bool {
        self.silent.contains(&kind)
    }

    /// Queues the event for every subscriber. Returns how many accepted it.
    ///
    /// Fails only when no subscriber accepted it (bus closed, or every lane full).
    pub fn publish(&self, event: ReportEvent) -> Result<usize, DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed("event-bus".to_string()));
        }

        let kind = event.kind();
        let origin = event.origin();
        let subs: Vec<Subscription> = self
            .subscriptions
            .get(&kind)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        if subs.is_empty() {
            tracing::debug!("No subscriber for {:?} from node {}", kind, origin);
            return Ok(0);
        }

        if self.is_silent(kind) {
            tracing::trace!("Publishing {:?} from node {}", kind, origin);
        } else {
            tracing::debug!("Publishing {:?} from node {} to {} handlers", kind, origin, subs.len());
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        let mut accepted = 0;
        let mut last_error = None;
        for sub in subs {
            let label = format!("{}({:?})", sub.name, kind);
            let job = (sub.handler)(event.clone());
            match sub.executor.submit(origin, &label, job) {
                Ok(_) => accepted += 1,
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) if accepted == 0 => Err(e),
            _ => Ok(accepted),
        }
    }

    /// Rejects every later publish.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::info!("Event bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.subscriptions.get(&kind).map(|s| s.len()).unwrap_or(0)
    }

    pub fn handlers(&self, kind: EventKind) -> Vec<String> {
        self.subscriptions
            .get(&kind)
            .map(|s| s.iter().map(|sub| sub.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}
