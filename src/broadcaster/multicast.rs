//! One delivery round: hand a single value to every registered endpoint.
//!
//! A round runs in two phases against a single deadline taken when the round
//! starts:
//!
//! 1. **Probe.** Every endpoint gets a non-blocking `try_send`. Most rounds end
//!    here: endpoints with spare buffer accept immediately, and endpoints whose
//!    receiver is gone are classified as closed without ever blocking.
//! 2. **Wait-set.** Endpoints that were full get one pending `send` each in a
//!    `FuturesUnordered`, raced against the deadline. Each completed send is
//!    removed on its own and the rest keep waiting. A send that fails because
//!    the subscriber closed its receiver mid-wait is classified as closed.
//!
//! Whatever is still outstanding when the deadline fires is a slow consumer.
//! Closed and slow endpoints are removed from the registry and their sender is
//! dropped once the round is over.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use super::registry::{Registry, SubscriberId};

/// Outcome of a single attempt to hand a value to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Accepted,
    Blocked,
    Closed,
}

/// Non-blocking attempt to deliver `value` to `tx`.
pub(crate) fn try_deliver<T>(tx: &mpsc::Sender<T>, value: T) -> Delivery {
    match tx.try_send(value) {
        Ok(()) => Delivery::Accepted,
        Err(TrySendError::Full(_)) => Delivery::Blocked,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RoundReport {
    pub delivered: usize,
    pub closed: Vec<SubscriberId>,
    pub timed_out: Vec<SubscriberId>,
}

impl RoundReport {
    pub fn evicted(&self) -> usize {
        self.closed.len() + self.timed_out.len()
    }
}

/// Deliver `value` to every endpoint in `registry`, waiting at most `timeout`
/// in total. `None` (or a timeout too large to represent as a deadline) waits
/// until every live endpoint has accepted.
pub(crate) async fn broadcast<T>(
    registry: &mut Registry<T>,
    value: T,
    timeout: Option<Duration>,
) -> RoundReport
where
    T: Clone + Send,
{
    let deadline = timeout.and_then(|d| Instant::now().checked_add(d));
    let mut report = RoundReport::default();

    if registry.is_empty() {
        return report;
    }

    let mut outstanding = HashSet::new();
    for sub in registry.iter() {
        match try_deliver(&sub.tx, value.clone()) {
            Delivery::Accepted => report.delivered += 1,
            Delivery::Blocked => {
                outstanding.insert(sub.id);
            }
            Delivery::Closed => report.closed.push(sub.id),
        }
    }

    if !outstanding.is_empty() {
        tracing::trace!(blocked = outstanding.len(), "waiting on full endpoints");
        wait_for_blocked(registry, value, deadline, &mut outstanding, &mut report).await;

        // Anything left over missed the deadline. Keep registry order so
        // eviction is deterministic.
        report.timed_out = registry
            .iter()
            .map(|s| s.id)
            .filter(|id| outstanding.contains(id))
            .collect();
    }

    for &id in &report.closed {
        if let Some(sub) = registry.remove(id) {
            let closure = sub.close();
            tracing::debug!(subscriber = %id, ?closure, "subscriber closed its endpoint, evicted");
        }
    }
    for &id in &report.timed_out {
        if let Some(sub) = registry.remove(id) {
            let closure = sub.close();
            tracing::warn!(subscriber = %id, ?timeout, ?closure, "slow subscriber evicted");
        }
    }

    report
}

async fn wait_for_blocked<T>(
    registry: &Registry<T>,
    value: T,
    deadline: Option<Instant>,
    outstanding: &mut HashSet<SubscriberId>,
    report: &mut RoundReport,
) where
    T: Clone + Send,
{
    let mut wait_set: FuturesUnordered<_> = registry
        .iter()
        .filter(|s| outstanding.contains(&s.id))
        .map(|sub| {
            let value = value.clone();
            async move { (sub.id, sub.tx.send(value).await.is_ok()) }
        })
        .collect();
    drop(value);

    let expired = expire(deadline);
    tokio::pin!(expired);

    loop {
        tokio::select! {
            // A send that is ready at the same instant as the deadline still counts.
            biased;

            next = wait_set.next() => match next {
                Some((id, accepted)) => {
                    outstanding.remove(&id);
                    if accepted {
                        tracing::trace!(subscriber = %id, "blocked endpoint accepted");
                        report.delivered += 1;
                    } else {
                        report.closed.push(id);
                    }
                }
                None => break,
            },
            () = &mut expired => break,
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
