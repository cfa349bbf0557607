use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::multicast;
use super::registry::{Closure, Registry, SubscriberId};

/// Registration request sent by `Broadcaster::subscribe`.
///
/// The control loop answers on `ack` once the endpoint is in the registry.
/// Dropping the request unanswered tells the caller the broadcaster closed.
pub(crate) struct Subscription<T> {
    pub endpoint: mpsc::Sender<T>,
    pub ack: oneshot::Sender<SubscriberId>,
}

/// What the control loop publishes to every handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Status {
    pub subscribers: usize,
    pub closed: bool,
}

pub(crate) async fn run<T>(
    mut value_rx: mpsc::Receiver<T>,
    mut subscription_rx: mpsc::Receiver<Subscription<T>>,
    timeout_rx: watch::Receiver<Option<Duration>>,
    shutdown: CancellationToken,
    status_tx: watch::Sender<Status>,
) where
    T: Clone + Send + 'static,
{
    let mut registry = Registry::new();

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                tracing::debug!("close requested");
                break;
            }

            Some(Subscription { endpoint, ack }) = subscription_rx.recv() => {
                let id = registry.insert(endpoint);
                tracing::debug!(subscriber = %id, subscribers = registry.len(), "subscriber registered");
                publish(&status_tx, &registry);
                // The caller may have given up waiting; the endpoint stays registered.
                let _ = ack.send(id);
            }

            value = value_rx.recv() => match value {
                Some(value) => {
                    let timeout = *timeout_rx.borrow();
                    round(&mut registry, value, timeout, &status_tx).await;
                }
                None => {
                    tracing::debug!("every producer handle dropped");
                    break;
                }
            },
        }
    }

    // No more values or registrations from here on. Values that were already
    // queued still go out before the endpoints are closed.
    shutdown.cancel();
    value_rx.close();
    subscription_rx.close();

    let mut rejected = 0usize;
    while subscription_rx.try_recv().is_ok() {
        rejected += 1;
    }
    if rejected > 0 {
        tracing::debug!(rejected, "dropped pending subscriptions");
    }

    while let Some(value) = value_rx.recv().await {
        let timeout = *timeout_rx.borrow();
        round(&mut registry, value, timeout, &status_tx).await;
    }

    let mut already_closed = 0usize;
    let mut closed = 0usize;
    for sub in registry.drain() {
        match sub.close() {
            Closure::Closed => closed += 1,
            Closure::AlreadyClosed => already_closed += 1,
        }
    }
    tracing::debug!(closed, already_closed, "broadcaster closed");

    status_tx.send_replace(Status {
        subscribers: 0,
        closed: true,
    });
}

async fn round<T>(
    registry: &mut Registry<T>,
    value: T,
    timeout: Option<Duration>,
    status_tx: &watch::Sender<Status>,
) where
    T: Clone + Send + 'static,
{
    let report = multicast::broadcast(registry, value, timeout).await;
    tracing::trace!(
        delivered = report.delivered,
        closed = report.closed.len(),
        timed_out = report.timed_out.len(),
        "round complete"
    );
    if report.evicted() > 0 {
        publish(status_tx, registry);
    }
}

fn publish<T>(status_tx: &watch::Sender<Status>, registry: &Registry<T>) {
    status_tx.send_replace(Status {
        subscribers: registry.len(),
        closed: false,
    });
}
