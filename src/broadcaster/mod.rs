//! Single-producer, multi-consumer value fan-out.
//!
//! A [`Broadcaster`] takes values from a producer through a bounded queue and
//! forwards each one to every subscribed endpoint. Subscribers hand in the
//! sending half of their own `mpsc` channel and keep the receiver.
//!
//! ```text
//!   producer ──► value queue ──┐
//!                              ├──► control loop ──► round ──► endpoint 1
//!   subscribe() ─► requests ───┘    (owns registry)       ├──► endpoint 2
//!                                                         └──► endpoint N
//! ```
//!
//! A spawned control loop owns the subscriber registry and is the only code
//! that touches it. Each value is delivered in a *round* that ends when every
//! endpoint accepted it or when the round timeout elapses. Endpoints still
//! full at that point are evicted and closed. Endpoints whose receiver was
//! closed are evicted as soon as a delivery attempt notices it, without
//! waiting for the timeout.
//!
//! Without a timeout the broadcaster is a strict synchronous fan-out: a round
//! waits for the slowest live subscriber.

mod multicast;
mod producer;
mod registry;
mod task;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::BroadcasterConfig;

pub use producer::Producer;
pub use registry::SubscriberId;

use task::{Status, Subscription};

/// Registration requests in flight at once. Each caller waits for its ack, so
/// this only bounds how many callers can be queued.
const SUBSCRIPTION_QUEUE_CAPACITY: usize = 16;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("broadcaster is already closed")]
    AlreadyClosed,
}

/// Handle to a running broadcaster. Cheap to clone; every clone talks to the
/// same control loop.
///
/// Dropping every handle (and every [`Producer`] returned by [`chan`](Self::chan))
/// shuts the broadcaster down just like [`close`](Self::close).
pub struct Broadcaster<T> {
    producer: Producer<T>,
    subscription_tx: mpsc::Sender<Subscription<T>>,
    timeout_tx: Arc<watch::Sender<Option<Duration>>>,
    status_rx: watch::Receiver<Status>,
    shutdown: CancellationToken,
    closing: Arc<AtomicBool>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            subscription_tx: self.subscription_tx.clone(),
            timeout_tx: Arc::clone(&self.timeout_tx),
            status_rx: self.status_rx.clone(),
            shutdown: self.shutdown.clone(),
            closing: Arc::clone(&self.closing),
        }
    }
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Spawn a broadcaster whose value queue holds `buffer_size` values.
    ///
    /// Must be called from within a tokio runtime. A `buffer_size` of zero is
    /// treated as one.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_config(BroadcasterConfig {
            buffer_size,
            ..Default::default()
        })
    }

    pub fn with_config(config: BroadcasterConfig) -> Self {
        let (value_tx, value_rx) = mpsc::channel(config.queue_capacity());
        let (subscription_tx, subscription_rx) = mpsc::channel(SUBSCRIPTION_QUEUE_CAPACITY);
        let (timeout_tx, timeout_rx) = watch::channel(config.timeout());
        let (status_tx, status_rx) = watch::channel(Status::default());
        let shutdown = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));

        let loop_shutdown = shutdown.clone();
        let loop_closing = Arc::clone(&closing);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(task::run(
                value_rx,
                subscription_rx,
                timeout_rx,
                loop_shutdown.clone(),
                status_tx,
            ))
            .catch_unwind()
            .await;
            if let Err(e) = result {
                // The registry went down with the task, so every endpoint is
                // already closed. Make the handles see it as closed too.
                tracing::error!("broadcaster control loop panicked: {:?}", e);
                loop_closing.store(true, Ordering::SeqCst);
                loop_shutdown.cancel();
            }
        });

        tracing::debug!(
            buffer_size = config.queue_capacity(),
            timeout = ?config.timeout(),
            "broadcaster started"
        );

        Self {
            producer: Producer::new(value_tx, shutdown.clone()),
            subscription_tx,
            timeout_tx: Arc::new(timeout_tx),
            status_rx,
            shutdown,
            closing,
        }
    }

    /// Bound every round to `timeout`. Subscribers that have not accepted a
    /// value by then are evicted and their endpoint closed.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(Some(timeout));
        self
    }

    /// Change the round timeout. Takes effect from the next round; `None`
    /// waits forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.timeout_tx.send_replace(timeout);
    }

    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout_tx.borrow()
    }

    /// Producer-facing queue. Sends fail once [`close`](Self::close) has
    /// returned.
    pub fn chan(&self) -> Producer<T> {
        self.producer.clone()
    }

    /// Queue one value for broadcasting. Waits only for room in the value
    /// queue, not for delivery.
    pub async fn send(&self, value: T) -> Result<(), BroadcastError> {
        self.producer
            .send(value)
            .await
            .map_err(|_| BroadcastError::AlreadyClosed)
    }

    /// Register `endpoint` to receive every value broadcast from now on.
    ///
    /// Returns once the control loop has added the endpoint, so any value this
    /// caller sends afterwards reaches it. On error the endpoint is dropped.
    pub async fn subscribe(&self, endpoint: mpsc::Sender<T>) -> Result<SubscriberId, BroadcastError> {
        if self.shutdown.is_cancelled() {
            return Err(BroadcastError::AlreadyClosed);
        }
        let (ack, registered) = oneshot::channel();
        self.subscription_tx
            .send(Subscription { endpoint, ack })
            .await
            .map_err(|_| BroadcastError::AlreadyClosed)?;
        registered.await.map_err(|_| BroadcastError::AlreadyClosed)
    }
}

impl<T> Broadcaster<T> {
    /// Stop accepting values and subscriptions. Values already queued are
    /// still broadcast, then every remaining endpoint is closed.
    ///
    /// Safe to call any number of times. Returns `true` only for the call
    /// that initiated shutdown.
    pub fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            tracing::debug!("broadcaster already closed");
            return false;
        }
        self.shutdown.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait until the control loop has finished tearing down.
    pub async fn closed(&self) {
        let mut rx = self.status_rx.clone();
        loop {
            if rx.borrow_and_update().closed {
                return;
            }
            if rx.changed().await.is_err() {
                // Control loop is gone.
                return;
            }
        }
    }

    /// Number of registered subscribers as last reported by the control loop.
    pub fn subscriber_count(&self) -> usize {
        self.status_rx.borrow().subscribers
    }
}
