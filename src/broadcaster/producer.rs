use tokio::sync::mpsc::{self, error::SendError};
use tokio_util::sync::CancellationToken;

/// Producer-facing end of the value queue, returned by
/// [`Broadcaster::chan`](super::Broadcaster::chan).
///
/// Once `close()` has returned, every send fails and hands the value back.
pub struct Producer<T> {
    tx: mpsc::Sender<T>,
    shutdown: CancellationToken,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T> Producer<T> {
    pub(crate) fn new(tx: mpsc::Sender<T>, shutdown: CancellationToken) -> Self {
        Self { tx, shutdown }
    }

    /// Queue `value`, waiting for room if the queue is full.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.shutdown.is_cancelled() {
            return Err(SendError(value));
        }
        let permit = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(SendError(value)),
            permit = self.tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(SendError(value)),
            },
        };
        // Close may have landed while we waited for capacity.
        if self.shutdown.is_cancelled() {
            return Err(SendError(value));
        }
        permit.send(value);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}
