#![allow(dead_code)]

use std::time::Duration;

use broadcast_channel::Broadcaster;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for any single await in these tests.
pub const TEST_GUARD: Duration = Duration::from_secs(10);

/// Install a log subscriber once per test binary. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "broadcast_channel=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Subscribe a reader that collects everything until its endpoint closes.
pub async fn collecting_subscriber(b: &Broadcaster<i32>) -> JoinHandle<Vec<i32>> {
    let (tx, mut rx) = mpsc::channel(1);
    b.subscribe(tx).await.expect("subscribe on open broadcaster");
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(v) = rx.recv().await {
            seen.push(v);
        }
        seen
    })
}

pub async fn join<T>(handle: JoinHandle<T>) -> T {
    tokio::time::timeout(TEST_GUARD, handle)
        .await
        .expect("subscriber should finish")
        .expect("subscriber should not panic")
}

pub async fn wait_for_subscribers(b: &Broadcaster<i32>, n: usize) {
    tokio::time::timeout(TEST_GUARD, async {
        while b.subscriber_count() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count should settle");
}
