pub mod broadcaster;
pub mod config;

pub use broadcaster::{BroadcastError, Broadcaster, Producer, SubscriberId};
pub use config::BroadcasterConfig;
