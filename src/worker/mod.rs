//! Consumer workers
//!
//! Both workers share one loop: block on the subscription, hand each
//! message to a [`MessageHandler`], log handler failures and move on. The
//! read offset advances whether or not the handler succeeded; there is no
//! retry of individual messages. What happens on a broker read error is
//! decided by the [`ReadErrorPolicy`] each worker is started with.

pub mod alert_writer;
pub mod dead_letter;
pub mod indexer;

pub use alert_writer::AlertWriter;
pub use dead_letter::DeadLetter;
pub use indexer::EventIndexer;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::broker::{BrokerError, Delivery, Subscription};
use crate::index::IndexError;
use crate::persistence::PersistenceError;

/// Failure to process a single message; never stops the loop
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("index write failed: {0}")]
    Index(#[from] IndexError),

    #[error("store write failed: {0}")]
    Store(#[from] PersistenceError),

    #[error("store write timed out after {0:?}")]
    Timeout(Duration),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Reason a consumer loop stopped
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to subscribe: {0}")]
    Subscribe(BrokerError),

    #[error("{worker} read failed: {source}")]
    Read {
        worker: &'static str,
        #[source]
        source: BrokerError,
    },
}

/// What a worker does when reading from the broker fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorPolicy {
    /// Log, sleep for `backoff`, and keep reading
    Retry { backoff: Duration },
    /// Stop the loop and return the error to the caller
    Exit,
}

/// Per-message logic of a worker
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Drive `handler` from `subscription` until a read error ends the loop
///
/// With [`ReadErrorPolicy::Retry`] this only returns if the future is
/// dropped. Failed messages are forwarded to `dead_letter` when one is
/// given.
pub async fn run_consumer<S, H>(
    subscription: &mut S,
    handler: &H,
    policy: ReadErrorPolicy,
    dead_letter: Option<&DeadLetter>,
) -> Result<(), WorkerError>
where
    S: Subscription + ?Sized,
    H: MessageHandler + ?Sized,
{
    loop {
        let delivery = match subscription.next_message().await {
            Ok(delivery) => delivery,
            Err(e) => match policy {
                ReadErrorPolicy::Retry { backoff } => {
                    log::error!("{} read error: {}", handler.name(), e);
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                ReadErrorPolicy::Exit => {
                    return Err(WorkerError::Read {
                        worker: handler.name(),
                        source: e,
                    });
                }
            },
        };

        match handler.handle(&delivery).await {
            Ok(()) => log::debug!(
                "{} handled topic={} partition={} offset={}",
                handler.name(),
                delivery.topic,
                delivery.partition,
                delivery.offset
            ),
            Err(e) => {
                log::error!(
                    "{} failed topic={} partition={} offset={}: {}",
                    handler.name(),
                    delivery.topic,
                    delivery.partition,
                    delivery.offset,
                    e
                );
                if let Some(dead_letter) = dead_letter {
                    dead_letter.forward(&delivery, &e).await;
                }
            }
        }
    }
}
