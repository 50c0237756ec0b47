//! Push streams with explicit subscriptions
//!
//! A [`Feed`] fans values out to every live [`Subscription`]. Dropping a
//! subscription unsubscribes it. Slow subscribers skip ahead instead of
//! queueing without bound.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Buffered values per subscriber before it starts skipping
const FEED_CAPACITY: usize = 64;

/// Which published value a new subscriber receives first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Never,
    Latest,
    First,
}

struct FeedInner<T> {
    tx: Option<broadcast::Sender<T>>,
    latest: Option<T>,
    replay: Replay,
}

/// Publisher side of a push stream
pub struct Feed<T> {
    inner: Mutex<FeedInner<T>>,
}

impl<T: Clone + Send + 'static> Feed<T> {
    /// An event feed: subscribers only see values published after subscribing
    pub fn new() -> Self {
        Self::build(None, Replay::Never)
    }

    /// New subscribers first receive the earliest value ever published
    pub fn with_first_replay() -> Self {
        Self::build(None, Replay::First)
    }

    /// A state feed: new subscribers first receive the latest published value,
    /// starting with `initial`
    pub fn with_value(initial: T) -> Self {
        Self::build(Some(initial), Replay::Latest)
    }

    fn build(latest: Option<T>, replay: Replay) -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Mutex::new(FeedInner {
                tx: Some(tx),
                latest,
                replay,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a value, returning how many subscribers it reached
    pub fn publish(&self, value: T) -> usize {
        let mut inner = self.lock();
        match inner.replay {
            Replay::Latest => inner.latest = Some(value.clone()),
            Replay::First if inner.latest.is_none() => inner.latest = Some(value.clone()),
            _ => {}
        }
        match &inner.tx {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to the feed
    pub fn subscribe(&self) -> Subscription<T> {
        let inner = self.lock();
        match &inner.tx {
            Some(tx) => Subscription {
                rx: tx.subscribe(),
                pending: inner.latest.clone(),
            },
            None => Subscription::closed(),
        }
    }

    /// The value a new subscriber would receive first
    #[cfg(test)]
    pub fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }

    /// Close the feed; every subscription ends after draining
    pub fn close(&self) {
        self.lock().tx.take();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().tx.is_none()
    }

    /// Number of live subscriptions
    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.lock().tx.as_ref().map_or(0, |tx| tx.receiver_count())
    }
}

impl<T: Clone + Send + 'static> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a push stream
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    pending: Option<T>,
}

impl<T: Clone> Subscription<T> {
    fn closed() -> Self {
        let (_, rx) = broadcast::channel(1);
        Self { rx, pending: None }
    }

    /// Next value, or `None` once the feed has closed.
    ///
    /// Cancel safe: dropping the future loses no value.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscription lagged, skipped {} values", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
