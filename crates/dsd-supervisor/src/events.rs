//! Host event bus with explicit subscriptions.
//!
//! Every subscriber runs in its own task fed by a broadcast channel.
//! Dropping or disposing the returned [`Subscription`] stops delivery.

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::triggers::HostEvent;

/// Fan-out of host events to subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HostEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event, returning how many subscribers will see it.
    pub fn publish(&self, event: HostEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                log::debug!("No subscribers for {:?}", event);
                0
            }
        }
    }

    /// Run `handler` for every event published from now on.
    pub fn subscribe<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(HostEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Dropped {} host events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { task: Some(task) }
    }
}

/// Registration returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivering events.
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Subscriptions released together.
#[derive(Debug, Default)]
pub struct Disposables {
    items: Vec<Subscription>,
}

impl Disposables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Dispose every subscription, most recent first.
    pub fn dispose_all(&mut self) {
        while let Some(mut subscription) = self.items.pop() {
            subscription.dispose();
        }
    }
}

impl Drop for Disposables {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
