use std::sync::Arc;
use tokio::sync::broadcast;

use crate::behavior::BehaviorState;

/// Broadcast topic with bounded capacity.
/// `T` must be `Send + Sync` because we hop across threads.
#[derive(Debug, Clone)]
pub struct Topic<T> {
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire and forget; nobody listening is fine.
    pub fn publish(&self, msg: T) {
        let _ = self.tx.send(Arc::new(msg));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

/// What the behavior tells the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Request (or withdraw) the go-home activity.
    ShouldGoHome(bool),
    /// Whether the engage activity may start.
    AllowGoEngage(bool),
    /// Request (or withdraw) the define-home activity.
    ShouldDefineHome(bool),
    StateChanged {
        from: BehaviorState,
        to: BehaviorState,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_gets_the_message() {
        let topic = Topic::new(4);
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();
        topic.publish(Signal::ShouldGoHome(true));
        assert_eq!(*a.recv().await.unwrap(), Signal::ShouldGoHome(true));
        assert_eq!(*b.recv().await.unwrap(), Signal::ShouldGoHome(true));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let topic: Topic<Signal> = Topic::new(1);
        topic.publish(Signal::AllowGoEngage(false));
    }
}
