//! One-shot completion handles returned by every collaborator command.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// The consumer side of a collaborator command.
///
/// Resolves to `Some(value)` once the collaborator completes the command, or
/// `None` if the collaborator dropped it. Dropping the `Pending` tells the
/// collaborator the result is no longer wanted.
#[derive(Debug)]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

/// The producer side of a collaborator command.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<T>,
}

/// Create a linked command handle pair.
pub fn pending<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Pending { rx })
}

impl<T> Pending<T> {
    /// A command that is already complete.
    pub fn ready(value: T) -> Self {
        let (done, pending) = pending();
        done.complete(value);
        pending
    }
}

impl<T> Future for Pending<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

impl<T> Completer<T> {
    /// Deliver the result. A result nobody waits for anymore is discarded.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(value);
    }

    /// True once the matching [`Pending`] was dropped.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the matching [`Pending`] is dropped.
    pub async fn cancelled(&mut self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_resolves() {
        assert_eq!(Pending::ready(7).await, Some(7));
    }

    #[tokio::test]
    async fn test_dropped_completer_resolves_to_none() {
        let (done, pending) = pending::<bool>();
        drop(done);
        assert_eq!(pending.await, None);
    }

    #[tokio::test]
    async fn test_completer_sees_cancellation() {
        let (mut done, pending) = pending::<bool>();
        assert!(!done.is_cancelled());
        drop(pending);
        done.cancelled().await;
        assert!(done.is_cancelled());
    }
}
