use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

/// Cancellation point in time: an operation armed with a ticket honors every
/// trigger issued after the ticket was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CancelTicket(u64);

/// Abort flag shared between a running strategy and whoever cancels it.
///
/// Triggers are counted, never cleared. The interrupt reads as triggered while
/// the count is ahead of the armed ticket, so a cancel that lands before an
/// operation starts still stops it. [`Interrupt::reset`] consumes the pending
/// triggers once an operation is over.
#[derive(Debug)]
pub struct Interrupt {
    tx: watch::Sender<u64>,
    armed: AtomicU64,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            tx,
            armed: AtomicU64::new(0),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_modify(|count| *count += 1);
    }

    /// The current trigger count.
    pub fn ticket(&self) -> CancelTicket {
        CancelTicket(*self.tx.borrow())
    }

    /// The ticket the interrupt is armed with. Triggers issued since the last
    /// reset are ahead of it.
    pub fn armed_ticket(&self) -> CancelTicket {
        CancelTicket(self.armed.load(Ordering::SeqCst))
    }

    /// Honor only the triggers issued after `ticket`.
    pub fn arm(&self, ticket: CancelTicket) {
        self.armed.store(ticket.0, Ordering::SeqCst);
    }

    /// Consume every trigger issued so far.
    pub fn reset(&self) {
        self.arm(self.ticket());
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow() > self.armed.load(Ordering::SeqCst)
    }

    /// Resolves once the interrupt is triggered.
    pub async fn wait(&self) {
        let armed = self.armed.load(Ordering::SeqCst);
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|count| *count > armed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_after_trigger() {
        let interrupt = std::sync::Arc::new(Interrupt::new());
        let waiter = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move { interrupt.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        interrupt.trigger();
        waiter.await.unwrap();
        assert!(interrupt.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rearms() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        interrupt.wait().await;
        interrupt.reset();
        assert!(!interrupt.is_triggered());
        let waited = tokio::time::timeout(Duration::from_secs(1), interrupt.wait()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_trigger_before_arming_is_kept() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        // arming with the standing ticket keeps the earlier trigger
        interrupt.arm(interrupt.armed_ticket());
        assert!(interrupt.is_triggered());
    }

    #[test]
    fn test_ticket_ignores_older_triggers() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let ticket = interrupt.ticket();
        interrupt.arm(ticket);
        assert!(!interrupt.is_triggered());
        interrupt.trigger();
        assert!(interrupt.is_triggered());
    }
}
