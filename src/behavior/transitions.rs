use parking_lot::Mutex;

#[derive(Debug)]
struct Slot<T> {
    draining: bool,
    pending: Option<T>,
}

/// Single-slot mailbox where a newer request replaces an unprocessed one.
///
/// The first caller of [`offer`](Self::offer) becomes the drainer and keeps
/// calling [`next`](Self::next) until it returns `None`; everyone else just
/// leaves their request in the slot.
#[derive(Debug)]
pub struct LatestWins<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for LatestWins<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                draining: false,
                pending: None,
            }),
        }
    }
}

impl<T> LatestWins<T> {
    /// Store `request`. Returns true if the caller must drain.
    pub fn offer(&self, request: T) -> bool {
        let mut slot = self.slot.lock();
        slot.pending = Some(request);
        if slot.draining {
            return false;
        }
        slot.draining = true;
        true
    }

    /// Take the pending request, or release the drainer role when there is none.
    pub fn next(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        let request = slot.pending.take();
        if request.is_none() {
            slot.draining = false;
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_offer_drains() {
        let slot = LatestWins::default();
        assert!(slot.offer(1));
        assert_eq!(slot.next(), Some(1));
        assert_eq!(slot.next(), None);
        // released: the next offer drains again
        assert!(slot.offer(2));
    }

    #[test]
    fn test_only_latest_survives() {
        let slot = LatestWins::default();
        assert!(slot.offer("going_home"));
        assert_eq!(slot.next(), Some("going_home"));
        // requests arriving while the first one is processed
        assert!(!slot.offer("wandering"));
        assert!(!slot.offer("going_home"));
        assert!(!slot.offer("wandering"));
        assert_eq!(slot.next(), Some("wandering"));
        assert_eq!(slot.next(), None);
    }
}
