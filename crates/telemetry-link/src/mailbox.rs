//! Single-slot last-writer-wins mailbox.
//!
//! The channel holds at most one pending value. `publish` overwrites whatever
//! is in the slot without ever blocking; each subscriber tracks the sequence
//! number of the value it last consumed, so a blocked `recv` wakes only for
//! values it has not seen and a slow subscriber silently skips everything
//! published while it was busy.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

use thiserror::Error;

/// Returned by `recv` once every publisher handle has been dropped and the
/// subscriber has already consumed the final value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("mailbox has no remaining publishers")]
pub struct Disconnected;

struct Slot<T> {
    value: Option<T>,
    seq: u64,
    publishers: usize,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    signal: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Publishing half of the mailbox. Cloning shares the same slot.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

/// Subscribing half. Each subscriber owns an independent cursor; one
/// subscriber consuming a value never hides it from another.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
    cursor: u64,
}

/// Create a connected publisher/subscriber pair over a fresh slot.
pub fn latest<T: Clone>() -> (Publisher<T>, Subscriber<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: None,
            seq: 0,
            publishers: 1,
        }),
        signal: Condvar::new(),
    });
    let publisher = Publisher {
        shared: shared.clone(),
    };
    let subscriber = Subscriber { shared, cursor: 0 };
    (publisher, subscriber)
}

impl<T: Clone> Publisher<T> {
    /// Replace the pending value and wake every blocked subscriber. Never
    /// blocks; an unconsumed previous value is discarded.
    pub fn publish(&self, value: T) {
        let mut slot = self.shared.lock();
        slot.value = Some(value);
        slot.seq += 1;
        drop(slot);
        self.shared.signal.notify_all();
    }

    /// Create an additional subscriber. Its first `recv` returns the newest
    /// value already in the slot, if any.
    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            shared: self.shared.clone(),
            cursor: 0,
        }
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        let mut slot = self.shared.lock();
        slot.publishers += 1;
        drop(slot);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.lock();
        slot.publishers = slot.publishers.saturating_sub(1);
        let last = slot.publishers == 0;
        drop(slot);
        if last {
            self.shared.signal.notify_all();
        }
    }
}

impl<T: Clone> Subscriber<T> {
    /// Block until a value newer than the last one this subscriber consumed
    /// is available, then return it. The same published value is never
    /// delivered twice to the same subscriber.
    pub fn recv(&mut self) -> Result<T, Disconnected> {
        let mut slot = self.shared.lock();
        loop {
            if let Some(value) = Self::take_unseen(&mut self.cursor, &mut slot) {
                return Ok(value);
            }
            if slot.publishers == 0 {
                return Err(Disconnected);
            }
            slot = match self.shared.signal.wait(slot) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Like `recv`, but give up after `timeout` and return `Ok(None)` so
    /// callers can interleave shutdown checks with blocking waits.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<T>, Disconnected> {
        let deadline = std::time::Instant::now() + timeout;
        let mut slot = self.shared.lock();
        loop {
            if let Some(value) = Self::take_unseen(&mut self.cursor, &mut slot) {
                return Ok(Some(value));
            }
            if slot.publishers == 0 {
                return Err(Disconnected);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _timed_out) = match self.shared.signal.wait_timeout(slot, deadline - now) {
                Ok(result) => result,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot = guard;
        }
    }

    /// Return the newest unseen value without blocking.
    pub fn try_recv(&mut self) -> Result<Option<T>, Disconnected> {
        let mut slot = self.shared.lock();
        if let Some(value) = Self::take_unseen(&mut self.cursor, &mut slot) {
            return Ok(Some(value));
        }
        if slot.publishers == 0 {
            return Err(Disconnected);
        }
        Ok(None)
    }

    /// Create a fresh subscription over the same slot with its own cursor.
    pub fn resubscribe(&self) -> Subscriber<T> {
        Subscriber {
            shared: self.shared.clone(),
            cursor: 0,
        }
    }

    fn take_unseen(cursor: &mut u64, slot: &mut MutexGuard<'_, Slot<T>>) -> Option<T> {
        if slot.seq > *cursor {
            *cursor = slot.seq;
            slot.value.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Instant};

    #[test]
    fn recv_returns_only_the_newest_publish() {
        let (tx, mut rx) = latest::<u32>();
        for n in 1..=50 {
            tx.publish(n);
        }
        assert_eq!(rx.recv(), Ok(50));
    }

    #[test]
    fn publish_never_blocks_without_consumers() {
        let (tx, _rx) = latest::<Vec<u8>>();
        let start = Instant::now();
        for _ in 0..10_000 {
            tx.publish(vec![0u8; 64]);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn same_value_is_not_delivered_twice() {
        let (tx, mut rx) = latest::<u32>();
        tx.publish(7);
        assert_eq!(rx.recv(), Ok(7));
        assert_eq!(rx.try_recv(), Ok(None));
        assert_eq!(rx.recv_timeout(Duration::from_millis(20)), Ok(None));
    }

    #[test]
    fn subscribers_have_independent_cursors() {
        let (tx, mut first) = latest::<u32>();
        let mut second = tx.subscribe();
        tx.publish(1);
        assert_eq!(first.recv(), Ok(1));
        tx.publish(2);
        assert_eq!(first.recv(), Ok(2));
        // The second subscriber never consumed anything, so it sees only the
        // newest value, once.
        assert_eq!(second.recv(), Ok(2));
        assert_eq!(second.try_recv(), Ok(None));
    }

    #[test]
    fn late_subscriber_receives_current_value() {
        let (tx, _rx) = latest::<u32>();
        tx.publish(9);
        let mut late = tx.subscribe();
        assert_eq!(late.recv(), Ok(9));
    }

    #[test]
    fn recv_blocks_until_a_publish_arrives() {
        let (tx, mut rx) = latest::<u32>();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(30));
        tx.publish(42);
        assert_eq!(handle.join().expect("receiver thread panicked"), Ok(42));
    }

    #[test]
    fn dropping_all_publishers_disconnects_after_final_value() {
        let (tx, mut rx) = latest::<u32>();
        tx.publish(3);
        drop(tx);
        assert_eq!(rx.recv(), Ok(3));
        assert_eq!(rx.recv(), Err(Disconnected));
    }
}
