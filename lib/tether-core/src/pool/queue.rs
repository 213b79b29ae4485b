use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// An item that records when it was last returned to an idle list.
pub(crate) trait Recyclable {
    fn recycled_at(&self) -> Instant;
}

/// Storage for idle workers.
///
/// Items are always inserted with a non-decreasing recycle timestamp, so every implementation keeps its items ordered
/// from oldest to newest and can find expired items with a prefix scan.
pub(crate) trait WorkerQueue<T: Recyclable>: Send {
    fn len(&self) -> usize;

    /// Adds an item, handing it back if the queue is full.
    fn insert(&mut self, item: T) -> Result<(), T>;

    /// Takes an item to reuse.
    fn detach(&mut self) -> Option<T>;

    /// Removes every item that has been idle for longer than `expiry`, as of `now`.
    fn retrieve_expired(&mut self, expiry: Duration, now: Instant) -> Vec<T>;

    /// Removes every item.
    fn reset(&mut self) -> Vec<T>;
}

fn expiry_cutoff(expiry: Duration, now: Instant) -> Option<Instant> {
    now.checked_sub(expiry)
}

/// A growable LIFO stack.
///
/// The most recently recycled worker is reused first, which leaves the oldest workers at the bottom where the
/// scavenger can find them.
pub(crate) struct WorkerStack<T> {
    items: Vec<T>,
}

impl<T> WorkerStack<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Recyclable + Send> WorkerQueue<T> for WorkerStack<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn insert(&mut self, item: T) -> Result<(), T> {
        self.items.push(item);
        Ok(())
    }

    fn detach(&mut self) -> Option<T> {
        self.items.pop()
    }

    fn retrieve_expired(&mut self, expiry: Duration, now: Instant) -> Vec<T> {
        let Some(cutoff) = expiry_cutoff(expiry, now) else {
            return Vec::new();
        };

        let expired = self.items.partition_point(|item| item.recycled_at() <= cutoff);
        self.items.drain(..expired).collect()
    }

    fn reset(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }
}

/// A fixed-capacity FIFO ring, allocated once up front.
pub(crate) struct LoopQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> LoopQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }
}

impl<T: Recyclable + Send> WorkerQueue<T> for LoopQueue<T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn insert(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }

        self.items.push_back(item);
        Ok(())
    }

    fn detach(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    fn retrieve_expired(&mut self, expiry: Duration, now: Instant) -> Vec<T> {
        let Some(cutoff) = expiry_cutoff(expiry, now) else {
            return Vec::new();
        };

        let expired = self.items.partition_point(|item| item.recycled_at() <= cutoff);
        self.items.drain(..expired).collect()
    }

    fn reset(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Stamp(Instant);

    impl Recyclable for Stamp {
        fn recycled_at(&self) -> Instant {
            self.0
        }
    }

    // Builds a queue whose items were recycled at `base + offset` for each (sorted) offset, in milliseconds.
    fn fill<Q: WorkerQueue<Stamp>>(queue: &mut Q, base: Instant, mut offsets: Vec<u64>) -> Vec<Instant> {
        offsets.sort_unstable();
        offsets
            .into_iter()
            .map(|offset| {
                let at = base + Duration::from_millis(offset);
                queue.insert(Stamp(at)).unwrap();
                at
            })
            .collect()
    }

    #[test]
    fn stack_is_lifo() {
        let base = Instant::now();
        let mut stack = WorkerStack::new();
        fill(&mut stack, base, vec![1, 2, 3]);

        assert_eq!(stack.detach(), Some(Stamp(base + Duration::from_millis(3))));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn loop_queue_is_fifo_and_bounded() {
        let base = Instant::now();
        let mut queue = LoopQueue::with_capacity(2);
        fill(&mut queue, base, vec![1, 2]);

        assert!(queue.insert(Stamp(base)).is_err());
        assert_eq!(queue.detach(), Some(Stamp(base + Duration::from_millis(1))));
        assert!(queue.insert(Stamp(base + Duration::from_millis(5))).is_ok());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn reset_empties_queue() {
        let base = Instant::now();
        let mut stack = WorkerStack::new();
        fill(&mut stack, base, vec![1, 2, 3]);

        assert_eq!(stack.reset().len(), 3);
        assert_eq!(stack.len(), 0);
        assert_eq!(stack.detach(), None);
    }

    #[test]
    fn nothing_expires_before_expiry_has_elapsed() {
        let base = Instant::now();
        let mut stack = WorkerStack::new();
        fill(&mut stack, base, vec![0, 10]);

        let expired = stack.retrieve_expired(Duration::from_secs(60), base + Duration::from_millis(20));
        assert!(expired.is_empty());
        assert_eq!(stack.len(), 2);
    }

    fn check_expiry<Q: WorkerQueue<Stamp>>(mut queue: Q, offsets: Vec<u64>, expiry_ms: u64, now_ms: u64) {
        let base = Instant::now();
        let stamps = fill(&mut queue, base, offsets);
        let now = base + Duration::from_millis(now_ms);
        let cutoff = now.checked_sub(Duration::from_millis(expiry_ms));

        let expired = queue.retrieve_expired(Duration::from_millis(expiry_ms), now);
        let expected_expired = stamps.iter().filter(|at| cutoff.is_some_and(|c| **at <= c)).count();

        assert_eq!(expired.len(), expected_expired);
        assert!(expired.iter().all(|s| cutoff.is_some_and(|c| s.0 <= c)));
        assert_eq!(queue.len(), stamps.len() - expected_expired);

        let remaining = queue.reset();
        assert!(remaining.iter().all(|s| !cutoff.is_some_and(|c| s.0 <= c)));
    }

    proptest! {
        #[test]
        fn property_test_stack_expiry(offsets in arb_vec(0u64..1000, 0..64), expiry_ms in 0u64..500, now_ms in 0u64..1500) {
            // Whatever the mix of ages, exactly the items older than the cutoff are evicted and the rest stay.
            check_expiry(WorkerStack::new(), offsets, expiry_ms, now_ms);
        }

        #[test]
        fn property_test_loop_queue_expiry(offsets in arb_vec(0u64..1000, 0..64), expiry_ms in 0u64..500, now_ms in 0u64..1500) {
            check_expiry(LoopQueue::with_capacity(64), offsets, expiry_ms, now_ms);
        }
    }
}
