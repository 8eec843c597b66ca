// src/thread_safe_queue.rs
//! Blocking FIFO used for every producer/consumer channel in the physics core.
//!
//! - `push` never fails and wakes one parked consumer.
//! - `pop` parks until an item arrives or the queue is stopped. After `stop`,
//!   remaining items still drain; `pop` returns `None` only once the queue is
//!   both stopped and empty.
//! - `try_pop` never parks: it gives up if the lock is contended for longer
//!   than [`TRY_LOCK_TIMEOUT`] or the queue is empty.
//! - `reset` clears the stop flag and the contents. A stopped queue stays
//!   stopped until reset.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// How long `try_pop` may wait for the queue lock.
pub const TRY_LOCK_TIMEOUT: Duration = Duration::from_millis(1);

struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

pub struct ThreadSafeQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> ThreadSafeQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until an item is available. Returns `None` once stopped and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.try_lock_for(TRY_LOCK_TIMEOUT)?;
        state.items.pop_front()
    }

    /// Takes every queued item without blocking on an empty queue.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.items.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Wakes every waiter. The only way to release a thread parked in `pop`
    /// without pushing.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        drop(state);
        self.available.notify_all();
    }

    /// Returns the queue to its freshly constructed state.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.stopped = false;
        state.items.clear();
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ThreadSafeQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ThreadSafeQueue")
            .field("len", &state.items.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let queue = ThreadSafeQueue::new();
        for i in 0..100 {
            queue.push(i);
        }
        let received: Vec<i32> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_after_stop_drains_then_returns_none() {
        let queue = ThreadSafeQueue::new();
        queue.push("a");
        queue.push("b");
        queue.stop();

        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.pop(), Some("b"));

        let start = Instant::now();
        assert_eq!(queue.pop(), None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_releases_parked_consumer() {
        let queue = Arc::new(ThreadSafeQueue::<u32>::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn reset_behaves_like_fresh_queue() {
        let queue = ThreadSafeQueue::new();
        queue.push(1);
        queue.stop();
        queue.reset();

        assert!(!queue.is_stopped());
        assert!(queue.is_empty());

        queue.push(7);
        queue.push(8);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(7));
        assert_eq!(queue.try_pop(), Some(8));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn single_consumer_sees_each_producer_in_order() {
        let queue = Arc::new(ThreadSafeQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250u32 {
                        queue.push((p, i));
                    }
                })
            })
            .collect();
        for h in producers {
            h.join().unwrap();
        }
        queue.stop();

        let mut last = [None::<u32>; 4];
        let mut count = 0;
        while let Some((p, i)) = queue.pop() {
            if let Some(prev) = last[p as usize] {
                assert!(i > prev, "producer {p} reordered: {prev} then {i}");
            }
            last[p as usize] = Some(i);
            count += 1;
        }
        assert_eq!(count, 1000);
    }
}
