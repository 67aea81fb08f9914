//! An ordered wait structure releasing elements only once their
//! deadline has passed. Safe for many producers and many consumers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

/// Anything orderable by remaining delay until a deadline.
///
/// `delay(now) = deadline() - now`, expressible in any time unit; the
/// comparator below uses `deadline()` directly plus a tie-break for
/// equal deadlines, which is equivalent.
pub trait Delayed {
    fn deadline(&self) -> DateTime<Utc>;

    /// Tie-break for equal deadlines: smaller key wins.
    fn tie_break_key(&self) -> i64;
}

struct Entry<T> {
    deadline: DateTime<Utc>,
    tie_break: i64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.tie_break == other.tie_break
    }
}
impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    /// `BinaryHeap` is a max-heap; we invert the natural ordering so
    /// that the *smallest* deadline (and, on ties, the smallest
    /// `taskInstanceId`) sorts as the heap's maximum, i.e. the head.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.tie_break.cmp(&self.tie_break))
    }
}

struct State<T> {
    heap: BinaryHeap<Entry<T>>,
}

/// A min-ordered collection of elements, ordered by remaining delay
/// until `deadline()`. `take` blocks until the head is ready.
pub struct DelayQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> std::fmt::Debug for DelayQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue").finish_non_exhaustive()
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
            }),
            notify: Notify::new(),
        }
    }
}

impl<T: Delayed> DelayQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a new element. Wakes any waiting consumer so it can
    /// re-evaluate whether the new element is now the earliest head.
    pub async fn offer(&self, item: T) {
        let deadline = item.deadline();
        let tie_break = item.tie_break_key();
        {
            let mut state = self.state.lock().await;
            state.heap.push(Entry {
                deadline,
                tie_break,
                item,
            });
        }
        self.notify.notify_waiters();
    }

    /// Block until the head's deadline has passed, then return it.
    /// Never returns an element with positive remaining delay.
    pub async fn take(&self) -> T {
        loop {
            // Register interest in the next notification before
            // inspecting the heap, so an `offer()` landing in the
            // window between the check below and the await can't be
            // missed: `notify_waiters` only wakes already-registered
            // waiters, it does not save the wakeup for a future one.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait_for = {
                let mut state = self.state.lock().await;
                match state.heap.peek() {
                    None => None,
                    Some(head) => {
                        let now = Utc::now();
                        if head.deadline <= now {
                            return state.heap.pop().unwrap().item;
                        }
                        Some((head.deadline - now).to_std().unwrap_or_default())
                    }
                }
            };

            match wait_for {
                None => notified.await,
                Some(duration) => {
                    tokio::select! {
                        () = tokio::time::sleep(duration) => {}
                        () = notified.as_mut() => {}
                    }
                }
            }
        }
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    /// Remove a specific element identified by `tie_break_key`.
    /// Returns the removed element, if present.
    pub async fn remove(&self, tie_break_key: i64) -> Option<T> {
        let mut state = self.state.lock().await;
        let mut remaining: Vec<Entry<T>> = Vec::with_capacity(state.heap.len());
        let mut found = None;
        for entry in std::mem::take(&mut state.heap).into_sorted_vec() {
            if found.is_none() && entry.tie_break == tie_break_key {
                found = Some(entry.item);
            } else {
                remaining.push(entry);
            }
        }
        state.heap = BinaryHeap::from(remaining);
        found
    }
}
