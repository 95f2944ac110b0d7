//! Single-threaded timer scheduler
//!
//! Every weapon and fire mode owns a `Timers<K>` keyed by timer purpose.
//! Arming a key that is already active replaces the previous schedule, so
//! there is never more than one outstanding timer per purpose.
//!
//! Deadlines live in a min-heap of (deadline, token) pairs. Cancelled or
//! replaced entries stay in the heap and are skipped when their token no
//! longer matches the active schedule for that key.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

#[derive(Clone, Copy, Debug)]
struct Schedule {
    started_at: f64,
    deadline: f64,
    token: u64,
}

#[derive(Clone, Copy, Debug)]
struct QueuedTimer<K> {
    deadline: f64,
    token: u64,
    key: K,
}

// Reversed so that `BinaryHeap` pops the earliest deadline first.
// Equal deadlines fire in arming order.
impl<K> Ord for QueuedTimer<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .total_cmp(&self.deadline)
            .then_with(|| other.token.cmp(&self.token))
    }
}

impl<K> PartialOrd for QueuedTimer<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for QueuedTimer<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K> Eq for QueuedTimer<K> {}

/// Keyed one-shot timers driven by an externally supplied clock.
#[derive(Debug)]
pub struct Timers<K> {
    active: HashMap<K, Schedule>,
    queue: BinaryHeap<QueuedTimer<K>>,
    next_tick: Vec<(K, u64)>,
    next_token: u64,
}

impl<K> Default for Timers<K> {
    fn default() -> Self {
        Self {
            active: HashMap::new(),
            queue: BinaryHeap::new(),
            next_tick: Vec::new(),
            next_token: 0,
        }
    }
}

impl<K: Copy + Eq + Hash> Timers<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&mut self, key: K, now: f64, deadline: f64) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.active.insert(
            key,
            Schedule {
                started_at: now,
                deadline,
                token,
            },
        );
        token
    }

    /// Arm `key` to expire `delay` seconds after `now`, replacing any
    /// previous schedule for the same key.
    pub fn set(&mut self, key: K, now: f64, delay: f64) {
        let deadline = now + delay.max(0.0);
        let token = self.arm(key, now, deadline);
        self.queue.push(QueuedTimer { deadline, token, key });
    }

    /// Arm `key` to expire on the next `begin_tick`, never inside the
    /// tick that armed it.
    pub fn set_for_next_tick(&mut self, key: K, now: f64) {
        let token = self.arm(key, now, now);
        self.next_tick.push((key, token));
    }

    pub fn clear(&mut self, key: K) {
        self.active.remove(&key);
    }

    pub fn is_active(&self, key: K) -> bool {
        self.active.contains_key(&key)
    }

    /// Seconds left before `key` expires, `None` if it is not armed.
    pub fn remaining(&self, key: K, now: f64) -> Option<f64> {
        self.active
            .get(&key)
            .map(|schedule| (schedule.deadline - now).max(0.0))
    }

    pub fn started_at(&self, key: K) -> Option<f64> {
        self.active.get(&key).map(|schedule| schedule.started_at)
    }

    /// Release timers armed with `set_for_next_tick` since the last tick.
    pub fn begin_tick(&mut self) {
        for (key, token) in std::mem::take(&mut self.next_tick) {
            let Some(schedule) = self.active.get(&key) else {
                continue;
            };
            if schedule.token == token {
                self.queue.push(QueuedTimer {
                    deadline: schedule.deadline,
                    token,
                    key,
                });
            }
        }
    }

    fn is_stale(&self, entry: &QueuedTimer<K>) -> bool {
        self.active
            .get(&entry.key)
            .map_or(true, |schedule| schedule.token != entry.token)
    }

    /// Deadline of the earliest live timer due at or before `now`.
    pub fn peek_due(&mut self, now: f64) -> Option<f64> {
        loop {
            let top = *self.queue.peek()?;
            if self.is_stale(&top) {
                self.queue.pop();
                continue;
            }
            return (top.deadline <= now).then_some(top.deadline);
        }
    }

    /// Remove and return the earliest live timer due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(K, f64)> {
        self.peek_due(now)?;
        let entry = self.queue.pop()?;
        self.active.remove(&entry.key);
        Some((entry.key, entry.deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Key {
        A,
        B,
    }

    #[test]
    fn test_rearm_replaces_schedule() {
        let mut timers = Timers::new();
        timers.set(Key::A, 0.0, 1.0);
        timers.set(Key::A, 0.5, 1.0);

        assert_eq!(timers.pop_due(1.2), None);
        assert_eq!(timers.pop_due(1.5), Some((Key::A, 1.5)));
        assert_eq!(timers.pop_due(10.0), None);
    }

    #[test]
    fn test_pops_in_deadline_order() {
        let mut timers = Timers::new();
        timers.set(Key::A, 0.0, 0.4);
        timers.set(Key::B, 0.0, 0.2);

        assert_eq!(timers.pop_due(1.0), Some((Key::B, 0.2)));
        assert_eq!(timers.pop_due(1.0), Some((Key::A, 0.4)));
    }

    #[test]
    fn test_clear_cancels() {
        let mut timers = Timers::new();
        timers.set(Key::A, 0.0, 0.1);
        timers.clear(Key::A);

        assert!(!timers.is_active(Key::A));
        assert_eq!(timers.pop_due(1.0), None);
    }

    #[test]
    fn test_remaining_and_started_at() {
        let mut timers = Timers::new();
        timers.set(Key::A, 1.0, 0.5);

        let remaining = timers.remaining(Key::A, 1.2).unwrap();
        assert!((remaining - 0.3).abs() < 1e-9);
        assert_eq!(timers.started_at(Key::A), Some(1.0));
        assert_eq!(timers.remaining(Key::B, 1.2), None);
    }

    #[test]
    fn test_next_tick_waits_for_begin_tick() {
        let mut timers = Timers::new();
        timers.begin_tick();
        timers.set_for_next_tick(Key::A, 2.0);

        assert_eq!(timers.pop_due(2.0), None);
        assert!(timers.is_active(Key::A));

        timers.begin_tick();
        assert_eq!(timers.pop_due(2.0), Some((Key::A, 2.0)));
    }
}
