//! Virtual-time scheduler.
//!
//! The scheduler owns the clock and a priority queue of pending wakeups
//! ordered by `(time, insertion sequence)`. Two kinds of wakeup exist:
//!
//! - **Resume**: hand control back to a suspended task. Returned from
//!   [`Scheduler::resume_after`] as an [`EventKey`] that can be withdrawn.
//! - **Fire**: a triggered [`SignalId`] fires, waking every task whose
//!   composite wait it completes.
//!
//! Signals are one-shot. A signal is *pending* until [`Scheduler::trigger`]
//! is called, *triggered* until its fire wakeup is processed, and *fired*
//! afterwards. Fired signals are dropped from the arena; any lookup of a
//! missing signal reads as fired.
//!
//! Same-instant wakeups are processed strictly in insertion order, which
//! makes the whole simulation replayable from a seed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use slotmap::SlotMap;

use crate::fixed::SimTime;
use crate::id::{SignalId, TaskId};

/// Handle to a scheduled resumption. Used to withdraw it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wakeup {
    Resume(TaskId),
    Fire(SignalId),
}

#[derive(Debug)]
struct Scheduled {
    time: SimTime,
    seq: u64,
    wakeup: Wakeup,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest (time, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Lifecycle of a signal that has not fired yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Pending,
    Triggered,
}

#[derive(Debug)]
struct Signal {
    state: SignalState,
    /// `(task, wait generation)` pairs registered on this signal.
    waiters: Vec<(TaskId, u64)>,
}

/// Whether a composite wait needs one or every child signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Any,
    All,
}

#[derive(Debug)]
struct Wait {
    generation: u64,
    remaining: usize,
}

/// The event queue and virtual clock.
#[derive(Debug)]
pub struct Scheduler {
    now: SimTime,
    queue: BinaryHeap<Scheduled>,
    next_seq: u64,
    /// Resume wakeups that have not fired or been withdrawn.
    live: HashSet<u64>,
    signals: SlotMap<SignalId, Signal>,
    waits: HashMap<TaskId, Wait>,
    next_generation: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            queue: BinaryHeap::new(),
            next_seq: 0,
            live: HashSet::new(),
            signals: SlotMap::with_key(),
            waits: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of entries in the event queue, withdrawn ones included.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of signals that have not fired yet.
    pub fn open_signals(&self) -> usize {
        self.signals.len()
    }

    /// Whether `task` is parked on a composite wait.
    pub fn is_waiting(&self, task: TaskId) -> bool {
        self.waits.contains_key(&task)
    }

    fn push(&mut self, time: SimTime, wakeup: Wakeup) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { time, seq, wakeup });
        seq
    }

    // -----------------------------------------------------------------------
    // Timed resumption
    // -----------------------------------------------------------------------

    /// Resume `task` after `delay`. Negative delays are treated as zero.
    pub fn resume_after(&mut self, task: TaskId, delay: SimTime) -> EventKey {
        let time = self.now.saturating_add(delay.max(SimTime::ZERO));
        let seq = self.push(time, Wakeup::Resume(task));
        self.live.insert(seq);
        EventKey(seq)
    }

    /// Resume `task` at the current instant, after everything already queued
    /// for this instant.
    pub fn resume_now(&mut self, task: TaskId) -> EventKey {
        self.resume_after(task, SimTime::ZERO)
    }

    /// Withdraw a pending resumption. Returns `false` if it already fired or
    /// was withdrawn before.
    pub fn withdraw(&mut self, key: EventKey) -> bool {
        self.live.remove(&key.0)
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    pub fn new_signal(&mut self) -> SignalId {
        self.signals.insert(Signal {
            state: SignalState::Pending,
            waiters: Vec::new(),
        })
    }

    /// Trigger a pending signal. It fires at the current instant, after the
    /// wakeups already queued for it. Returns `false` if the signal was
    /// already triggered or fired.
    pub fn trigger(&mut self, signal: SignalId) -> bool {
        let Some(entry) = self.signals.get_mut(signal) else {
            return false;
        };
        if entry.state != SignalState::Pending {
            return false;
        }
        entry.state = SignalState::Triggered;
        self.push(self.now, Wakeup::Fire(signal));
        true
    }

    /// Triggered or already fired.
    pub fn is_triggered(&self, signal: SignalId) -> bool {
        self.signals
            .get(signal)
            .is_none_or(|s| s.state == SignalState::Triggered)
    }

    pub fn has_fired(&self, signal: SignalId) -> bool {
        !self.signals.contains_key(signal)
    }

    /// Drop a signal nobody will trigger. Waiters registered on it are
    /// never woken through it.
    pub fn discard(&mut self, signal: SignalId) {
        self.signals.remove(signal);
    }

    // -----------------------------------------------------------------------
    // Composite waits
    // -----------------------------------------------------------------------

    /// Suspend `task` until any of `signals` fires. An empty list, or one
    /// containing an already fired signal, resumes at the current instant.
    pub fn wait_any(&mut self, task: TaskId, signals: &[SignalId]) {
        self.wait(task, signals, WaitMode::Any);
    }

    /// Suspend `task` until all of `signals` have fired.
    pub fn wait_all(&mut self, task: TaskId, signals: &[SignalId]) {
        self.wait(task, signals, WaitMode::All);
    }

    pub fn wait(&mut self, task: TaskId, signals: &[SignalId], mode: WaitMode) {
        let unfired: Vec<SignalId> = signals
            .iter()
            .copied()
            .filter(|s| !self.has_fired(*s))
            .collect();
        let satisfied = match mode {
            WaitMode::Any => signals.is_empty() || unfired.len() < signals.len(),
            WaitMode::All => unfired.is_empty(),
        };
        if satisfied {
            self.resume_now(task);
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let remaining = match mode {
            WaitMode::Any => 1,
            WaitMode::All => unfired.len(),
        };
        self.waits.insert(
            task,
            Wait {
                generation,
                remaining,
            },
        );
        for signal in unfired {
            if let Some(entry) = self.signals.get_mut(signal) {
                entry.waiters.push((task, generation));
            }
        }
    }

    fn fire(&mut self, signal: SignalId) {
        let Some(entry) = self.signals.remove(signal) else {
            return;
        };
        for (task, generation) in entry.waiters {
            let done = match self.waits.get_mut(&task) {
                // Registrations from an earlier, already satisfied wait
                // carry an old generation and are skipped.
                Some(wait) if wait.generation == generation => {
                    wait.remaining -= 1;
                    wait.remaining == 0
                }
                _ => false,
            };
            if done {
                self.waits.remove(&task);
                self.resume_now(task);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Time of the earliest queued entry, withdrawn ones included.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|s| s.time)
    }

    /// Advance to the next task resumption, processing signal firings on the
    /// way. Returns `None` when the queue is exhausted or the next entry lies
    /// beyond `limit`; in both cases the clock moves to `limit` if given.
    pub fn next(&mut self, limit: Option<SimTime>) -> Option<TaskId> {
        loop {
            let Some(head) = self.queue.peek() else {
                self.advance_to(limit);
                return None;
            };
            if let Some(limit) = limit
                && head.time > limit
            {
                self.advance_to(Some(limit));
                return None;
            }
            let entry = self.queue.pop()?;
            match entry.wakeup {
                Wakeup::Resume(task) => {
                    if !self.live.remove(&entry.seq) {
                        continue;
                    }
                    self.now = entry.time;
                    tracing::trace!(sim_time = %self.now, ?task, "resume");
                    return Some(task);
                }
                Wakeup::Fire(signal) => {
                    self.now = entry.time;
                    self.fire(signal);
                }
            }
        }
    }

    fn advance_to(&mut self, limit: Option<SimTime>) {
        if let Some(limit) = limit
            && limit > self.now
        {
            self.now = limit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;

    fn tasks(n: usize) -> Vec<TaskId> {
        let mut arena: SlotMap<TaskId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    fn t(v: f64) -> SimTime {
        f64_to_fixed64(v)
    }

    fn drain(s: &mut Scheduler, limit: Option<SimTime>) -> Vec<(TaskId, SimTime)> {
        let mut out = Vec::new();
        while let Some(task) = s.next(limit) {
            out.push((task, s.now()));
        }
        out
    }

    #[test]
    fn earlier_time_first() {
        let ids = tasks(2);
        let mut s = Scheduler::new();
        s.resume_after(ids[0], t(5.0));
        s.resume_after(ids[1], t(2.0));
        let order = drain(&mut s, None);
        assert_eq!(order, vec![(ids[1], t(2.0)), (ids[0], t(5.0))]);
    }

    #[test]
    fn same_instant_is_fifo() {
        let ids = tasks(4);
        let mut s = Scheduler::new();
        for id in &ids {
            s.resume_after(*id, t(1.0));
        }
        let order: Vec<TaskId> = drain(&mut s, None).into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn withdrawn_wakeup_is_noop() {
        let ids = tasks(2);
        let mut s = Scheduler::new();
        let key = s.resume_after(ids[0], t(1.0));
        s.resume_after(ids[1], t(2.0));
        assert!(s.withdraw(key));
        assert!(!s.withdraw(key));
        let order = drain(&mut s, None);
        assert_eq!(order, vec![(ids[1], t(2.0))]);
    }

    #[test]
    fn withdraw_after_fire_returns_false() {
        let ids = tasks(1);
        let mut s = Scheduler::new();
        let key = s.resume_now(ids[0]);
        assert_eq!(s.next(None), Some(ids[0]));
        assert!(!s.withdraw(key));
    }

    #[test]
    fn limit_stops_without_consuming() {
        let ids = tasks(2);
        let mut s = Scheduler::new();
        s.resume_after(ids[0], t(3.0));
        s.resume_after(ids[1], t(8.0));
        assert_eq!(drain(&mut s, Some(t(5.0))), vec![(ids[0], t(3.0))]);
        assert_eq!(s.now(), t(5.0));
        // The later wakeup is still there.
        assert_eq!(drain(&mut s, Some(t(10.0))), vec![(ids[1], t(8.0))]);
        assert_eq!(s.now(), t(10.0));
    }

    #[test]
    fn negative_delay_never_rewinds() {
        let ids = tasks(2);
        let mut s = Scheduler::new();
        s.resume_after(ids[0], t(4.0));
        s.next(None);
        s.resume_after(ids[1], t(-2.0));
        assert_eq!(s.next(None), Some(ids[1]));
        assert_eq!(s.now(), t(4.0));
    }

    #[test]
    fn signal_lifecycle() {
        let mut s = Scheduler::new();
        let sig = s.new_signal();
        assert!(!s.is_triggered(sig));
        assert!(s.trigger(sig));
        assert!(s.is_triggered(sig));
        assert!(!s.has_fired(sig));
        assert!(!s.trigger(sig));
        assert_eq!(s.next(None), None);
        assert!(s.has_fired(sig));
        assert!(s.is_triggered(sig));
        assert_eq!(s.open_signals(), 0);
    }

    #[test]
    fn wait_any_resumes_on_first_signal() {
        let ids = tasks(1);
        let mut s = Scheduler::new();
        let a = s.new_signal();
        let b = s.new_signal();
        s.wait_any(ids[0], &[a, b]);
        assert!(s.is_waiting(ids[0]));
        s.trigger(b);
        assert_eq!(s.next(None), Some(ids[0]));
        assert!(!s.is_waiting(ids[0]));
        // The other signal firing later does not wake the task again.
        s.trigger(a);
        assert_eq!(s.next(None), None);
    }

    #[test]
    fn wait_all_needs_every_signal() {
        let ids = tasks(1);
        let mut s = Scheduler::new();
        let a = s.new_signal();
        let b = s.new_signal();
        s.wait_all(ids[0], &[a, b]);
        s.trigger(a);
        assert_eq!(s.next(None), None);
        s.trigger(b);
        assert_eq!(s.next(None), Some(ids[0]));
    }

    #[test]
    fn wait_on_fired_signal_resumes_immediately() {
        let ids = tasks(1);
        let mut s = Scheduler::new();
        let a = s.new_signal();
        let b = s.new_signal();
        s.trigger(a);
        s.next(None);
        s.wait_any(ids[0], &[a, b]);
        assert_eq!(s.next(None), Some(ids[0]));
    }

    #[test]
    fn empty_wait_any_resumes_immediately() {
        let ids = tasks(1);
        let mut s = Scheduler::new();
        s.wait_any(ids[0], &[]);
        assert_eq!(s.next(None), Some(ids[0]));
    }

    #[test]
    fn stale_registration_is_ignored() {
        let ids = tasks(1);
        let mut s = Scheduler::new();
        let a = s.new_signal();
        let b = s.new_signal();
        let c = s.new_signal();
        s.wait_any(ids[0], &[a, b]);
        s.trigger(a);
        assert_eq!(s.next(None), Some(ids[0]));

        // New wait on b and c; the old registration on b must not count.
        s.wait_all(ids[0], &[b, c]);
        s.trigger(b);
        assert_eq!(s.next(None), None);
        s.trigger(c);
        assert_eq!(s.next(None), Some(ids[0]));
    }

    #[test]
    fn triggered_signal_fires_after_queued_same_instant_wakeups() {
        let ids = tasks(2);
        let mut s = Scheduler::new();
        let sig = s.new_signal();
        s.wait_any(ids[1], &[sig]);
        s.resume_now(ids[0]);
        s.trigger(sig);
        let order: Vec<TaskId> = drain(&mut s, None).into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![ids[0], ids[1]]);
    }
}
