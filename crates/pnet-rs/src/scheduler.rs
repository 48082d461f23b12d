//! Single-threaded deadline queue driving every timed behavior in the core
//! (§4.1): retransmits, watchdogs, HELLO beacons and cyclic PPM/CPM ticks.
//!
//! Entries are preallocated at construction and form two intrusive lists —
//! a free list (a stack of indices) and a time-sorted busy list (earliest
//! deadline first, maintained by linear-scan insertion as §4.1 specifies).
//! Handles carry a generation counter so a stale handle from an
//! already-fired or already-removed entry is detected rather than silently
//! operating on whatever now occupies that slot (§9 design note).

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::hal::PnetError;

/// Requested delays beyond this are defensive against `deadline - now`
/// underflow and are sanitized to zero (§4.1).
pub const MAX_DELAY_US: u64 = 100_000_000;

/// Something the scheduler can invoke when a timer fires. Implemented by
/// whichever state machine armed the timer; `now_us` is the tick time that
/// caused the fire, not necessarily the original deadline.
pub trait SchedulerCallback {
    fn on_fire(&mut self, now_us: u64);
}

/// A stable reference to a live timer. `NONE` compares equal to any other
/// handle that has never been armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl SchedulerHandle {
    pub const NONE: SchedulerHandle = SchedulerHandle { index: u32::MAX, generation: 0 };

    pub fn is_running(&self) -> bool {
        *self != Self::NONE
    }
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::NONE
    }
}

struct Entry {
    deadline: u64,
    generation: u32,
    in_use: bool,
    callback: Option<Box<dyn SchedulerCallback>>,
}

/// Fixed-capacity timer wheel. `capacity` mirrors the original's
/// preallocated timer array; exceeding it fails `add` rather than growing.
pub struct Scheduler {
    entries: Vec<Entry>,
    free: Vec<u32>,
    /// Busy indices sorted earliest-deadline-first.
    busy: Vec<u32>,
    cycle_time_us: u64,
}

impl Scheduler {
    pub fn new(capacity: usize, cycle_time_us: u64) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            entries.push(Entry { deadline: 0, generation: 0, in_use: false, callback: None });
            free.push(i as u32);
        }
        Scheduler { entries, free, busy: Vec::new(), cycle_time_us: cycle_time_us.max(1) }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// §4.1: round the requested delay to a multiple of the cycle time;
    /// delays beyond `MAX_DELAY_US` are defensive against underflow and
    /// collapse to zero.
    fn sanitize_delay(&self, delay_us: u64) -> u64 {
        if delay_us > MAX_DELAY_US {
            return 0;
        }
        let ticks = (delay_us + self.cycle_time_us / 2) / self.cycle_time_us;
        ticks.max(1) * self.cycle_time_us
    }

    /// Allocates a free entry, computes `deadline = now + sanitized(delay)`,
    /// inserts it into the busy list by deadline order, and returns a
    /// handle. Fails with [`PnetError::SchedulerFull`] if no entry is free.
    pub fn add(
        &mut self,
        now_us: u64,
        delay_us: u64,
        callback: Box<dyn SchedulerCallback>,
    ) -> Result<SchedulerHandle, PnetError> {
        let index = self.free.pop().ok_or(PnetError::SchedulerFull)?;
        let deadline = now_us + self.sanitize_delay(delay_us);
        let entry = &mut self.entries[index as usize];
        entry.deadline = deadline;
        entry.in_use = true;
        entry.callback = Some(callback);
        let generation = entry.generation;

        let pos = self.busy.partition_point(|&i| self.entries[i as usize].deadline <= deadline);
        self.busy.insert(pos, index);

        Ok(SchedulerHandle { index, generation })
    }

    /// Equivalent to remove-if-running followed by add, reusing the same
    /// callback; the handle's generation does not change on a pure restart
    /// of a still-live entry.
    pub fn restart(
        &mut self,
        handle: SchedulerHandle,
        now_us: u64,
        delay_us: u64,
    ) -> Result<SchedulerHandle, PnetError> {
        if handle.is_running() && self.is_valid(handle) {
            let index = handle.index as usize;
            self.unlink_busy(handle.index);
            let deadline = now_us + self.sanitize_delay(delay_us);
            self.entries[index].deadline = deadline;
            let pos = self.busy.partition_point(|&i| self.entries[i as usize].deadline <= deadline);
            self.busy.insert(pos, handle.index);
            Ok(handle)
        } else {
            Err(PnetError::StaleSchedulerHandle)
        }
    }

    fn is_valid(&self, handle: SchedulerHandle) -> bool {
        (handle.index as usize) < self.entries.len()
            && self.entries[handle.index as usize].in_use
            && self.entries[handle.index as usize].generation == handle.generation
    }

    fn unlink_busy(&mut self, index: u32) {
        if let Some(pos) = self.busy.iter().position(|&i| i == index) {
            self.busy.remove(pos);
        }
    }

    /// Removes a running timer. Validates the handle's generation first
    /// (the cheap corruption check the original does by name comparison);
    /// a stale or already-removed handle is rejected rather than silently
    /// ignored.
    pub fn remove(&mut self, handle: SchedulerHandle) -> Result<(), PnetError> {
        if !handle.is_running() {
            return Ok(());
        }
        if !self.is_valid(handle) {
            return Err(PnetError::StaleSchedulerHandle);
        }
        self.unlink_busy(handle.index);
        let entry = &mut self.entries[handle.index as usize];
        entry.in_use = false;
        entry.callback = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }

    /// Pops every entry whose deadline has passed, returning it to the free
    /// list *before* invoking its callback — so a callback that re-arms
    /// itself (or any other timer) observes a consistent free/busy split.
    pub fn tick(&mut self, now_us: u64) {
        loop {
            let Some(&index) = self.busy.first() else { break };
            if self.entries[index as usize].deadline > now_us {
                break;
            }
            self.busy.remove(0);
            let entry = &mut self.entries[index as usize];
            entry.in_use = false;
            let mut callback = entry.callback.take();
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(index);

            if let Some(cb) = callback.as_deref_mut() {
                cb.on_fire(now_us);
            }
        }
    }

    /// Total live entries (free ∪ busy always equals capacity, §8 property 1).
    pub fn live_count(&self) -> usize {
        self.free.len() + self.busy.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as StdVec;
    use core::cell::RefCell;
    use alloc::rc::Rc;

    struct RecordingCallback {
        label: &'static str,
        log: Rc<RefCell<StdVec<&'static str>>>,
    }

    impl SchedulerCallback for RecordingCallback {
        fn on_fire(&mut self, _now_us: u64) {
            self.log.borrow_mut().push(self.label);
        }
    }

    #[test]
    fn capacity_invariant_holds_after_add_and_tick() {
        let mut sched = Scheduler::new(4, 1_000);
        let log = Rc::new(RefCell::new(StdVec::new()));
        let h = sched
            .add(0, 5_000, Box::new(RecordingCallback { label: "a", log: log.clone() }))
            .unwrap();
        assert_eq!(sched.live_count(), 4);
        sched.tick(10_000);
        assert_eq!(sched.live_count(), 4);
        assert_eq!(*log.borrow(), StdVec::from(["a"]));
        assert!(sched.remove(h).is_err() || !h.is_running());
    }

    #[test]
    fn s3_scheduler_fairness() {
        // §8-S3: add three one-shots with delays (10ms, 5ms, 20ms) at t=0,
        // tick at t=1,6,11,21ms; expect callbacks fire in order 5,10,20.
        let mut sched = Scheduler::new(8, 1);
        let log = Rc::new(RefCell::new(StdVec::new()));
        sched.add(0, 10_000, Box::new(RecordingCallback { label: "10ms", log: log.clone() })).unwrap();
        sched.add(0, 5_000, Box::new(RecordingCallback { label: "5ms", log: log.clone() })).unwrap();
        sched.add(0, 20_000, Box::new(RecordingCallback { label: "20ms", log: log.clone() })).unwrap();

        let original_capacity = sched.live_count();
        sched.tick(1_000);
        assert!(log.borrow().is_empty());
        sched.tick(6_000);
        assert_eq!(*log.borrow(), StdVec::from(["5ms"]));
        sched.tick(11_000);
        assert_eq!(*log.borrow(), StdVec::from(["5ms", "10ms"]));
        sched.tick(21_000);
        assert_eq!(*log.borrow(), StdVec::from(["5ms", "10ms", "20ms"]));
        assert_eq!(sched.live_count(), original_capacity);
    }

    #[test]
    fn delays_beyond_cap_sanitize_to_zero() {
        let sched = Scheduler::new(2, 1_000);
        assert_eq!(sched.sanitize_delay(MAX_DELAY_US + 1), 0);
    }

    #[test]
    fn full_scheduler_rejects_add() {
        let mut sched = Scheduler::new(1, 1_000);
        let log = Rc::new(RefCell::new(StdVec::new()));
        sched.add(0, 1_000, Box::new(RecordingCallback { label: "only", log: log.clone() })).unwrap();
        let err = sched.add(0, 1_000, Box::new(RecordingCallback { label: "second", log })).unwrap_err();
        assert_eq!(err, PnetError::SchedulerFull);
    }
}
