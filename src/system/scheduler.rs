//! Deadline-ordered timed task table.
//!
//! The scheduler does not run anything by itself. The owner asks it for the
//! next deadline (to bound its readiness wait), then repeatedly calls
//! [`Scheduler::pop_due`] and runs whatever job comes back. Jobs are opaque
//! `Copy` values, typically a callback pointer or an enum naming an internal
//! timer.
//!
//! Ordering: earliest deadline first, ties broken by submission order.
//! Repeating jobs are re-armed *before* they are handed out, so a job may
//! cancel its own handle while it runs.

use heapless::Vec;

use crate::{Error, Result};

/// Default number of concurrently scheduled jobs.
pub const MAX_TIMED_TASKS: usize = 64;

/// Identifies one scheduled job. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(u32);

impl TaskHandle {
    /// Raw handle value, for logging.
    pub const fn id(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry<J> {
    handle: TaskHandle,
    deadline: u64,
    seq: u64,
    period: Option<u64>,
    job: J,
}

impl<J> Entry<J> {
    fn key(&self) -> (u64, u64) {
        (self.deadline, self.seq)
    }
}

/// Fixed-capacity timed task table.
#[derive(Debug)]
pub struct Scheduler<J, const N: usize = MAX_TIMED_TASKS> {
    entries: Vec<Entry<J>, N>,
    next_handle: u32,
    next_seq: u64,
}

impl<J: Copy, const N: usize> Default for Scheduler<J, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: Copy, const N: usize> Scheduler<J, N> {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_handle: 1,
            next_seq: 0,
        }
    }

    /// Schedules `job` to run `delay_ms` after `now`.
    ///
    /// With `period` set, the job repeats every `period` ms until cancelled.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for a zero period
    /// - [`Error::OutOfMemory`] when the table is full
    pub fn schedule(
        &mut self,
        now: u64,
        delay_ms: u64,
        period: Option<u64>,
        job: J,
    ) -> Result<TaskHandle> {
        if period == Some(0) {
            return Err(Error::InvalidParameter);
        }
        let handle = TaskHandle(self.next_handle);
        let entry = Entry {
            handle,
            deadline: now.saturating_add(delay_ms),
            seq: self.next_seq,
            period,
            job,
        };
        self.entries.push(entry).map_err(|_| Error::OutOfMemory)?;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.next_seq += 1;
        Ok(handle)
    }

    /// Removes the job. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.entries.iter().position(|e| e.handle == handle) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// `true` while the job is still scheduled.
    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle)
    }

    /// The job behind `handle`, if still scheduled.
    pub fn get(&self, handle: TaskHandle) -> Option<&J> {
        self.entries.iter().find(|e| e.handle == handle).map(|e| &e.job)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// Takes the next job whose deadline is at or before `now`.
    ///
    /// One-shot jobs are removed. Repeating jobs are re-armed at
    /// `now + period` and queued behind everything already submitted.
    pub fn pop_due(&mut self, now: u64) -> Option<(TaskHandle, J)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| e.key())
            .map(|(i, _)| i)?;

        let entry = self.entries[index];
        match entry.period {
            Some(period) => {
                let rearmed = &mut self.entries[index];
                rearmed.deadline = now.saturating_add(period);
                rearmed.seq = self.next_seq;
                self.next_seq += 1;
            }
            None => {
                self.entries.swap_remove(index);
            }
        }
        Some((entry.handle, entry.job))
    }

    /// `true` if any scheduled job satisfies `predicate`.
    pub fn any(&self, mut predicate: impl FnMut(&J) -> bool) -> bool {
        self.entries.iter().any(|e| predicate(&e.job))
    }

    /// Drops every job matching `predicate`.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&J) -> bool) {
        self.entries.retain(|e| !predicate(&e.job));
    }

    /// Number of scheduled jobs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
