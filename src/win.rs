/*! The in-flight request window.

Pipelining netlink transactions means several requests can be on the wire
at once, each waiting for its reply.  The window is the bookkeeping for
that: a fixed pool of work descriptors, each carrying a caller payload,
keyed by the sequence number the request went out under.

A descriptor is always in exactly one of three states:

* *free* — parked in the window's free list, ready to be acquired;
* *dangling* — handed out to the caller, in no list at all;
* *pending* — scheduled under a sequence number, waiting for its reply.

Pending descriptors live in per-slot queues indexed by `seqno % capacity`.
With sequence numbers drawn monotonically from a single socket and at
most `capacity` requests outstanding, a slot never holds two descriptors
with the same sequence number, so [`Win::pull`] resolves a reply with a
short scan of one queue.

Descriptors are addressed by [`WorkId`] handles; the window owns the
storage for their payloads.
*/

use crate::error::{Error, Result};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkState {
    Free,
    Pending,
    Dangling,
}

/// Handle to a work descriptor registered in a [`Win`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkId(usize);

struct Work<T> {
    state: WorkState,
    seqno: u32,
    data: T,
}

/// A fixed-capacity window of in-flight requests keyed by sequence
/// number.
pub struct Win<T> {
    works: Vec<Work<T>>,
    free: Vec<WorkId>,
    pend: Vec<VecDeque<WorkId>>,
    count: usize,
}

impl<T> Win<T> {
    /// Create a window for at most `capacity` outstanding requests.
    ///
    /// The only fallible step is allocating the pending-slot table; no
    /// operation after construction can fail.
    pub fn with_capacity(capacity: usize) -> Result<Win<T>> {
        debug_assert!(capacity > 0);

        let mut works = Vec::new();
        let mut free = Vec::new();
        let mut pend: Vec<VecDeque<WorkId>> = Vec::new();
        works
            .try_reserve_exact(capacity)
            .map_err(|_| Error::NoMemory)?;
        free.try_reserve_exact(capacity)
            .map_err(|_| Error::NoMemory)?;
        pend.try_reserve_exact(capacity)
            .map_err(|_| Error::NoMemory)?;
        for _ in 0..capacity {
            pend.push(VecDeque::new());
        }
        Ok(Win {
            works,
            free,
            pend,
            count: 0,
        })
    }

    /// Number of pending requests.
    pub fn count(&self) -> usize {
        self.count
    }

    /// True while at least one request is pending.
    pub fn has_work(&self) -> bool {
        self.count > 0
    }

    pub fn capacity(&self) -> usize {
        self.pend.len()
    }

    /// Hand a new descriptor with its payload to the window.
    ///
    /// Registration is only legal while the window is idle, and the
    /// number of registered descriptors never exceeds the capacity.
    pub fn register(&mut self, data: T) -> WorkId {
        debug_assert_eq!(self.count, 0);
        debug_assert!(self.works.len() < self.capacity());

        let id = WorkId(self.works.len());
        self.works.push(Work {
            state: WorkState::Free,
            seqno: 0,
            data,
        });
        self.free.push(id);
        id
    }

    /// Take a free descriptor out of the window, or `None` when every
    /// descriptor is already out or pending.
    pub fn acquire(&mut self) -> Option<WorkId> {
        let id = self.free.pop()?;
        debug_assert_eq!(self.works[id.0].state, WorkState::Free);
        self.works[id.0].state = WorkState::Dangling;
        Some(id)
    }

    /// Return a dangling descriptor to the free list.
    pub fn release(&mut self, id: WorkId) {
        let work = &mut self.works[id.0];
        debug_assert_eq!(work.state, WorkState::Dangling);
        work.state = WorkState::Free;
        self.free.push(id);
    }

    /// Schedule a dangling descriptor under `seqno`.
    ///
    /// The window must not be full.
    pub fn schedule(&mut self, id: WorkId, seqno: u32) {
        debug_assert!(self.count < self.capacity());

        let slot = seqno as usize % self.capacity();
        let work = &mut self.works[id.0];
        debug_assert_eq!(work.state, WorkState::Dangling);
        work.state = WorkState::Pending;
        work.seqno = seqno;
        self.count += 1;
        self.pend[slot].push_back(id);
    }

    /// Schedule a dangling descriptor again under the sequence number it
    /// was last scheduled with.
    pub fn reschedule(&mut self, id: WorkId) {
        let seqno = self.works[id.0].seqno;
        self.schedule(id, seqno);
    }

    /// Match a reply sequence number to its pending descriptor.
    ///
    /// Returns `None` for a reply whose request is no longer pending,
    /// e.g. one cancelled before the kernel answered; such replies are
    /// dropped by the caller.
    pub fn pull(&mut self, seqno: u32) -> Option<WorkId> {
        let slot = seqno as usize % self.capacity();
        let works = &self.works;
        let pos = self.pend[slot].iter().position(|id| {
            debug_assert_eq!(works[id.0].state, WorkState::Pending);
            works[id.0].seqno == seqno
        })?;
        let id = self.pend[slot].remove(pos)?;
        self.extract(id);
        Some(id)
    }

    /// Withdraw a descriptor before its reply arrives.
    ///
    /// Returns true when the descriptor was still pending.  A dangling
    /// descriptor is left as it is; cancelling a free descriptor is a
    /// caller bug.
    pub fn cancel(&mut self, id: WorkId) -> bool {
        debug_assert_ne!(self.works[id.0].state, WorkState::Free);

        if self.works[id.0].state != WorkState::Pending {
            return false;
        }
        let slot = self.works[id.0].seqno as usize % self.capacity();
        let pos = self.pend[slot].iter().position(|queued| *queued == id);
        debug_assert!(pos.is_some());
        if let Some(pos) = pos {
            self.pend[slot].remove(pos);
            self.extract(id);
        }
        true
    }

    /// Pull pending descriptors out one at a time, in slot order.
    ///
    /// `slot` is a cursor owned by the caller, starting at 0.  Each call
    /// returns the first descriptor of the first non-empty slot at or
    /// after the cursor and leaves the cursor on that slot.  Once every
    /// slot is empty the cursor lands on the capacity and the call
    /// returns `None`.
    pub fn drain(&mut self, slot: &mut usize) -> Option<WorkId> {
        debug_assert!(*slot <= self.capacity());

        if self.count == 0 {
            *slot = self.capacity();
            return None;
        }
        let mut cursor = *slot;
        while cursor < self.capacity() && self.pend[cursor].is_empty() {
            cursor += 1;
        }
        *slot = cursor;
        if cursor == self.capacity() {
            return None;
        }
        let id = self.pend[cursor].pop_front()?;
        self.extract(id);
        Some(id)
    }

    /// The caller payload carried by a descriptor.
    pub fn data(&self, id: WorkId) -> &T {
        &self.works[id.0].data
    }

    pub fn data_mut(&mut self, id: WorkId) -> &mut T {
        &mut self.works[id.0].data
    }

    /// The sequence number the descriptor was last scheduled under.
    pub fn seqno(&self, id: WorkId) -> u32 {
        self.works[id.0].seqno
    }

    fn extract(&mut self, id: WorkId) {
        debug_assert_eq!(self.works[id.0].state, WorkState::Pending);
        debug_assert!(self.count > 0);
        self.works[id.0].state = WorkState::Dangling;
        self.count -= 1;
    }
}
