// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task control blocks and their pool.

use abi::{CbType, EntryFn, ErrorCode, Generation, HookEvent, Priority, TaskFlags, TaskState};
use kerncore::runq::{Link, QueueNode};
use kerncore::stackpool::WORD_NONE;

use crate::config::NUM_TASKS;

/// Signature of a task lifecycle hook.
pub type HookFn = fn(HookEvent);

/// Which queue, if any, a task is linked into. A task lives in at most one
/// queue at a time; this tag is the authority on which one, and the intrusive
/// links are only meaningful while it is not `None`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum QueueLoc {
    /// Not queued: running, stopped, or plainly suspended.
    #[default]
    None,
    /// In the run queue at the task's priority level.
    Rq,
    /// Parked on the runtime-limit semaphore until the next profile frame.
    RtLim,
}

/// Task control block.
///
/// `repr(C)` with the saved machine state first: the context-switch assembly
/// finds the register save area at offset zero of whatever the current-task
/// pointer names.
#[repr(C)]
pub struct Tcb {
    /// Saved machine state. Must stay the first field.
    pub(crate) save: crate::arch::SavedState,

    pub(crate) cbtype: CbType,
    pub(crate) gen: Generation,
    pub(crate) state: TaskState,
    pub(crate) flags: TaskFlags,
    pub(crate) pri: Priority,

    /// Intrusive queue links; meaning governed by `loc`.
    pub(crate) fl: Link,
    pub(crate) bl: Link,
    pub(crate) loc: QueueLoc,

    /// Stack geometry while a stack is attached: pad base, usable base
    /// (lowest usable address), stack base (top, exclusive), usable size in
    /// bytes. All zero when no stack is attached.
    pub(crate) spp: u32,
    pub(crate) stp: u32,
    pub(crate) sbp: u32,
    pub(crate) ssz: u32,
    /// High-water mark in bytes, valid per the `STK_HWMV` flag.
    pub(crate) shwm: u32,
    /// Pool block index backing the stack, or `WORD_NONE` for none.
    pub(crate) stack_block: u32,

    pub(crate) entry: Option<EntryFn>,
    pub(crate) par: u32,

    /// Service return value, parked here while the task is suspended so the
    /// resume path can hand it back.
    pub(crate) rv: u32,
    /// Service nesting depth saved across a mid-service suspension.
    pub(crate) srnest_save: u32,
    pub(crate) err: ErrorCode,

    pub(crate) hook: Option<HookFn>,

    /// Runtime count for the current profile frame.
    pub(crate) rtc: u32,
    /// Runtime limit per frame in fine-counter units; 0 means unlimited.
    pub(crate) rtlim: u32,
    /// Runtime consumed against the limit. For a child task this counter is
    /// unused; accounting routes to the top ancestor.
    pub(crate) rtlimctr: u32,
    /// Parent task index; children charge runtime to their top ancestor.
    pub(crate) parent: Option<u16>,

    /// Memory regions loaded into the MPU when this task (or an LSR it
    /// owns) is dispatched. The last slot tracks the task's current stack.
    #[cfg(feature = "mpu")]
    pub(crate) mpa: crate::mpu::Mpa,
}

impl Tcb {
    pub(crate) const fn empty() -> Self {
        Self {
            save: crate::arch::SavedState::new(),
            cbtype: CbType::Free,
            gen: Generation::ZERO,
            state: TaskState::Ready,
            flags: TaskFlags::empty(),
            pri: Priority(0),
            fl: Link::NONE,
            bl: Link::NONE,
            loc: QueueLoc::None,
            spp: 0,
            stp: 0,
            sbp: 0,
            ssz: 0,
            shwm: 0,
            stack_block: WORD_NONE,
            entry: None,
            par: 0,
            rv: 0,
            srnest_save: 0,
            err: ErrorCode::Ok,
            hook: None,
            rtc: 0,
            rtlim: 0,
            rtlimctr: 0,
            parent: None,
            #[cfg(feature = "mpu")]
            mpa: crate::mpu::Mpa::empty(),
        }
    }

    /// A task with no saved stack pointer is stopped; anything else is
    /// resumable.
    pub(crate) fn is_stopped(&self) -> bool {
        self.save.stack_pointer() == 0
    }

    /// Whether this task could be dispatched without taking a stack from the
    /// pool: it is resumable, or it holds a bound or still-attached stack.
    pub(crate) fn has_stack(&self) -> bool {
        !self.is_stopped() || self.stp != 0
    }

    pub(crate) fn call_hook(&self, event: HookEvent) {
        if self.flags.contains(TaskFlags::HOOKD) {
            if let Some(hook) = self.hook {
                hook(event);
            }
        }
    }

    pub fn priority(&self) -> Priority {
        self.pri
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn error(&self) -> ErrorCode {
        self.err
    }
}

impl QueueNode for Tcb {
    fn fl(&self) -> Link {
        self.fl
    }
    fn bl(&self) -> Link {
        self.bl
    }
    fn set_fl(&mut self, link: Link) {
        self.fl = link;
    }
    fn set_bl(&mut self, link: Link) {
        self.bl = link;
    }
    fn is_task(&self) -> bool {
        self.cbtype == CbType::Task
    }
}

/// The task control-block pool: a fixed array with type tags, allocated by
/// first-fit scan.
pub struct TcbPool {
    pub(crate) slots: [Tcb; NUM_TASKS],
}

impl TcbPool {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { Tcb::empty() }; NUM_TASKS],
        }
    }

    /// Claims a free slot. The slot keeps the generation it accumulated over
    /// previous lives, so stale handles to the prior occupant miss.
    pub(crate) fn alloc(&mut self) -> Result<usize, ErrorCode> {
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            if slot.cbtype == CbType::Free {
                let gen = slot.gen;
                *slot = Tcb::empty();
                slot.gen = gen;
                slot.cbtype = CbType::Task;
                return Ok(ix);
            }
        }
        Err(ErrorCode::OutOfTcbs)
    }

    /// Returns a slot to the pool, bumping its generation so existing
    /// handles go stale.
    pub(crate) fn free(&mut self, ix: usize) {
        let gen = self.slots[ix].gen.next();
        self.slots[ix] = Tcb::empty();
        self.slots[ix].gen = gen;
    }

    /// Checks a user-supplied handle: in range, currently a task, matching
    /// generation.
    pub(crate) fn check(&self, id: abi::TaskId) -> Result<usize, ErrorCode> {
        let ix = id.index();
        if ix >= NUM_TASKS {
            return Err(ErrorCode::InvalidParm);
        }
        let slot = &self.slots[ix];
        if slot.cbtype != CbType::Task || slot.gen != id.generation() {
            return Err(ErrorCode::StaleHandle);
        }
        Ok(ix)
    }

    /// Produces a current handle for slot `ix`.
    pub(crate) fn id_for(&self, ix: usize) -> abi::TaskId {
        abi::TaskId::for_index_and_gen(ix, self.slots[ix].gen)
    }

    /// Index of the top-most ancestor whose runtime-limit counter `ix`
    /// charges. Tasks without a parent charge themselves.
    #[cfg(feature = "rtlim")]
    pub(crate) fn rtlim_target(&self, ix: usize) -> usize {
        let mut cur = ix;
        // Parent chains are short; the bound guards against a corrupted
        // chain forming a cycle.
        for _ in 0..NUM_TASKS {
            match self.slots[cur].parent {
                Some(p) if usize::from(p) < NUM_TASKS => cur = usize::from(p),
                _ => break,
            }
        }
        cur
    }
}

/// A FIFO wait list threaded through the same intrusive links as the run
/// queue. Used for the runtime-limit semaphore; tasks parked here are
/// released in arrival order at the next profile frame.
pub struct WaitQueue {
    head: Link,
    tail: Link,
    count: u32,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        Self {
            head: Link::NONE,
            tail: Link::NONE,
            count: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn enqueue(&mut self, arena: &mut [Tcb], ix: usize) {
        arena[ix].fl = Link::NONE;
        arena[ix].bl = self.tail;
        match self.tail.as_task() {
            Some(t) => arena[t].fl = Link::task(ix),
            None => self.head = Link::task(ix),
        }
        self.tail = Link::task(ix);
        self.count += 1;
    }

    pub(crate) fn dequeue_head(&mut self, arena: &mut [Tcb]) -> Option<usize> {
        let ix = self.head.as_task()?;
        if ix >= arena.len() {
            // Damaged list; drop it rather than chase a wild link.
            *self = Self::new();
            return None;
        }
        self.head = arena[ix].fl;
        match self.head.as_task() {
            Some(n) if n < arena.len() => arena[n].bl = Link::NONE,
            _ => self.tail = Link::NONE,
        }
        arena[ix].fl = Link::NONE;
        arena[ix].bl = Link::NONE;
        self.count = self.count.saturating_sub(1);
        Some(ix)
    }

    /// Unlinks `ix` from wherever it sits in the list.
    pub(crate) fn remove(&mut self, arena: &mut [Tcb], ix: usize) {
        let prev = arena[ix].bl;
        let next = arena[ix].fl;
        match prev.as_task() {
            Some(p) if p < arena.len() => arena[p].fl = next,
            _ => self.head = next,
        }
        match next.as_task() {
            Some(n) if n < arena.len() => arena[n].bl = prev,
            _ => self.tail = prev,
        }
        arena[ix].fl = Link::NONE;
        arena[ix].bl = Link::NONE;
        self.count = self.count.saturating_sub(1);
    }
}
