// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and application code.
//!
//! Everything here is deliberately plain data: handles, flags, and error
//! codes. The kernel's internal control blocks live in `kern`; application
//! code only ever sees the types in this crate.

#![no_std]

/// Number of bits of a `TaskId` or `LsrId` used for the pool index; the
/// remaining bits hold the generation number.
pub const INDEX_BITS: u32 = 8;

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines a pool index with a generation number. The generation
/// starts at zero and increments (wrapping) every time the underlying control
/// block is recycled, so a handle held across a delete/create cycle stops
/// matching and the kernel can refuse it instead of acting on the wrong task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct TaskId(pub u16);

impl TaskId {
    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId((index as u16 & Self::INDEX_MASK) | (gen.0 as u16) << INDEX_BITS)
    }

    /// Extracts the index part of this ID.
    pub fn index(self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(self) -> Generation {
        Generation((self.0 >> INDEX_BITS) as u8)
    }
}

/// Names a particular incarnation of a Link Service Routine.
///
/// Same packing as `TaskId`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct LsrId(pub u16);

impl LsrId {
    /// Fabricates an `LsrId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        LsrId((index as u16 & TaskId::INDEX_MASK) | (gen.0 as u16) << INDEX_BITS)
    }

    /// Extracts the index part of this ID.
    pub fn index(self) -> usize {
        usize::from(self.0 & TaskId::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(self) -> Generation {
        Generation((self.0 >> INDEX_BITS) as u8)
    }
}

/// Type used to track control-block generation numbers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Generation(pub u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

/// Indicates priority of a task.
///
/// Priorities are small numbers starting from zero, and numerically *higher*
/// priorities are more important: priority 0 is the idle level, and
/// `PRI_NUM - 1` preempts everything else.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves about whether `>` means numerically
/// greater or more important. Use `is_higher_than`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`.
    pub fn is_higher_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Numeric level, for indexing the run queue.
    pub fn level(self) -> usize {
        usize::from(self.0)
    }
}

/// Scheduling state of a task.
///
/// "Stopped" is not a state of its own: a task with no saved stack pointer is
/// stopped regardless of which queue it sits in (normally none).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum TaskState {
    /// Queued in the run queue, waiting for the processor.
    #[default]
    Ready,
    /// Currently owns the processor.
    Run,
    /// Parked on a wait object (semaphore, event group, timer, ...).
    Wait,
    /// Deleted; the control block is being recycled.
    Del,
}

/// Control-block type tags.
///
/// Every control block starts with one of these so that any pointer-shaped
/// value the scheduler finds in a queue can be checked before use.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum CbType {
    /// Slot is not allocated.
    #[default]
    Free = 0,
    Task,
    Lsr,
    Semaphore,
    Queue,
    EventGroup,
    Timer,
    EventQueue,
}

/// Severity classes for kernel errors, in increasing order of badness.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Purely informational; normal operation continues.
    Info,
    /// The kernel recovered and continues; the caller may need to retry.
    Recoverable,
    /// The affected task is compromised and may be stopped by the error
    /// hook; other tasks are unaffected.
    TaskFatal,
    /// Kernel state is compromised.
    KernelFatal,
}

/// Error codes reported by kernel services and by the scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    Ok = 0,
    /// A task ran past the end of its stack.
    StkOvfl,
    /// The main (kernel) stack ran past its end.
    MstkOvfl,
    /// No free stack was available for a task start.
    OutOfStks,
    /// The run queue or its top cursor failed validation.
    RqError,
    /// A damaged queue level could not be mended and was emptied.
    BrokenQ,
    /// A damaged queue level was successfully mended.
    QFixed,
    /// The stack arena could not be carved into blocks at boot.
    HeapInitFail,
    /// The LSR queue was full when an interrupt tried to post.
    LqOvfl,
    /// A service argument was out of range.
    InvalidParm,
    /// The operation is not legal in the caller's context or the target's
    /// current state.
    InvalidOp,
    /// The task control-block pool is exhausted.
    OutOfTcbs,
    /// The LSR control-block pool is exhausted.
    OutOfLcbs,
    /// A handle's generation no longer matches its control block.
    StaleHandle,
    /// The caller holds the task-switch lock and the operation would
    /// surrender the processor while it is held.
    Locked,
}

impl ErrorCode {
    pub fn severity(self) -> Severity {
        match self {
            ErrorCode::Ok | ErrorCode::QFixed => Severity::Info,
            ErrorCode::OutOfStks
            | ErrorCode::LqOvfl
            | ErrorCode::InvalidParm
            | ErrorCode::InvalidOp
            | ErrorCode::OutOfTcbs
            | ErrorCode::OutOfLcbs
            | ErrorCode::StaleHandle
            | ErrorCode::Locked => Severity::Recoverable,
            ErrorCode::StkOvfl => Severity::TaskFatal,
            ErrorCode::MstkOvfl
            | ErrorCode::RqError
            | ErrorCode::BrokenQ
            | ErrorCode::HeapInitFail => Severity::KernelFatal,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }
}

bitflags::bitflags! {
    /// Per-task boolean state, packed.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct TaskFlags: u16 {
        /// Stack is bound to the task for its lifetime rather than borrowed
        /// from the shared pool at each start.
        const STK_PERM = 1 << 0;
        /// Scheduler checks this task's stack for overflow on every exit.
        const STK_CHK = 1 << 1;
        /// Stack overflow has been detected and reported (latch).
        const STK_OVFL = 1 << 2;
        /// The stack high-water mark reflects an actual scan.
        const STK_HWMV = 1 << 3;
        /// A lifecycle hook callback is installed.
        const HOOKD = 1 << 4;
        /// Task runs in unprivileged (user) mode.
        const UMODE = 1 << 5;
        /// Task runs with kernel privilege and an open MPU.
        const TRUST = 1 << 6;
        /// Task starts with the scheduler lock already held.
        const STRT_LOCKD = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Per-LSR permissions.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct LsrFlags: u8 {
        /// LSR is called in place with kernel privilege (trusted LSR).
        const TRUST = 1 << 0;
        /// Sandboxed LSR runs unprivileged (as opposed to privileged but
        /// MPU-confined).
        const UMODE = 1 << 1;
    }
}

/// Events delivered to a task's lifecycle hook, if one is installed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HookEvent {
    /// Task is about to resume after preemption or a wait.
    Enter,
    /// Task is being preempted or has begun waiting.
    Exit,
    /// Task is being started from scratch.
    Start,
    /// Task is stopping; its pooled stack is gone.
    Stop,
}

/// Fields readable through the peek services.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PeekKey {
    /// Task priority.
    Priority,
    /// Task scheduling state.
    State,
    /// Task's last error code.
    Error,
    /// Stack high-water mark, in bytes.
    Shwm,
    /// Runtime count accumulated this profile frame.
    Rtc,
    /// Kernel tick counter (system peek).
    Etime,
    /// LSR queue high-water mark (system peek).
    Lqhwm,
}

/// Entry signature for tasks and LSRs: one word of parameter.
pub type EntryFn = fn(u32);
