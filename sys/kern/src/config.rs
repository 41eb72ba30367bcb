// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time kernel configuration.
//!
//! The kernel takes a single shape fixed at build time; these constants are
//! that shape. Applications that need different numbers rebuild the kernel.

/// Number of task control blocks, including the idle task.
pub const NUM_TASKS: usize = 16;

/// Number of LSR control blocks, including the kernel's own (profile frame).
pub const NUM_LSRS: usize = 8;

/// Number of priority levels. Priority 0 is the idle level.
pub const PRI_NUM: usize = 8;

/// LSR queue depth: maximum posted-but-undrained `(lsr, parameter)` pairs.
pub const LQ_SIZE: usize = 16;

/// Total block size carved per stack: pad plus usable region. Must be a
/// power of two: each block is also an MPU region on ARMv7-M, which only
/// expresses power-of-two sizes (and requires bases aligned to them).
pub const SIZE_STACK_BLK: usize = 1024;

/// Bytes of sentinel pad below the usable region of each pool stack. Small
/// overruns land here and are caught by the scan instead of a neighbor.
pub const SIZE_STACK_PAD: usize = 8;

/// Usable bytes of each pool stack.
pub const SIZE_STACK: usize = SIZE_STACK_BLK - SIZE_STACK_PAD;

/// Number of stack blocks in the shared pool.
pub const NUM_STACKS: usize = 8;

/// Word written across free stacks; the high-water scan counts words that
/// still hold it.
pub const STK_FILL_VAL: u32 = 0x5555_AAAA;

/// Kernel tick rate.
pub const TICKS_PER_SEC: u32 = 1000;

/// Fine-counter counts per tick: the period of the free-running counter
/// behind `time::ptime_get`. With the SysTick reload pinned to this value the
/// counter rolls exactly at tick boundaries, which the profile clock's
/// wraparound correction depends on.
pub const TICK_COUNTS_PER_TICK: u32 = 1000;

/// Ticks per profile frame.
pub const RTC_FRAME: u32 = 100;

/// Rows in the profile snapshot buffer; each row covers one frame.
pub const RTCB_SIZE: usize = 16;

/// Words per profile snapshot row: timestamp, ISR total, LSR total, one slot
/// per task, task sum, overhead.
pub const RTCB_ROW: usize = NUM_TASKS + 5;

/// MPU region slots reserved for unchanging system regions, programmed once
/// at boot and never touched by the per-task reload.
#[cfg(feature = "mpu")]
pub const MPU_STATIC_SLOTS: usize = 0;

/// MPU region slots reloaded from the dispatched task's (or LSR owner's)
/// region array on every protection-domain change. The last slot of a task's
/// array always describes its stack.
#[cfg(feature = "mpu")]
pub const MPU_ACTIVE_SLOTS: usize = 8;
