// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel time: the 32-bit tick counter, the fine-grained counter under it,
//! and the 64-bit timestamp composed from the two.
//!
//! `etime` advances once per SysTick interrupt and is the kernel's coarse
//! clock; everything timeout-shaped in the system is denominated in ticks.
//! `ptime_get` reads the free-running counter beneath the tick -- its period
//! is exactly one tick (`TICK_COUNTS_PER_TICK` counts), which is what lets
//! the profile clock correct for wraparound with a single conditional add.
//! [`now`] composes both into a [`Timestamp`] that does not wrap for the
//! life of the system.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::TICK_COUNTS_PER_TICK;

/// Kernel tick counter. Written only by the tick interrupt; reads from task
/// context may observe the previous tick, which is fine for a coarse clock.
static TICKS: AtomicU32 = AtomicU32::new(0);

/// In-kernel timestamp: fine-counter units since boot.
///
/// This is the 64-bit composition of the 32-bit tick counter with the fine
/// counter beneath it, so unlike either part it never rolls over in
/// practice (the parts top out below 2^62 combined).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Whole ticks elapsed at this instant.
    pub fn ticks(self) -> u32 {
        (self.0 / u64::from(TICK_COUNTS_PER_TICK)) as u32
    }

    /// Fine counts into the current tick.
    pub fn subtick(self) -> u32 {
        (self.0 % u64::from(TICK_COUNTS_PER_TICK)) as u32
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}

/// Reads the tick counter.
pub fn etime() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Advances the tick counter. Called from the tick interrupt only.
pub(crate) fn advance_tick() -> u32 {
    let t = TICKS.load(Ordering::Relaxed).wrapping_add(1);
    TICKS.store(t, Ordering::Relaxed);
    t
}

/// Reads the fine counter, in counts since the last tick boundary. The
/// value is in `0..TICK_COUNTS_PER_TICK`; the counter rolls exactly when
/// the tick fires.
pub fn ptime_get() -> u32 {
    crate::arch::ptime_now()
}

/// Reads the composed kernel clock.
pub fn now() -> Timestamp {
    // The two counters advance independently; if the tick rolls between the
    // reads, the composition would go backward by almost a tick. Re-read
    // until both halves belong to the same tick.
    loop {
        let t = etime();
        let fine = ptime_get();
        if etime() == t {
            return Timestamp(
                u64::from(t) * u64::from(TICK_COUNTS_PER_TICK) + u64::from(fine),
            );
        }
    }
}
