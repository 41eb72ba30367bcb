// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime profiling: the ISR brackets, the kernel tick, and the
//! profile-frame LSR.
//!
//! Accounting is intrusive in the schedulers -- every transition between
//! overhead, task, LSR, and ISR time closes one span and opens another (see
//! `kerncore::profile`). This module adds the pieces that face outward: the
//! brackets application ISRs call, the tick that paces frames, and the LSR
//! that snapshots a finished frame into the application's buffer.
//!
//! The first frame after profiling starts only zeroes the counters; from
//! then on, each recorded row satisfies `sum(task) + isr + lsr + overhead =
//! frame length`.

use crate::arch;
use crate::sched::Kernel;
use crate::startup::with_kernel;

#[cfg(feature = "profile")]
use crate::config::{RTCB_ROW, RTC_FRAME, TICK_COUNTS_PER_TICK};

/// Brackets the start of every base (outermost) interrupt handler.
///
/// Raises the service-nesting counter so a handler that interrupts the
/// scheduler returns to the point of interrupt, and closes out the
/// interrupted runtime span. Nested handlers call this too; only the base
/// entry accounts.
pub fn isr_start() {
    // Safety: exception-level kernel entry, masked for the field updates.
    unsafe {
        arch::with_ints_masked(|| {
            with_kernel(|k| {
                k.srnest += 1;
                #[cfg(feature = "profile")]
                {
                    let credit = k.clock.isr_start(crate::time::ptime_get());
                    k.credit_task(credit);
                }
            })
        })
    }
}

/// Brackets the end of every base interrupt handler. When the handler
/// unwinds the last nesting level and deferred work is queued (or a service
/// underneath requested a reschedule), the context switch is pended to run
/// after the handler returns.
pub fn isr_end() {
    // Safety: as in `isr_start`.
    unsafe {
        arch::with_ints_masked(|| {
            with_kernel(|k| {
                #[cfg(feature = "profile")]
                k.clock.isr_end(crate::time::ptime_get());
                k.srnest = k.srnest.saturating_sub(1);
                if k.srnest == 0 && (!k.lq.is_empty() || !k.sched.is_empty()) {
                    arch::pend_context_switch();
                }
            })
        })
    }
}

impl Kernel {
    /// One kernel tick: advances the coarse clock and, at frame boundaries,
    /// posts the profile-frame LSR. Called from the tick interrupt with
    /// interrupts masked.
    pub(crate) fn tick(&mut self) {
        crate::time::advance_tick();
        #[cfg(feature = "profile")]
        {
            self.frame_countdown = self.frame_countdown.saturating_sub(1);
            if self.frame_countdown == 0 {
                self.frame_countdown = RTC_FRAME;
                if let Some(lsr) = self.profile_lsr {
                    if self.lq.post((lsr, 0)).is_err() {
                        self.err.report(abi::ErrorCode::LqOvfl);
                    }
                }
            }
        }
    }

    /// Frame rollover: snapshot the finished frame (unless this is the
    /// priming frame), zero the counters, and release runtime-limited
    /// tasks.
    #[cfg(feature = "profile")]
    pub(crate) fn profile_frame(&mut self) {
        // The main-stack scan re-arms once per frame.
        self.stacks.ms_scanned = false;

        let primed = self.frames.as_ref().map(|f| f.is_primed()).unwrap_or(true);
        if !primed {
            // Baseline frame: discard whatever accumulated before
            // profiling was live.
            if let Some(f) = self.frames.as_mut() {
                f.prime();
            }
            let _ = self.clock.take_counters();
        } else {
            let (isr, lsr) = self.clock.take_counters();
            let etime = crate::time::etime();
            let frame_len = RTC_FRAME * TICK_COUNTS_PER_TICK;
            if let Some(f) = self.frames.as_mut() {
                f.record(etime, isr, lsr, frame_len, self.tasks.slots.iter().map(|t| t.rtc));
            }
        }
        for t in self.tasks.slots.iter_mut() {
            t.rtc = 0;
        }

        #[cfg(feature = "rtlim")]
        {
            // A new frame refills every runtime budget; tasks parked on the
            // limit semaphore return to the run queue in arrival order.
            for t in self.tasks.slots.iter_mut() {
                t.rtlimctr = 0;
            }
            while let Some(ix) = self.rtlim_wait.dequeue_head(&mut self.tasks.slots) {
                self.ready_task(ix);
            }
        }
    }
}

/// Entry of the kernel's profile-frame LSR, posted by the tick at each
/// frame boundary.
#[cfg(feature = "profile")]
pub(crate) fn frame_lsr_main(_par: u32) {
    // Safety: trusted-LSR context; masked for the whole rollover so the
    // snapshot is coherent.
    unsafe {
        arch::with_ints_masked(|| with_kernel(|k| k.profile_frame()));
    }
}

/// Hands the kernel a snapshot buffer and starts profiling. The buffer is
/// a flat `(NUM_TASKS + 5) * RTCB_SIZE` word array treated as a ring of
/// rows; see `kerncore::profile::FrameRecorder` for the row layout.
///
/// Normally called once during board bring-up, before the kernel starts.
#[cfg(feature = "profile")]
pub fn profile_init(buf: &'static mut [u32]) {
    for w in buf.iter_mut() {
        *w = 0;
    }
    // Safety: single-field store under mask.
    unsafe {
        arch::with_ints_masked(|| {
            with_kernel(|k| {
                k.frames = Some(kerncore::FrameRecorder::new(buf, RTCB_ROW));
            })
        });
    }
}
