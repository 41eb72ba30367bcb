// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stub architecture for host builds. Nothing here can actually switch a
//! context; it exists so the portable kernel code type-checks away from the
//! target.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::task::Tcb;

macro_rules! klog {
    ($s:expr) => { println!($s) };
    ($s:expr, $($tt:tt)*) => { println!($s, $($tt)*) };
}

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

static CURRENT_TASK_PTR: AtomicPtr<Tcb> = AtomicPtr::new(core::ptr::null_mut());

#[derive(Debug, Default)]
pub struct SavedState {
    psp: u32,
    exc_return: u32,
    control: u32,
}

impl SavedState {
    pub(crate) const fn new() -> Self {
        Self {
            psp: 0,
            exc_return: 0,
            control: 0,
        }
    }

    pub(crate) fn stack_pointer(&self) -> u32 {
        self.psp
    }

    pub(crate) fn set_stack_pointer(&mut self, sp: u32) {
        self.psp = sp;
    }

    pub(crate) fn clear_stack_pointer(&mut self) {
        self.psp = 0;
    }
}

pub unsafe fn set_clock_freq(_tick_divisor: u32) {}

pub unsafe fn int_disable() {}

pub unsafe fn int_enable() {}

pub unsafe fn with_ints_masked<R>(f: impl FnOnce() -> R) -> R {
    f()
}

pub fn in_pendsv() -> bool {
    false
}

pub fn pend_context_switch() {}

pub fn wait_for_interrupt() {}

pub unsafe fn set_current_task(task: &Tcb) {
    CURRENT_TASK_PTR.store(task as *const _ as *mut _, Ordering::Relaxed);
}

pub fn ptime_now() -> u32 {
    0
}

pub(crate) fn make_frame(task: &mut Tcb) {
    // Mark the task resumable without building a real frame.
    task.save = SavedState::new();
    task.save.psp = task.sbp;
    task.save.exc_return = 0;
    #[cfg(feature = "mpu")]
    {
        task.save.control = task.flags.contains(abi::TaskFlags::UMODE) as u32;
    }
}

#[cfg(feature = "mpu")]
pub(crate) fn stage_safe_lsr(_entry: abi::EntryFn, _par: u32, _umode: bool) {
    panic!("safe LSR on fake arch");
}

pub(crate) fn prefill_main_stack(_fill: u32) {}

pub(crate) fn main_stack_used(_fill: u32) -> (u32, u32) {
    (0, 4096)
}

pub unsafe fn start_first_task(_tick_divisor: u32) -> ! {
    panic!("entering userland");
}
