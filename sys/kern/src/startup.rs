// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup and the kernel-state access point.

use abi::{ErrorCode, Priority, TaskFlags};
use kerncore::stackpool::StackPool;

use crate::config::{
    NUM_STACKS, SIZE_STACK_BLK, SIZE_STACK_PAD, STK_FILL_VAL,
};
use crate::sched::{self, Kernel, ScheduleOutcome};
use crate::stack::StackMgr;

/// Backing store for the stack pool. Aligned to the block size so each
/// block is usable as an MPU region on ARMv7-M.
#[repr(align(1024))]
struct StackArena([u32; NUM_STACKS * SIZE_STACK_BLK / 4]);

static mut STACK_ARENA: StackArena = StackArena([0; NUM_STACKS * SIZE_STACK_BLK / 4]);

#[cfg(feature = "profile")]
static mut RTCB: [u32; crate::config::RTCB_ROW * crate::config::RTCB_SIZE] =
    [0; crate::config::RTCB_ROW * crate::config::RTCB_SIZE];

/// The kernel singleton. `None` until `init_kernel` runs.
static mut KERNEL: Option<Kernel> = None;

/// Manufactures a mutable reference to the kernel and hands it to `body`.
///
/// The borrow checker cannot see across exception boundaries, so the
/// aliasing discipline is the kernel's own: every entry (service, ISR
/// bracket, context-switch exception) derives a fresh reference from the
/// same place, holds it only for a bounded section, and never across a
/// point where foreign code runs -- LSR callbacks and the context switch
/// itself happen with no reference live. A frame suspended mid-section is
/// not running, and nothing here is reachable from another core.
///
/// Because the lifetime of the reference passed into `body` is anonymous,
/// the reference can't easily be stored, which is deliberate.
///
/// # Safety
///
/// Call only from kernel entry points that honor the discipline above, with
/// interrupts masked wherever the section must be atomic. Panics (fatally)
/// if the kernel has not been initialized.
pub(crate) unsafe fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    let k = (*core::ptr::addr_of_mut!(KERNEL))
        .as_mut()
        .expect("kernel not started");
    body(k)
}

/// Builds the kernel's state: control-block pools, the stack pool carved
/// from its arena, the idle task, and the profile-frame LSR.
///
/// Call exactly once from the reset path, before creating application
/// tasks. Services work from here on (they defer any context switch until
/// [`start_kernel`]).
///
/// # Safety
///
/// Must run before any other kernel entry point, exactly once, with
/// interrupts still disabled from reset.
pub unsafe fn init_kernel() {
    klog!("starting: pools");

    let arena = &mut (*core::ptr::addr_of_mut!(STACK_ARENA)).0[..];
    let (pool, pool_err) = match StackPool::new(
        arena,
        SIZE_STACK_BLK / 4,
        SIZE_STACK_PAD / 4,
        STK_FILL_VAL,
    ) {
        Ok(p) => (p, false),
        Err(_) => (StackPool::empty(), true),
    };

    *core::ptr::addr_of_mut!(KERNEL) = Some(Kernel::new(StackMgr::new(pool)));

    if pool_err {
        with_kernel(|k| k.err.report(ErrorCode::HeapInitFail));
    }

    crate::arch::prefill_main_stack(STK_FILL_VAL);

    // The idle task: priority 0, trusted, permanently stacked so it can
    // always run -- the out-of-stacks policy leans on that.
    let idle = crate::ssr::task_create(
        crate::idle::idle_main,
        Priority(0),
        TaskFlags::STK_PERM | TaskFlags::TRUST,
        None,
    )
    .expect("idle task");
    with_kernel(|k| {
        k.idle = idle.index();
        k.ct = idle.index();
    });
    crate::ssr::task_start(idle, 0).expect("idle start");

    #[cfg(feature = "profile")]
    {
        let lsr = crate::ssr::lsr_create(
            crate::profile::frame_lsr_main,
            abi::LsrFlags::TRUST,
            None,
        )
        .expect("frame lsr");
        with_kernel(|k| k.profile_lsr = Some(lsr.index() as u16));
        crate::profile::profile_init(&mut *core::ptr::addr_of_mut!(RTCB));
    }
}

/// Dispatches the first task and hands the processor to the application.
///
/// `tick_divisor` is the number of fine-counter counts per kernel tick on
/// this board; it programs the tick timer and fixes the profile clock's
/// period.
///
/// # Safety
///
/// Call exactly once, after `init_kernel` and application task creation.
pub unsafe fn start_kernel(tick_divisor: u32) -> ! {
    klog!("starting: first dispatch");

    crate::arch::int_disable();
    // Bring-up held the nesting counter at 1 so no service could switch
    // early; the boot dispatch runs under the same barrier.
    with_kernel(|k| k.srnest = 1);
    match sched::schedule(false) {
        ScheduleOutcome::Task => {}
        // No interrupt source exists yet, so nothing can have staged an LSR.
        ScheduleOutcome::SafeLsr => crate::fail::die("safe LSR at boot"),
    }
    with_kernel(|k| k.srnest = 0);

    klog!("starting: moxie");
    crate::arch::start_first_task(tick_divisor)
}
