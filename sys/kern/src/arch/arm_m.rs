// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7-M and ARMv8-M.
//!
//! # Exception usage
//!
//! - `SVCall` carries three requests: the boot handoff into the first task,
//!   auto-stop from a sandboxed task's return thunk, and completion of a
//!   safe LSR. (Privileged code never needs SVC; it calls the kernel
//!   directly in thread mode.)
//! - `SysTick` maintains the kernel tick and paces profile frames.
//! - `PendSV` performs every context switch, at the lowest exception
//!   priority, so it runs only once all other exception activity has
//!   unwound.
//!
//! An interrupt that makes a task ready never switches contexts itself --
//! it posts an LSR and, on the way out of the base handler, pends `PendSV`.
//! The pended exception performs the full register save/restore around the
//! schedulers. Task SSRs that need a switch pend the same exception from
//! thread mode; it fires the instant interrupts are enabled, making the
//! switch synchronous from the caller's point of view.
//!
//! # The tick and the fine counter
//!
//! SysTick doubles as the profile timebase: its down-counter reloads every
//! tick, so `reload - current` is a free-running count that rolls exactly
//! at tick boundaries. The profile clock's wraparound correction leans on
//! that equality.

use core::arch::global_asm;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::task::Tcb;

#[cfg(not(any(feature = "klog-semihosting", feature = "klog-itm")))]
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($s:expr) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $s);
        }
    };
    ($s:expr, $($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $s, $($tt)*);
        }
    };
}

#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($s:expr) => { let _ = cortex_m_semihosting::hprintln!($s); };
    ($s:expr, $($tt:tt)*) => { let _ = cortex_m_semihosting::hprintln!($s, $($tt)*); };
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("assertion failed");
        }
    };
}

/// On ARMvx-M we have to use a global to record the current task pointer,
/// since we don't have a scratch register. The exception entry/exit
/// assembly saves and restores machine state through it; the struct behind
/// it must therefore start with [`SavedState`].
#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<Tcb> = AtomicPtr::new(core::ptr::null_mut());

/// To allow our clock frequency to be easily determined from a debugger, we
/// store it in memory.
#[no_mangle]
static CLOCK_FREQ_KHZ: AtomicU32 = AtomicU32::new(0);

/// Supervisor-call numbers. `0xFF` is the boot handoff, recognized in the
/// handler by the caller's mode rather than by number.
const SVC_AUTO_STOP: u32 = 1;
#[cfg(feature = "mpu")]
const SVC_LSR_DONE: u32 = 2;

/// Volatile registers that must be saved across context switches, plus the
/// control state that varies per task.
///
/// Field order is load-bearing: the context-switch assembly stores and
/// loads these with `stm`/`ldm` at fixed offsets from the TCB base.
#[repr(C)]
#[derive(Debug)]
pub struct SavedState {
    // NOTE: the following fields must be kept contiguous and in order!
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    psp: u32,
    exc_return: u32,
    control: u32,
    #[cfg(armv8m)]
    psplim: u32,
    fpu_regs: [u32; 16], // s16-s31
    // NOTE: the above fields must be kept contiguous and in order!
}

impl SavedState {
    pub(crate) const fn new() -> Self {
        Self {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            psp: 0,
            exc_return: 0,
            control: 0,
            #[cfg(armv8m)]
            psplim: 0,
            fpu_regs: [0; 16],
        }
    }

    /// Saved process stack pointer. Zero means the task holds no stack and
    /// is stopped.
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

/// Stuff placed on the stack at exception entry whether or not an FPU is
/// present.
#[derive(Debug, Default)]
#[repr(C)]
pub struct BaseExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Extended frame stacked when the FPU is active, which our EXC_RETURN
/// value requests.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ExtendedExceptionFrame {
    base: BaseExceptionFrame,
    fpu_regs: [u32; 16],
    fpscr: u32,
    reserved: u32,
}

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// We don't really care about the initial FPU mode; 0 is reasonable.
const INITIAL_FPSCR: u32 = 0;

/// EXC_RETURN for entering tasks: thread mode, process stack, extended
/// (FPU) frame. We assume TrustZone has not been enabled, even on parts
/// that support it.
const EXC_RETURN_CONST: u32 = 0xFFFFFFED;

// Because debuggers need to know the clock frequency to set the SWO clock
// scaler that enables ITM, and because ITM is particularly useful when
// debugging boot failures, this should be set as early in boot as it can
// be.
pub unsafe fn set_clock_freq(tick_divisor: u32) {
    CLOCK_FREQ_KHZ.store(tick_divisor, Ordering::Relaxed);
}

/// Masks interrupts at PRIMASK. Pairs with [`int_enable`]; the schedulers
/// toggle these around their atomic sections.
///
/// # Safety
///
/// Caller must not mask across anything that waits on an interrupt.
#[inline(always)]
pub unsafe fn int_disable() {
    cortex_m::interrupt::disable();
}

/// Unmasks interrupts at PRIMASK.
///
/// # Safety
///
/// Caller must be prepared for any pended exception to fire immediately.
#[inline(always)]
pub unsafe fn int_enable() {
    cortex_m::interrupt::enable();
}

/// Runs `f` with interrupts masked, restoring the previous mask state
/// afterward (so it nests).
///
/// # Safety
///
/// As for [`int_enable`] on the restore edge.
#[inline(always)]
pub unsafe fn with_ints_masked<R>(f: impl FnOnce() -> R) -> R {
    let prev = cortex_m::register::primask::read();
    cortex_m::interrupt::disable();
    let r = f();
    if prev.is_active() {
        cortex_m::interrupt::enable();
    }
    r
}

/// True when executing inside the PendSV handler. Pending PendSV from
/// within itself would re-enter the switch, so callers check first.
pub fn in_pendsv() -> bool {
    let ipsr: u32;
    // Safety: reading IPSR has no side effects.
    unsafe {
        core::arch::asm!(
            "mrs {}, IPSR",
            out(reg) ipsr,
            options(pure, nomem, preserves_flags, nostack),
        );
    }
    ipsr & 0x1FF == 14
}

/// Sets the PendSV exception pending; it fires once no higher-priority
/// exception is active and interrupts are unmasked.
pub fn pend_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Sleeps until the next interrupt.
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

/// Records the address of `task` as the current task, for the exception
/// entry/exit assembly.
///
/// # Safety
///
/// This records a pointer that aliases `task`. As long as the exception
/// paths are the only readers, and the task being stored is in the task
/// table, you'll be okay.
pub unsafe fn set_current_task(task: &Tcb) {
    CURRENT_TASK_PTR.store(task as *const _ as *mut _, Ordering::Relaxed);
}

/// Reads the fine counter: counts since the last tick boundary, in
/// `0 .. TICK_COUNTS_PER_TICK`. Derived from the SysTick down-counter so
/// it rolls exactly when the tick fires.
pub fn ptime_now() -> u32 {
    let syst = unsafe { &*cortex_m::peripheral::SYST::PTR };
    let reload = syst.rvr.read() & 0x00FF_FFFF;
    let current = syst.cvr.read() & 0x00FF_FFFF;
    reload.wrapping_sub(current)
}

/// Builds the initial exception frame for a task start: entry point in the
/// stacked PC, the start parameter in r0, and the auto-stop thunk in LR so
/// a return from the entry function stops the task. The saved state is
/// reset so the exception return drops straight into the entry function.
pub(crate) fn make_frame(task: &mut Tcb) {
    let Some(entry) = task.entry else {
        // A task with no entry cannot start; treat as an aborted start.
        return;
    };
    let frame_size = core::mem::size_of::<ExtendedExceptionFrame>();
    let stack_top = task.sbp as usize;

    // Modern ARMvX-M machines require 8-byte stack alignment; the pool
    // guarantees it, but a corrupted TCB might not.
    uassert!(stack_top & 0x7 == 0);
    uassert!(stack_top >= frame_size);

    let frame = (stack_top - frame_size) as *mut ExtendedExceptionFrame;

    let auto_stop: u32;
    #[cfg(feature = "mpu")]
    {
        auto_stop = if task.flags.contains(abi::TaskFlags::UMODE) {
            extern "C" {
                fn moxie_user_auto_stop() -> !;
            }
            moxie_user_auto_stop as usize as u32
        } else {
            crate::sched::auto_stop as usize as u32
        };
    }
    #[cfg(not(feature = "mpu"))]
    {
        auto_stop = crate::sched::auto_stop as usize as u32;
    }

    // Safety: the frame lies within the stack block the kernel bound to
    // this task; nothing else owns it until the task runs.
    unsafe {
        frame.write(ExtendedExceptionFrame::default());
        (*frame).base.r0 = task.par;
        (*frame).base.pc = (entry as usize as u32) | 1; // for thumb
        (*frame).base.lr = auto_stop;
        (*frame).base.xpsr = INITIAL_PSR;
        (*frame).fpscr = INITIAL_FPSCR;
    }

    task.save = SavedState::new();
    task.save.psp = frame as u32;
    task.save.exc_return = EXC_RETURN_CONST;
    #[cfg(feature = "mpu")]
    {
        task.save.control = task.flags.contains(abi::TaskFlags::UMODE) as u32;
    }
    #[cfg(armv8m)]
    {
        task.save.psplim = task.spp;
    }
}

// ---------------------------------------------------------------------------
// Safe-LSR trampoline (mpu feature)

/// Stack for safe LSRs. One is enough: safe LSRs run to completion and
/// never nest.
#[cfg(feature = "mpu")]
#[repr(align(8))]
struct LsrStack([u32; 256]);

#[cfg(feature = "mpu")]
static mut LSR_STACK: LsrStack = LsrStack([0; 256]);

/// A minimal context the exception tail can restore from, shaped like the
/// front of a TCB.
#[cfg(feature = "mpu")]
#[repr(C)]
struct LsrContext {
    save: SavedState,
}

#[cfg(feature = "mpu")]
static mut LSR_CONTEXT: LsrContext = LsrContext {
    save: SavedState::new(),
};

/// Stages a safe LSR: builds its frame on the LSR stack, points the
/// current-context pointer at the trampoline context, and leaves the
/// exception tail to launch it. The LSR's return lands in a thunk that
/// issues the completion supervisor call.
#[cfg(feature = "mpu")]
pub(crate) fn stage_safe_lsr(entry: abi::EntryFn, par: u32, umode: bool) {
    extern "C" {
        fn moxie_safe_lsr_return() -> !;
    }
    let frame_size = core::mem::size_of::<ExtendedExceptionFrame>();

    // Safety: the LSR stack and context are only touched here and by the
    // exception tail, both under the scheduler's nesting barrier.
    unsafe {
        let stack = core::ptr::addr_of_mut!(LSR_STACK.0);
        let top = (stack as usize) + core::mem::size_of::<LsrStack>();
        let frame = (top - frame_size) as *mut ExtendedExceptionFrame;
        frame.write(ExtendedExceptionFrame::default());
        (*frame).base.r0 = par;
        (*frame).base.pc = (entry as usize as u32) | 1;
        (*frame).base.lr = moxie_safe_lsr_return as usize as u32;
        (*frame).base.xpsr = INITIAL_PSR;
        (*frame).fpscr = INITIAL_FPSCR;

        let ctx = core::ptr::addr_of_mut!(LSR_CONTEXT);
        (*ctx).save = SavedState::new();
        (*ctx).save.psp = frame as u32;
        (*ctx).save.exc_return = EXC_RETURN_CONST;
        (*ctx).save.control = umode as u32;
        #[cfg(armv8m)]
        {
            (*ctx).save.psplim = stack as u32;
        }

        CURRENT_TASK_PTR.store(ctx as *mut Tcb, Ordering::Relaxed);
    }
}

// Thunks that run in the sandboxed domain; all they may do is trap back in.
#[cfg(feature = "mpu")]
global_asm! {"
    .section .text.moxie_thunks
    .globl moxie_user_auto_stop
    .type moxie_user_auto_stop,function
    .thumb_func
    moxie_user_auto_stop:
        svc #1
        b .

    .globl moxie_safe_lsr_return
    .type moxie_safe_lsr_return,function
    .thumb_func
    moxie_safe_lsr_return:
        svc #2
        b .
    ",
}

// ---------------------------------------------------------------------------
// Main-stack bookkeeping

extern "C" {
    // Exposed by the linker script: bottom and initial top of the main
    // (handler) stack.
    static _stack_base: u32;
    static _stack_start: u32;
}

/// Sentinel-fills the unused portion of the main stack so its high-water
/// mark can be measured later. Leaves a margin below the live stack
/// pointer untouched.
pub(crate) fn prefill_main_stack(fill: u32) {
    const MARGIN_WORDS: usize = 16;
    // Safety: everything below MSP-minus-margin is dead memory by
    // definition of a descending stack; we run on MSP here, pre-tasks.
    unsafe {
        let base = core::ptr::addr_of!(_stack_base) as usize;
        let sp = cortex_m::register::msp::read() as usize;
        let words = (sp.saturating_sub(base) / 4).saturating_sub(MARGIN_WORDS);
        let mut p = base as *mut u32;
        for _ in 0..words {
            p.write_volatile(fill);
            p = p.add(1);
        }
    }
}

/// Measures the main stack: returns `(used bytes, total bytes)`.
pub(crate) fn main_stack_used(fill: u32) -> (u32, u32) {
    // Safety: reading the main stack region; exceptions may be using its
    // top, which only raises the measurement.
    unsafe {
        let base = core::ptr::addr_of!(_stack_base) as usize;
        let top = core::ptr::addr_of!(_stack_start) as usize;
        let len = (top - base) / 4;
        let words = core::slice::from_raw_parts(base as *const u32, len);
        let used = kerncore::stackpool::used_high_water(words, fill) as u32;
        (used, (len * 4) as u32)
    }
}

// ---------------------------------------------------------------------------
// Exception handlers

/// Handler for the System Tick Timer. An ordinary ISR: it brackets itself
/// like any application interrupt, advances the tick, and lets the bracket
/// pend the context switch if the tick queued work.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::profile::isr_start();
    with_ints_masked(|| crate::startup::with_kernel(|k| k.tick()));
    crate::profile::isr_end();
}

/// The Rust side of the PendSV handler, after all volatile registers have
/// been saved into the outgoing context.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    let current = CURRENT_TASK_PTR.load(Ordering::Relaxed);
    uassert!(!current.is_null()); // switch before kernel started?

    int_disable();
    crate::startup::with_kernel(|k| {
        k.profile_task_end();
        k.srnest = 1;
    });
    match crate::sched::schedule(false) {
        crate::sched::ScheduleOutcome::Task => {
            crate::startup::with_kernel(|k| k.srnest = 0);
        }
        // A safe LSR is staged; the nesting barrier stays up until its
        // completion call re-enters scheduling.
        crate::sched::ScheduleOutcome::SafeLsr => {}
    }
}

/// The Rust side of the SVC handler for non-boot calls.
#[no_mangle]
unsafe extern "C" fn svc_entry(nr: u32) {
    match nr {
        SVC_AUTO_STOP => {
            int_disable();
            crate::startup::with_kernel(|k| k.auto_stop_inner());
            finish_exception_dispatch(false);
        }
        #[cfg(feature = "mpu")]
        SVC_LSR_DONE => {
            int_disable();
            crate::startup::with_kernel(|k| k.safe_lsr_done());
            crate::startup::with_kernel(|k| k.srnest = 1);
            finish_exception_dispatch(true);
        }
        _ => panic!("unexpected syscall {nr}"),
    }
}

/// Runs the schedulers from an exception that must come out the exception
/// tail with a context staged.
unsafe fn finish_exception_dispatch(reload: bool) {
    match crate::sched::schedule(reload) {
        crate::sched::ScheduleOutcome::Task => {
            crate::startup::with_kernel(|k| k.srnest = 0);
        }
        crate::sched::ScheduleOutcome::SafeLsr => {}
    }
}

/// Configurable-fault handling: a stack-limit violation surfaces as the
/// stack-overflow error and stops the offending task; anything else is a
/// kernel-fatal stop.
#[no_mangle]
unsafe extern "C" fn handle_fault(fault_num: u32) {
    const MEM_MANAGE: u32 = 4;

    // A fault taken from handler mode is the kernel's own; there is no task
    // to retire and no scheduler state worth trusting.
    let current = CURRENT_TASK_PTR.load(Ordering::Relaxed);
    uassert!(!current.is_null());
    if (*current).save.exc_return & (1 << 3) == 0 {
        crate::fail::die("fault in kernel");
    }
    let stack_limit_fault = {
        #[cfg(armv8m)]
        {
            // UsageFault STKOF, or an MPU hit (a task walking off its stack
            // region).
            let scb = &*cortex_m::peripheral::SCB::PTR;
            scb.cfsr.read() & (1 << 20) != 0 || fault_num == MEM_MANAGE
        }
        #[cfg(not(armv8m))]
        {
            // v7-M has no stack-limit hardware; a task blowing past its
            // stack region shows up as MemManage.
            fault_num == MEM_MANAGE
        }
    };

    int_disable();
    let idle_fault = crate::startup::with_kernel(|k| {
        if k.ct == k.idle {
            return true;
        }
        if stack_limit_fault {
            let ct = k.ct;
            k.tasks.slots[ct].flags.insert(abi::TaskFlags::STK_OVFL);
            k.err.report(abi::ErrorCode::StkOvfl);
        } else {
            k.err.report(abi::ErrorCode::InvalidOp);
        }
        // Either way the task cannot continue from a fault; stop it.
        k.auto_stop_inner();
        false
    });
    if idle_fault {
        // Nothing left to fall back on.
        crate::fail::die("idle task fault");
    }
    finish_exception_dispatch(false);
}

#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn DefaultHandler() {
    // We can cheaply get the identity of the interrupt that called us from
    // the bottom 9 bits of IPSR.
    let exception_num = {
        let mut ipsr: u32;
        core::arch::asm!(
            "mrs {}, IPSR",
            out(reg) ipsr,
            options(pure, nomem, preserves_flags, nostack),
        );
        ipsr & 0x1FF
    };
    // Application interrupts get their own handlers (bracketed with
    // isr_start/isr_end and posting LSRs); anything landing here is
    // unclaimed.
    panic!("unhandled exception {exception_num}");
}

#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn HardFault() -> ! {
    crate::fail::die("hard fault")
}

// ---------------------------------------------------------------------------
// Boot

/// Programs exception priorities, the tick timer, and stack limits, then
/// traps into the kernel to enter the first task.
///
/// # Safety
///
/// Call once, at the end of `start_kernel`, with a task staged in the
/// current-task pointer.
pub unsafe fn start_first_task(tick_divisor: u32) -> ! {
    set_clock_freq(tick_divisor);

    // Keep the kernel non-preemptive: all kernel entry points (SVCall,
    // PendSV, SysTick, external interrupts) share one priority level;
    // faults sit above them so kernel bugs are detectable.
    {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        cfg_if::cfg_if! {
            if #[cfg(armv7m)] {
                // Enable MEMFAULT, BUSFAULT, USGFAULT.
                scb.shcsr.modify(|x| x | 0b111 << 16);
            } else if #[cfg(armv8m)] {
                // Also SECUREFAULT.
                scb.shcsr.modify(|x| x | 0b1111 << 16);
            } else {
                compile_error!("missing fault setup for ARM profile");
            }
        }

        // Fault priorities highest-configurable, kernel entries lowest.
        scb.shpr[0].write(0x00);
        scb.shpr[1].write(0x00);
        scb.shpr[2].write(0x00);
        scb.shpr[7].write(0xFF); // SVCall
        scb.shpr[10].write(0xFF); // SysTick
        scb.shpr[11].write(0xFF); // PendSV

        // ARM's default disposition is that division by zero returns zero
        // rather than faulting; we'd rather hear about it.
        const DIV_0_TRP: u32 = 1 << 4;
        scb.ccr.modify(|x| x | DIV_0_TRP);
    }

    // Configure the priority of all external interrupts so that they can't
    // preempt the kernel.
    {
        let nvic = &*cortex_m::peripheral::NVIC::PTR;
        let icb = &*cortex_m::peripheral::ICB::PTR;
        let ictr = icb.ictr.read();
        // Interrupt count in blocks of 32, minus one.
        let irq_block_count = (ictr as usize & 0xF) + 1;
        let irq_count = irq_block_count * 32;
        for i in 0..irq_count {
            nvic.ipr[i].write(0xFFu8);
        }
    }

    // Configure the tick timer.
    {
        let syst = &*cortex_m::peripheral::SYST::PTR;
        // Program reload value.
        syst.rvr.write(tick_divisor - 1);
        // Clear current value.
        syst.cvr.write(0);
        // Enable counter and interrupt.
        syst.csr.modify(|v| v | 0b111);
    }

    // Main-stack limit: overflow in the kernel itself is caught by
    // hardware on v8.
    #[cfg(armv8m)]
    cortex_m::register::msplim::write(core::ptr::addr_of!(_stack_base) as u32);

    let task = CURRENT_TASK_PTR.load(Ordering::Relaxed);
    uassert!(!task.is_null());

    // Set the process stack pointer for the first task; we are still on the
    // main stack, so this has no immediate effect.
    cortex_m::register::psp::write((*task).save.psp);
    #[cfg(armv8m)]
    cortex_m::register::psplim::write((*task).save.psplim);

    // Flip into handler mode via SVC so the exception-return machinery can
    // drop us into the first task with the right privilege and stack. The
    // SVC entry sequence detects the from-main-stack case and takes the
    // boot path instead of treating it as a request.
    core::arch::asm!("
        @ Restore the first task's callee-save registers.
        ldm {task}, {{r4-r11}}
        @ The boot dispatch ran masked; SVC must not be.
        cpsie i
        @ Trap into the kernel.
        svc #0xFF
        @ noreturn generates a UDF here in case that should return.
        ",
        task = in(reg) core::ptr::addr_of!((*task).save.r4),
        options(noreturn),
    )
}

// ---------------------------------------------------------------------------
// Exception entry/exit assembly
//
// Both handlers share a shape: deposit the volatile registers into the
// current context, call into Rust, then restore from whatever context is
// current on the way out (possibly a different one). Interrupts are left
// masked by the schedulers and re-enabled just before the restore; a late
// arrival simply tail-chains another PendSV.

cfg_if::cfg_if! {
    if #[cfg(armv7m)] {
        global_asm! {"
            .section .text.PendSV
            .globl PendSV
            .type PendSV,function
            PendSV:
                @ Fetch a pointer to the outgoing context.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                @ Fetching PSP into r12 makes the stm ordering work out.
                mrs r12, PSP
                stm r1!, {{r4-r12, lr}}
                mrs r2, CONTROL
                str r2, [r1], #4
                vstm r1, {{s16-s31}}

                bl pendsv_entry

                cpsie i
                @ We're returning into *some* context, maybe not the same.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldm r0!, {{r4-r12, lr}}
                ldr r2, [r0], #4
                msr CONTROL, r2
                isb
                vldm r0, {{s16-s31}}
                msr PSP, r12

                bx lr

            .section .text.SVCall
            .globl SVCall
            .type SVCall,function
            SVCall:
                @ Inspect LR to find the caller's mode.
                mov r0, lr
                mov r1, #0xFFFFFFF3
                bic r0, r1
                @ Thread mode on the main stack means this is the boot
                @ handoff from start_first_task.
                cmp r0, #0x8
                beq 1f

                @ Save the caller's context, as in PendSV.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                mrs r12, PSP
                stm r1!, {{r4-r12, lr}}
                mrs r2, CONTROL
                str r2, [r1], #4
                vstm r1, {{s16-s31}}

                @ Recover the SVC number from the stacked PC.
                mrs r0, PSP
                ldr r1, [r0, #24]
                ldrb r0, [r1, #-2]
                bl svc_entry

                cpsie i
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldm r0!, {{r4-r12, lr}}
                ldr r2, [r0], #4
                msr CONTROL, r2
                isb
                vldm r0, {{s16-s31}}
                msr PSP, r12

                bx lr

            1:  @ Boot: enter the first task staged by the scheduler.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                @ Thread-mode privilege per the task.
                ldr r1, [r0, #40]
                msr CONTROL, r1
                isb
                ldr lr, [r0, #36]
                bx lr

            .section .text.configurable_fault
            .globl configurable_fault
            .type configurable_fault,function
            configurable_fault:
                @ Save context so the fault handler may retire the task.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                mrs r12, PSP
                stm r1!, {{r4-r12, lr}}
                mrs r2, CONTROL
                str r2, [r1], #4
                vstm r1, {{s16-s31}}

                @ Fault number from IPSR (always < 16 here).
                mrs r0, IPSR
                and r0, r0, #0xf
                bl handle_fault

                cpsie i
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldm r0!, {{r4-r12, lr}}
                ldr r2, [r0], #4
                msr CONTROL, r2
                isb
                vldm r0, {{s16-s31}}
                msr PSP, r12

                bx lr

            .section .text.MemoryManagement
            .globl MemoryManagement
            .type MemoryManagement,function
            MemoryManagement:
                b configurable_fault

            .section .text.BusFault
            .globl BusFault
            .type BusFault,function
            BusFault:
                b configurable_fault

            .section .text.UsageFault
            .globl UsageFault
            .type UsageFault,function
            UsageFault:
                b configurable_fault
            ",
        }
    } else if #[cfg(armv8m)] {
        global_asm! {"
            .section .text.PendSV
            .globl PendSV
            .type PendSV,function
            PendSV:
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                mrs r12, PSP
                stm r1!, {{r4-r12, lr}}
                mrs r2, CONTROL
                mrs r3, PSPLIM
                stm r1!, {{r2-r3}}
                vstm r1, {{s16-s31}}

                bl pendsv_entry

                cpsie i
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldm r0!, {{r4-r12, lr}}
                ldm r0!, {{r2-r3}}
                msr CONTROL, r2
                msr PSPLIM, r3
                isb
                vldm r0, {{s16-s31}}
                msr PSP, r12

                bx lr

            .section .text.SVCall
            .globl SVCall
            .type SVCall,function
            SVCall:
                mov r0, lr
                mov r1, #0xFFFFFFF3
                bic r0, r1
                cmp r0, #0x8
                beq 1f

                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                mrs r12, PSP
                stm r1!, {{r4-r12, lr}}
                mrs r2, CONTROL
                mrs r3, PSPLIM
                stm r1!, {{r2-r3}}
                vstm r1, {{s16-s31}}

                mrs r0, PSP
                ldr r1, [r0, #24]
                ldrb r0, [r1, #-2]
                bl svc_entry

                cpsie i
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldm r0!, {{r4-r12, lr}}
                ldm r0!, {{r2-r3}}
                msr CONTROL, r2
                msr PSPLIM, r3
                isb
                vldm r0, {{s16-s31}}
                msr PSP, r12

                bx lr

            1:  @ Boot: enter the first task staged by the scheduler.
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldr r1, [r0, #40]
                msr CONTROL, r1
                ldr r1, [r0, #44]
                msr PSPLIM, r1
                isb
                ldr lr, [r0, #36]
                bx lr

            .section .text.configurable_fault
            .globl configurable_fault
            .type configurable_fault,function
            configurable_fault:
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r1, [r0]
                mrs r12, PSP
                stm r1!, {{r4-r12, lr}}
                mrs r2, CONTROL
                mrs r3, PSPLIM
                stm r1!, {{r2-r3}}
                vstm r1, {{s16-s31}}

                mrs r0, IPSR
                and r0, r0, #0xf
                bl handle_fault

                cpsie i
                movw r0, #:lower16:CURRENT_TASK_PTR
                movt r0, #:upper16:CURRENT_TASK_PTR
                ldr r0, [r0]
                ldm r0!, {{r4-r12, lr}}
                ldm r0!, {{r2-r3}}
                msr CONTROL, r2
                msr PSPLIM, r3
                isb
                vldm r0, {{s16-s31}}
                msr PSP, r12

                bx lr

            .section .text.MemoryManagement
            .globl MemoryManagement
            .type MemoryManagement,function
            MemoryManagement:
                b configurable_fault

            .section .text.BusFault
            .globl BusFault
            .type BusFault,function
            BusFault:
                b configurable_fault

            .section .text.UsageFault
            .globl UsageFault
            .type UsageFault,function
            UsageFault:
                b configurable_fault

            .section .text.SecureFault
            .globl SecureFault
            .type SecureFault,function
            SecureFault:
                b configurable_fault
            ",
        }
    } else {
        compile_error!("missing exception assembly for ARM profile");
    }
}
