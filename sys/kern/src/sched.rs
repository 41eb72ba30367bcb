// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two schedulers.
//!
//! [`drain_lsrs`] empties the LSR queue: work posted by interrupt handlers
//! runs here, strictly FIFO, before any task gets the processor back.
//! [`schedule`] alternates draining with task selection: the head of the
//! highest occupied run-queue level, validated against the control-block
//! pool, checked against its runtime limit, given a stack if it needs one
//! and the pool can provide, and finally handed the processor with its
//! protection domain loaded.
//!
//! Everything here runs in the context-switch exception with the
//! service-nesting counter held above zero, so an interrupt arriving
//! mid-schedule returns to the point of interrupt instead of re-entering the
//! scheduler; interrupts are therefore enabled through most of the process.
//! The price is the *flyback*: after selecting a task -- with its enter or
//! start hook already called -- the LSR queue is checked once more with
//! interrupts masked. If an interrupt snuck work in, that work runs first,
//! and only if the selected task still heads the run queue does the switch
//! commit; a task mid-*start* that loses its flyback is torn down entirely
//! (starts are not resumable) and begins again from scratch later.
//!
//! Kernel state is borrowed in bounded sections and never across an LSR
//! callback or hook, so LSRs are free to call kernel services. Task
//! lifecycle hooks run inside scheduler sections and must not (see
//! `task::HookFn`).

use abi::{CbType, EntryFn, ErrorCode, HookEvent, TaskFlags, TaskState};
use kerncore::runq::{Link, Repair, RunQueue};
use kerncore::PostRing;

#[cfg(feature = "mpu")]
use abi::LsrFlags;

use crate::arch;
use crate::config::{LQ_SIZE, PRI_NUM};
use crate::err::ErrorManager;
use crate::lsr::LcbPool;
use crate::stack::StackMgr;
use crate::startup::with_kernel;
use crate::task::{QueueLoc, TcbPool};

#[cfg(feature = "rtlim")]
use crate::task::WaitQueue;

bitflags::bitflags! {
    /// What the current task should become when the scheduler next runs.
    /// Empty means "nothing requested" -- the current task stays eligible.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub(crate) struct SchedRequest: u8 {
        /// Preempted but still in the run queue; becomes READY.
        const TEST = 1 << 0;
        /// Suspended; the service already dequeued it.
        const SUSP = 1 << 1;
        /// Stopped; stack pointer cleared and a pooled stack released.
        const STOP = 1 << 2;
    }
}

/// One step of the LSR drain, as seen by the borrow-free outer loop.
pub(crate) enum LsrStep {
    /// Queue empty; drain complete.
    Empty,
    /// A trusted LSR, ready to call with interrupts enabled.
    Trusted(EntryFn, u32),
    /// A safe LSR has been staged into the architecture trampoline; the
    /// exception handler must yield to it.
    Staged,
}

pub(crate) enum DrainOutcome {
    Drained,
    YieldToSafe,
}

/// Result of one task-selection pass.
enum SelectOutcome {
    /// A task is staged; return to hardware.
    Committed,
    /// Selection must start over (queue repair, no runnable task yet, or
    /// out-of-stacks with nothing dispatchable).
    Restart,
    /// A resume reached its flyback check with LSR work pending.
    FlybackResume,
    /// A start reached its flyback check with LSR work pending.
    FlybackStart,
}

pub(crate) enum ScheduleOutcome {
    /// The current-task pointer names the task to run.
    Task,
    /// A safe LSR owns the processor next; scheduling resumes at its
    /// completion call.
    SafeLsr,
}

/// The kernel's entire mutable state, in one place.
///
/// Interrupt handlers, services, and the schedulers all reach this through
/// [`crate::startup::with_kernel`]; the fields are plain data and every
/// cross-context access runs either with interrupts masked or under the
/// service-nesting barrier.
pub struct Kernel {
    pub(crate) tasks: TcbPool,
    pub(crate) lsrs: LcbPool,
    pub(crate) rq: RunQueue<PRI_NUM>,
    /// The LSR queue: `(lcb index, parameter)` pairs.
    pub(crate) lq: PostRing<(u16, u32), LQ_SIZE>,
    pub(crate) stacks: StackMgr,
    pub(crate) err: ErrorManager,

    /// Current task, as a TCB pool index.
    pub(crate) ct: usize,
    /// Currently executing LSR, if any.
    pub(crate) clsr: Option<usize>,
    /// Idle task index, fixed at startup.
    pub(crate) idle: usize,

    pub(crate) sched: SchedRequest,
    /// Service nesting depth. Nonzero bars scheduler re-entry; exceptions
    /// that find it nonzero return to the point of interrupt.
    pub(crate) srnest: u32,
    /// Task-switch lock depth. LSRs still run while this is held.
    pub(crate) lockctr: u32,
    /// A task start completed since this was last cleared.
    pub(crate) ctstart: bool,

    /// One report per out-of-stacks episode.
    pub(crate) eoos_once: bool,
    /// An unbound-stack scan is in flight in idle context; dispatch must
    /// let idle finish it instead of touching the pool.
    pub(crate) in_scan_unbound: bool,
    /// Dispatch wants idle to run so the in-flight scan completes.
    pub(crate) idleup: bool,

    #[cfg(feature = "profile")]
    pub(crate) clock: kerncore::RtClock,
    #[cfg(feature = "profile")]
    pub(crate) frames: Option<kerncore::FrameRecorder<'static>>,
    /// The kernel's frame LSR, posted by the tick at frame boundaries.
    #[cfg(feature = "profile")]
    pub(crate) profile_lsr: Option<u16>,
    #[cfg(feature = "profile")]
    pub(crate) frame_countdown: u32,

    #[cfg(feature = "rtlim")]
    pub(crate) rtlim_wait: WaitQueue,

    /// External timer module's timeout hook, if registered.
    pub(crate) timeout_hook: Option<crate::ssr::TimeoutHook>,
}

impl Kernel {
    pub(crate) fn new(stacks: StackMgr) -> Self {
        Self {
            tasks: TcbPool::new(),
            lsrs: LcbPool::new(),
            rq: RunQueue::new(),
            lq: PostRing::new(),
            stacks,
            err: ErrorManager::new(),
            ct: 0,
            clsr: None,
            idle: 0,
            sched: SchedRequest::empty(),
            // Held above zero until the boot dispatch so that services
            // called during system bring-up never try to context-switch.
            srnest: 1,
            lockctr: 0,
            ctstart: false,
            eoos_once: true,
            in_scan_unbound: false,
            idleup: false,
            #[cfg(feature = "profile")]
            clock: kerncore::RtClock::new(crate::config::TICK_COUNTS_PER_TICK),
            #[cfg(feature = "profile")]
            frames: None,
            #[cfg(feature = "profile")]
            profile_lsr: None,
            #[cfg(feature = "profile")]
            frame_countdown: crate::config::RTC_FRAME,
            #[cfg(feature = "rtlim")]
            rtlim_wait: WaitQueue::new(),
            timeout_hook: None,
        }
    }

    /// Records a scheduler-context error: hook only, since there is no
    /// service frame to return it through.
    fn sched_error(&mut self, code: ErrorCode) {
        self.err.report(code);
    }

    /// Makes task `ix` ready: tail of its priority's FIFO, preemption test
    /// against the current task. The switch itself happens at the next
    /// scheduler pass.
    pub(crate) fn ready_task(&mut self, ix: usize) {
        let pri = self.tasks.slots[ix].pri;
        self.tasks.slots[ix].state = TaskState::Ready;
        self.tasks.slots[ix].loc = QueueLoc::Rq;
        self.rq.enqueue(&mut self.tasks.slots, ix, pri.level());
        // A stop or suspension already decided the current task's fate;
        // only an undecided task gets the preemption request.
        if pri.is_higher_than(self.tasks.slots[self.ct].pri)
            && self.lockctr == 0
            && self.sched.is_empty()
        {
            self.sched = SchedRequest::TEST;
        }
    }

    /// Unlinks task `ix` from whichever queue holds it.
    pub(crate) fn unqueue_task(&mut self, ix: usize) {
        match self.tasks.slots[ix].loc {
            QueueLoc::Rq => {
                let pri = self.tasks.slots[ix].pri;
                self.rq.dequeue(&mut self.tasks.slots, ix, pri.level());
            }
            #[cfg(feature = "rtlim")]
            QueueLoc::RtLim => {
                self.rtlim_wait.remove(&mut self.tasks.slots, ix);
            }
            #[cfg(not(feature = "rtlim"))]
            QueueLoc::RtLim => {}
            QueueLoc::None => {}
        }
        self.tasks.slots[ix].loc = QueueLoc::None;
    }

    /// Credits `delta` fine-counter units of runtime to the current task,
    /// and to the runtime-limit counter of its top ancestor.
    #[cfg(feature = "profile")]
    pub(crate) fn credit_task(&mut self, delta: u32) {
        if delta == 0 {
            return;
        }
        let ct = self.ct;
        self.tasks.slots[ct].rtc = self.tasks.slots[ct].rtc.wrapping_add(delta);
        #[cfg(feature = "rtlim")]
        {
            let tgt = self.tasks.rtlim_target(ct);
            self.tasks.slots[tgt].rtlimctr = self.tasks.slots[tgt].rtlimctr.wrapping_add(delta);
        }
    }

    /// Closes the current task's runtime span.
    pub(crate) fn profile_task_end(&mut self) {
        #[cfg(feature = "profile")]
        {
            let now = crate::time::ptime_get();
            let credit = self.clock.task_end(now);
            self.credit_task(credit);
        }
    }

    /// Opens a runtime span for the task about to get the processor.
    pub(crate) fn profile_task_start(&mut self) {
        #[cfg(feature = "profile")]
        {
            let now = crate::time::ptime_get();
            self.clock.task_start(now);
        }
    }

    /// True when `ix` (or the ancestor it charges) has exhausted its frame
    /// runtime budget.
    #[cfg(feature = "rtlim")]
    fn rtlim_exceeded(&self, ix: usize) -> bool {
        let tgt = self.tasks.rtlim_target(ix);
        let lim = self.tasks.slots[tgt].rtlim;
        lim > 0 && self.tasks.slots[tgt].rtlimctr >= lim
    }

    fn report_repair(&mut self, outcome: Repair) {
        match outcome {
            // Cursor-only damage or an empty queue: nothing worth a report.
            Repair::Sound | Repair::Empty => {}
            Repair::Fixed => {
                self.sched_error(ErrorCode::RqError);
                self.sched_error(ErrorCode::QFixed);
            }
            Repair::Cleared => {
                self.sched_error(ErrorCode::RqError);
                self.sched_error(ErrorCode::BrokenQ);
            }
        }
    }

    #[cfg(feature = "mpu")]
    pub(crate) fn mpu_load_task(&self) {
        crate::mpu::load(&self.tasks.slots[self.ct].mpa);
    }

    /// Loads the protection domain a safe LSR runs in: its owner's MPA, or
    /// the current task's when no owner was named.
    #[cfg(feature = "mpu")]
    fn mpu_load_lsr(&self, lsr_ix: usize) {
        let owner = self.lsrs.slots[lsr_ix]
            .owner
            .map(usize::from)
            .filter(|&o| o < self.tasks.slots.len() && self.tasks.slots[o].cbtype == CbType::Task)
            .unwrap_or(self.ct);
        crate::mpu::load(&self.tasks.slots[owner].mpa);
    }

    /// Pops and prepares the next LSR. Called with interrupts masked;
    /// `reload`, carried across the whole drain, notes that a safe LSR ran
    /// earlier in the batch so the next trusted dispatch must first restore
    /// the current task's protection domain.
    pub(crate) fn take_next_lsr(&mut self, reload: &mut bool) -> LsrStep {
        loop {
            let Some((lsr_raw, par)) = self.lq.take() else {
                return LsrStep::Empty;
            };
            let ix = lsr_raw as usize;
            if ix >= self.lsrs.slots.len() || self.lsrs.slots[ix].cbtype != CbType::Lsr {
                // The LSR was deleted between post and drain; drop the
                // entry.
                continue;
            }
            let Some(entry) = self.lsrs.slots[ix].entry else {
                continue;
            };

            #[cfg(feature = "mpu")]
            let trusted = self.lsrs.slots[ix].flags.contains(LsrFlags::TRUST);
            #[cfg(not(feature = "mpu"))]
            let trusted = true;

            self.clsr = Some(ix);
            #[cfg(feature = "profile")]
            {
                let credit = self.clock.lsr_start(crate::time::ptime_get());
                self.credit_task(credit);
            }

            if trusted {
                #[cfg(feature = "mpu")]
                if *reload {
                    self.mpu_load_task();
                    *reload = false;
                }
                return LsrStep::Trusted(entry, par);
            }

            #[cfg(feature = "mpu")]
            {
                self.mpu_load_lsr(ix);
                let umode = self.lsrs.slots[ix].flags.contains(LsrFlags::UMODE);
                arch::stage_safe_lsr(entry, par, umode);
                return LsrStep::Staged;
            }
            #[cfg(not(feature = "mpu"))]
            unreachable!();
        }
    }

    /// Bookkeeping after a trusted LSR returns.
    pub(crate) fn finish_trusted_lsr(&mut self) {
        #[cfg(feature = "profile")]
        self.clock.lsr_end(crate::time::ptime_get());
        self.clsr = None;
    }

    /// Completion of a safe LSR, entered from the architecture layer when
    /// the trampoline's supervisor call lands.
    #[cfg(feature = "mpu")]
    pub(crate) fn safe_lsr_done(&mut self) {
        #[cfg(feature = "profile")]
        self.clock.lsr_end(crate::time::ptime_get());
        self.clsr = None;
    }

    /// One task-selection pass: exit processing for the outgoing task, then
    /// selection, stack binding, and -- if the flyback check comes up empty
    /// -- the commit. Entered and exited with interrupts masked (except for
    /// the windows it opens itself).
    fn select_pass(&mut self) -> SelectOutcome {
        let ct = self.ct;
        self.check_ct_stack();

        if self
            .sched
            .intersects(SchedRequest::TEST | SchedRequest::SUSP)
        {
            // Safety: the srnest barrier is up; see module docs.
            unsafe { arch::int_enable() };
            if self.sched == SchedRequest::TEST {
                // Preempted but staying queued.
                self.tasks.slots[ct].state = TaskState::Ready;
            }
            self.tasks.slots[ct].call_hook(HookEvent::Exit);
        } else if self.sched.intersects(SchedRequest::STOP) {
            unsafe { arch::int_enable() };
            self.tasks.slots[ct].save.clear_stack_pointer();
            if !self.tasks.slots[ct].flags.contains(TaskFlags::STK_PERM) {
                // Stack release and the task switch must look atomic to
                // interrupt-driven observers.
                unsafe { arch::int_disable() };
                self.rel_pool_stack(ct);
                unsafe { arch::int_enable() };
            }
            self.tasks.slots[ct].call_hook(HookEvent::Stop);
            if self.tasks.slots[ct].state == TaskState::Del {
                // Stop-then-delete: the control block is recycled only
                // after its stack is gone.
                self.tasks.free(ct);
            } else {
                self.tasks.slots[ct].state = TaskState::Ready;
            }
        }
        if !self.sched.is_empty() {
            self.lockctr = 0;
        }

        'get_top: loop {
            // Make sure ISRs can run if we loop here waiting for work.
            unsafe { arch::int_enable() };
            self.sched = SchedRequest::empty();
            let mut link = if self.lockctr > 0 {
                // Task switching is locked: the current task continues
                // regardless of what became ready.
                Link::task(self.ct)
            } else {
                self.rq.top_link()
            };

            'dispatch: loop {
                let Some(new) = RunQueue::<PRI_NUM>::resolve(&self.tasks.slots, link) else {
                    let outcome = self.rq.repair(&mut self.tasks.slots);
                    self.report_repair(outcome);
                    unsafe { arch::int_disable() };
                    // No task to run yet; the caller drains LSRs and
                    // retries until one readies something.
                    return SelectOutcome::Restart;
                };

                #[cfg(feature = "rtlim")]
                if self.rtlim_exceeded(new) {
                    // Budget exhausted: park on the limit semaphore until
                    // the frame LSR signals it. Not an error.
                    self.unqueue_task(new);
                    self.tasks.slots[new].state = TaskState::Wait;
                    self.tasks.slots[new].loc = QueueLoc::RtLim;
                    self.rtlim_wait.enqueue(&mut self.tasks.slots, new);
                    continue 'get_top;
                }

                if !self.tasks.slots[new].is_stopped() {
                    // Resume path.
                    unsafe { arch::int_disable() };
                    self.ct = new;
                    // Safety: `new` is in the task table and stays put
                    // until the next kernel entry.
                    unsafe { arch::set_current_task(&self.tasks.slots[new]) };
                    unsafe { arch::int_enable() };

                    self.tasks.slots[new].call_hook(HookEvent::Enter);

                    // Flyback check.
                    unsafe { arch::int_disable() };
                    if !self.lq.is_empty() {
                        return SelectOutcome::FlybackResume;
                    }
                    self.commit_resume();
                    return SelectOutcome::Committed;
                }

                // Start path: bind a stack if the task doesn't hold one.
                if !self.tasks.slots[new].flags.contains(TaskFlags::STK_PERM)
                    && self.tasks.slots[new].stp == 0
                {
                    if self.stacks.pool.has_free() {
                        self.get_pool_stack(new);
                    } else {
                        #[cfg(feature = "stack-scan")]
                        if self.stacks.pool.has_scan() {
                            if self.in_scan_unbound {
                                // Idle is midway through a scan; run it so
                                // the scan finishes.
                                self.idleup = true;
                                link = Link::task(self.idle);
                            } else {
                                self.scan_unbound_step();
                            }
                            continue 'dispatch;
                        }

                        if self.eoos_once {
                            self.sched_error(ErrorCode::OutOfStks);
                            self.eoos_once = false;
                        }
                        // Find a ready task that already owns a stack.
                        let found = self
                            .rq
                            .find_with(&self.tasks.slots, |ix| self.tasks.slots[ix].has_stack());
                        match found {
                            Some(f) => {
                                link = Link::task(f);
                                continue 'dispatch;
                            }
                            None => {
                                unsafe { arch::int_disable() };
                                return SelectOutcome::Restart;
                            }
                        }
                    }
                }

                // Have a stack; commit to the start.
                unsafe { arch::int_disable() };
                self.ct = new;
                // Safety: as in the resume path.
                unsafe { arch::set_current_task(&self.tasks.slots[new]) };
                unsafe { arch::int_enable() };

                self.tasks.slots[new].call_hook(HookEvent::Start);

                // Flyback check. A start is not resumable: if the drained
                // work makes someone else more important, this start is
                // torn down and begins again from scratch.
                unsafe { arch::int_disable() };
                if !self.lq.is_empty() {
                    return SelectOutcome::FlybackStart;
                }
                self.commit_start();
                return SelectOutcome::Committed;
            }
        }
    }

    /// Commits the resume of the already-selected current task. Interrupts
    /// masked.
    fn commit_resume(&mut self) {
        let ct = self.ct;
        let t = &mut self.tasks.slots[ct];
        // The stack is live again; the last scan no longer bounds it.
        t.flags.remove(TaskFlags::STK_HWMV);
        t.state = TaskState::Run;
        #[cfg(feature = "mpu")]
        self.mpu_load_task();
        self.profile_task_start();
    }

    /// Commits the start of the already-selected current task: flags,
    /// start-locked handling, protection domain, and the initial exception
    /// frame. Interrupts masked.
    fn commit_start(&mut self) {
        let ct = self.ct;
        let t = &mut self.tasks.slots[ct];
        t.flags.remove(TaskFlags::STK_HWMV);
        t.flags.remove(TaskFlags::STK_OVFL);
        t.state = TaskState::Run;
        self.ctstart = true;
        self.lockctr = if t.flags.contains(TaskFlags::STRT_LOCKD) {
            1
        } else {
            0
        };
        #[cfg(feature = "mpu")]
        self.mpu_load_task();
        // Build the initial exception frame; the exception return enters
        // the task's entry function.
        arch::make_frame(&mut self.tasks.slots[ct]);
        self.profile_task_start();
    }

    /// After the flyback drain: if the selected task still heads the run
    /// queue (or switching is locked), finish its commit and report true.
    /// Otherwise arrange the teardown the flyback demands -- a lost start
    /// releases its stack through the stop path -- and report false so
    /// selection restarts.
    fn finish_flyback(&mut self, was_start: bool) -> bool {
        let mine = Link::task(self.ct);
        if self.rq.top_link() == mine || self.lockctr > 0 {
            self.sched = SchedRequest::empty();
            if was_start {
                self.commit_start();
            } else {
                self.commit_resume();
            }
            true
        } else {
            if was_start {
                self.sched = SchedRequest::STOP;
                // Point the saved stack pointer at the stack base so the
                // exit check doesn't read the aborted start as an overflow.
                let ct = self.ct;
                let sbp = self.tasks.slots[ct].sbp;
                self.tasks.slots[ct].save.set_stack_pointer(sbp);
            }
            false
        }
    }

    /// Overflow check on the outgoing task's stack, run on every scheduler
    /// entry before the task's fate is decided.
    fn check_ct_stack(&mut self) {
        let ct = self.ct;
        let t = &self.tasks.slots[ct];
        if !t.flags.contains(TaskFlags::STK_CHK) || t.stp == 0 {
            return;
        }
        let sp = t.save.stack_pointer();

        // Pad overrun detection by software is only needed where there is
        // no hardware stack limit; ARMv8-M's PSPLIM faults before the pad
        // is reached and surfaces through the same error code.
        #[cfg(armv7m)]
        if sp <= t.spp || t.shwm >= t.sbp.wrapping_sub(t.spp) {
            self.sched_error(ErrorCode::StkOvfl);
            return;
        }

        if !t.flags.contains(TaskFlags::STK_OVFL) && (sp <= t.stp || t.shwm >= t.ssz) {
            self.tasks.slots[ct].flags.insert(TaskFlags::STK_OVFL);
            self.sched_error(ErrorCode::StkOvfl);
        }
    }

    /// Auto-stop bookkeeping, shared by the privileged thread-mode thunk
    /// and the supervisor-call path used by sandboxed tasks.
    pub(crate) fn auto_stop_inner(&mut self) {
        self.profile_task_end();
        self.srnest = 1;
        let ct = self.ct;
        self.unqueue_task(ct);
        self.sched = SchedRequest::STOP;
    }
}

/// Drains the LSR queue. Entered and exited with interrupts masked; each
/// trusted callback runs with interrupts enabled and *without* a live
/// kernel borrow, so LSRs can call kernel services.
pub(crate) fn drain_lsrs(mut reload: bool) -> DrainOutcome {
    loop {
        // Safety: exception-level (or boot) kernel access, interrupts
        // masked.
        let step = unsafe { with_kernel(|k| k.take_next_lsr(&mut reload)) };
        match step {
            LsrStep::Empty => return DrainOutcome::Drained,
            LsrStep::Trusted(entry, par) => {
                // Safety: srnest > 0 bars re-entry; only posting can race.
                unsafe { arch::int_enable() };
                entry(par);
                unsafe {
                    arch::int_disable();
                    with_kernel(|k| k.finish_trusted_lsr());
                }
            }
            LsrStep::Staged => return DrainOutcome::YieldToSafe,
        }
    }
}

/// The scheduler's outer loop: drain deferred work, select a task, honor
/// flybacks. Entered with interrupts masked and `srnest > 0`; returns with
/// interrupts masked and either a task or a safe LSR staged for the
/// exception-return path.
pub(crate) fn schedule(reload: bool) -> ScheduleOutcome {
    let mut reload = reload;
    loop {
        if let DrainOutcome::YieldToSafe = drain_lsrs(reload) {
            return ScheduleOutcome::SafeLsr;
        }
        reload = false;

        // Safety: as in drain_lsrs.
        let outcome = unsafe { with_kernel(|k| k.select_pass()) };
        match outcome {
            SelectOutcome::Committed => return ScheduleOutcome::Task,
            SelectOutcome::Restart => {}
            SelectOutcome::FlybackResume | SelectOutcome::FlybackStart => {
                if let DrainOutcome::YieldToSafe = drain_lsrs(false) {
                    return ScheduleOutcome::SafeLsr;
                }
                let was_start = matches!(outcome, SelectOutcome::FlybackStart);
                // Safety: as above; interrupts stayed masked since the
                // drain, so no new work can slip between it and the
                // commit decision.
                let committed = unsafe { with_kernel(|k| k.finish_flyback(was_start)) };
                if committed {
                    return ScheduleOutcome::Task;
                }
            }
        }
    }
}

/// Where a privileged task lands when its entry function returns: the
/// auto-stop thunk. Runs in thread mode on the dying task's stack; the
/// pended context switch takes the processor away for good.
///
/// Sandboxed tasks use the architecture's user-mode thunk instead, which
/// traps into the same bookkeeping via supervisor call.
pub extern "C" fn auto_stop() -> ! {
    // Safety: thread-level kernel entry; interrupts may be in any state on
    // arrival.
    unsafe {
        arch::int_enable();
        arch::with_ints_masked(|| with_kernel(|k| k.auto_stop_inner()));
        arch::pend_context_switch();
        arch::int_enable();
    }
    // The context switch fires as soon as it is pended; this task has no
    // queue presence left, so control never comes back.
    loop {
        arch::wait_for_interrupt();
    }
}
