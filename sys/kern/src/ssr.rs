// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! System service requests: the kernel-call surface and the enter/exit
//! protocol that makes it safe against interrupts and preemption.
//!
//! Every service brackets its body with an enter/exit pair. Enter raises the
//! service-nesting counter, which bars the schedulers from re-entering
//! underneath the service; exit decides between three fates (see
//! `kerncore::ssr::exit_action`): unwind a nested frame, return directly, or
//! -- when the service readied someone more important or interrupt work is
//! queued -- save the return value in the caller's control block and pend
//! the context switch. A suspended caller gets its value back from its
//! control block when it next runs, which also lets the service that wakes
//! it replace the value (that is how a wait reports *why* it woke).

use abi::{
    EntryFn, ErrorCode, HookEvent, LsrFlags, LsrId, PeekKey, Priority, TaskFlags, TaskId,
    TaskState,
};
use kerncore::ssr::{exit_action, ExitAction};

use crate::arch;
use crate::config::PRI_NUM;
use crate::sched::{Kernel, SchedRequest};
use crate::startup::with_kernel;
use crate::task::{HookFn, QueueLoc};

/// Timeout value meaning "wait forever".
pub const TMO_INF: u32 = u32::MAX;

/// Hook through which an external timer module learns about finite
/// timeouts. The kernel core keeps no timer queue of its own; if no hook is
/// registered, finite timeouts degrade to infinite waits.
pub type TimeoutHook = fn(TaskId, u32);

/// Opens a service frame: raise nesting, clear the caller's error field.
fn ssr_enter() {
    // Safety: thread- or LSR-level kernel entry; masked for the two field
    // updates.
    unsafe {
        arch::with_ints_masked(|| {
            with_kernel(|k| {
                k.srnest += 1;
                let ct = k.ct;
                k.tasks.slots[ct].err = ErrorCode::Ok;
            })
        })
    }
}

enum ExitOutcome {
    Value(u32),
    Dispatch,
}

/// Closes a service frame, possibly not returning until the caller is
/// dispatched again.
fn ssr_exit(rv: u32) -> u32 {
    // Safety: the kernel borrow is confined to the masked decision; it is
    // dropped before the context switch can run.
    let outcome = unsafe {
        arch::int_disable();
        with_kernel(|k| {
            if k.srnest == 1 {
                k.profile_task_end();
            }
            let resched = !k.sched.is_empty() || !k.lq.is_empty();
            match exit_action(k.srnest, resched) {
                ExitAction::Nested => {
                    k.srnest = k.srnest.saturating_sub(1);
                    ExitOutcome::Value(rv)
                }
                ExitAction::Dispatch => {
                    let ct = k.ct;
                    k.tasks.slots[ct].rv = rv;
                    ExitOutcome::Dispatch
                }
                ExitAction::Direct => {
                    k.srnest = 0;
                    k.profile_task_start();
                    ExitOutcome::Value(rv)
                }
            }
        })
    };

    match outcome {
        ExitOutcome::Value(v) => {
            unsafe { arch::int_enable() };
            v
        }
        ExitOutcome::Dispatch => {
            unsafe {
                // Inside the context-switch exception the switch is already
                // in progress; pending it again would re-enter it.
                if !arch::in_pendsv() {
                    arch::pend_context_switch();
                }
                arch::int_enable();
                // The switch fires here. When this task runs again, its
                // control block holds the value to hand back -- possibly
                // rewritten by whoever woke it.
                with_kernel(|k| {
                    let ct = k.ct;
                    k.tasks.slots[ct].rv
                })
            }
        }
    }
}

/// Mid-service suspension, for services that must wait *inside* their own
/// frame (a blocking acquire that already did half its bookkeeping). The
/// caller's nesting depth is parked in its control block and restored when
/// it resumes, so the outer frame survives the suspension. No-op when
/// called from an LSR, which must never suspend.
pub(crate) fn ssr_exit_if(rv: u32) -> u32 {
    let mut rv = rv;
    // Safety: same discipline as `ssr_exit`.
    unsafe {
        let from_lsr = arch::with_ints_masked(|| with_kernel(|k| k.clsr.is_some()));
        if from_lsr {
            return rv;
        }

        arch::int_disable();
        let dispatch = with_kernel(|k| {
            let resched = !k.sched.is_empty() || (k.srnest == 1 && !k.lq.is_empty());
            if resched {
                k.profile_task_end();
                let ct = k.ct;
                k.tasks.slots[ct].rv = rv;
                k.tasks.slots[ct].srnest_save = k.srnest;
                k.srnest = 1;
            }
            resched
        });
        if dispatch {
            if !arch::in_pendsv() {
                arch::pend_context_switch();
            }
            arch::int_enable();
            // Suspended; resumes here with a possibly-rewritten value.
            rv = arch::with_ints_masked(|| {
                with_kernel(|k| {
                    let ct = k.ct;
                    let v = k.tasks.slots[ct].rv;
                    k.srnest = k.tasks.slots[ct].srnest_save;
                    k.profile_task_start();
                    v
                })
            });
        } else {
            arch::int_enable();
        }

        arch::with_ints_masked(|| {
            with_kernel(|k| {
                k.srnest = k.srnest.saturating_sub(1);
            })
        });
    }
    rv
}

/// Runs a service body with the standard frame around it.
fn ssr<R>(body: impl FnOnce(&mut Kernel) -> Result<R, ErrorCode>) -> Result<R, ErrorCode> {
    ssr_enter();
    // Safety: service bodies run masked; they are short and touch only
    // kernel state.
    let r = unsafe { arch::with_ints_masked(|| with_kernel(body)) };
    ssr_exit(r.is_ok() as u32);
    r
}

impl Kernel {
    /// Records a service error against the caller and reports it.
    fn svc_error<R>(&mut self, code: ErrorCode) -> Result<R, ErrorCode> {
        let ct = self.ct;
        self.tasks.slots[ct].err = code;
        self.err.report(code);
        Err(code)
    }
}

/// Creates a task in the stopped state.
///
/// `STK_PERM` in `flags` binds a pool stack to the task for its lifetime;
/// otherwise the task borrows a stack at each start and returns it at stop.
/// The new task does not run until [`task_start`].
pub fn task_create(
    entry: EntryFn,
    pri: Priority,
    flags: TaskFlags,
    hook: Option<HookFn>,
) -> Result<TaskId, ErrorCode> {
    ssr(|k| {
        if pri.level() >= PRI_NUM {
            return k.svc_error(ErrorCode::InvalidParm);
        }
        let persistent = flags.contains(TaskFlags::STK_PERM);
        if persistent && !k.stacks.pool.has_free() {
            return k.svc_error(ErrorCode::OutOfStks);
        }
        let ix = match k.tasks.alloc() {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        // A task created by another task is its child: runtime accounting
        // routes to the top of the parent chain. Tasks created during
        // bring-up (idle context) stand alone.
        let parent = if k.ct == k.idle {
            None
        } else {
            Some(k.ct as u16)
        };
        {
            let t = &mut k.tasks.slots[ix];
            t.entry = Some(entry);
            t.parent = parent;
            t.pri = pri;
            t.flags = (flags
                & (TaskFlags::STK_PERM
                    | TaskFlags::UMODE
                    | TaskFlags::TRUST
                    | TaskFlags::STRT_LOCKD))
                | TaskFlags::STK_CHK;
            if let Some(h) = hook {
                t.hook = Some(h);
                t.flags.insert(TaskFlags::HOOKD);
            }
        }
        if persistent {
            k.get_pool_stack(ix);
        }
        Ok(k.tasks.id_for(ix))
    })
}

/// Starts a stopped task with one word of parameter. The task enters the
/// run queue at its priority; if that outranks the caller, the switch
/// happens on service exit.
pub fn task_start(id: TaskId, par: u32) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        if !k.tasks.slots[ix].is_stopped() || k.tasks.slots[ix].loc != QueueLoc::None {
            return k.svc_error(ErrorCode::InvalidOp);
        }
        k.tasks.slots[ix].par = par;
        k.ready_task(ix);
        Ok(())
    })
}

/// Stops a task. Stopping the caller takes effect at service exit; stopping
/// another task takes effect immediately (it leaves its queue and its pooled
/// stack goes to the scan list).
pub fn task_stop(id: TaskId) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        if ix == k.idle {
            return k.svc_error(ErrorCode::InvalidOp);
        }
        if ix == k.ct && k.lockctr > 0 {
            // Stopping self while holding the task-switch lock would leave
            // the lock held forever.
            return k.svc_error(ErrorCode::Locked);
        }
        if ix == k.ct {
            k.unqueue_task(ix);
            k.sched = SchedRequest::STOP;
        } else {
            k.unqueue_task(ix);
            k.tasks.slots[ix].state = TaskState::Ready;
            if !k.tasks.slots[ix].is_stopped() {
                k.tasks.slots[ix].save.clear_stack_pointer();
                if !k.tasks.slots[ix].flags.contains(TaskFlags::STK_PERM) {
                    k.rel_pool_stack(ix);
                }
                k.tasks.slots[ix].call_hook(HookEvent::Stop);
            }
        }
        Ok(())
    })
}

/// Suspends a task. `TMO_INF` waits until [`task_resume`]; a finite timeout
/// is delegated to the external timer module through the registered timeout
/// hook (and degrades to an infinite wait if none is registered).
///
/// Suspending the caller returns, on resume, the wake value left in its
/// control block by whoever resumed it.
pub fn task_suspend(id: TaskId, tmo: u32) -> Result<u32, ErrorCode> {
    ssr_enter();
    // Safety: masked service body, as in `ssr`.
    let r = unsafe {
        arch::with_ints_masked(|| {
            with_kernel(|k| {
                let ix = match k.tasks.check(id) {
                    Ok(ix) => ix,
                    Err(e) => return k.svc_error(e),
                };
                if ix == k.idle || k.tasks.slots[ix].is_stopped() {
                    return k.svc_error(ErrorCode::InvalidOp);
                }
                if ix == k.ct && k.lockctr > 0 {
                    // A locked caller cannot surrender the processor; it
                    // must unlock first.
                    return k.svc_error(ErrorCode::Locked);
                }
                k.unqueue_task(ix);
                k.tasks.slots[ix].state = TaskState::Wait;
                if ix == k.ct {
                    k.sched = SchedRequest::SUSP;
                }
                if tmo != TMO_INF {
                    if let Some(hook) = k.timeout_hook {
                        hook(id, tmo);
                    }
                }
                Ok(())
            })
        })
    };
    let rv = ssr_exit(r.is_ok() as u32);
    r.map(|()| rv)
}

/// Resumes a waiting task.
pub fn task_resume(id: TaskId) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        if k.tasks.slots[ix].state != TaskState::Wait || k.tasks.slots[ix].loc != QueueLoc::None {
            return k.svc_error(ErrorCode::InvalidOp);
        }
        k.ready_task(ix);
        Ok(())
    })
}

/// Deletes a task and recycles its control block; outstanding handles go
/// stale. Deleting the caller takes effect at service exit.
pub fn task_delete(id: TaskId) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        if ix == k.idle {
            return k.svc_error(ErrorCode::InvalidOp);
        }
        if ix == k.ct && k.lockctr > 0 {
            // Deleting self while holding the task-switch lock would leave
            // the lock held forever.
            return k.svc_error(ErrorCode::Locked);
        }
        k.unqueue_task(ix);
        // Orphan any children; their runtime now charges themselves.
        for t in k.tasks.slots.iter_mut() {
            if t.parent == Some(ix as u16) {
                t.parent = None;
            }
        }
        // If the task's old stack is awaiting scan, its measurement no
        // longer has anywhere to go.
        k.stacks.pool.disown(ix as u32);

        if ix == k.ct {
            // The scheduler frees the control block after releasing the
            // stack.
            k.tasks.slots[ix].state = TaskState::Del;
            k.sched = SchedRequest::STOP;
        } else {
            if !k.tasks.slots[ix].is_stopped()
                && !k.tasks.slots[ix].flags.contains(TaskFlags::STK_PERM)
            {
                k.rel_pool_stack(ix);
            }
            k.tasks.free(ix);
        }
        Ok(())
    })
}

/// Sets a task's per-frame runtime limit, in fine-counter units; zero means
/// unlimited. Set limits before starting the task. A child task ignores its
/// own limit and charges its top ancestor's.
#[cfg(feature = "rtlim")]
pub fn task_set_rtlim(id: TaskId, limit: u32) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        k.tasks.slots[ix].rtlim = limit;
        Ok(())
    })
}

/// Changes a task's priority (the explicit promote/demote operation). The
/// task moves to the tail of its new level; a preemption test follows.
pub fn task_bump(id: TaskId, pri: Priority) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        if pri.level() >= PRI_NUM {
            return k.svc_error(ErrorCode::InvalidParm);
        }
        let queued = k.tasks.slots[ix].loc == QueueLoc::Rq;
        if queued {
            k.unqueue_task(ix);
        }
        k.tasks.slots[ix].pri = pri;
        if queued {
            let level = pri.level();
            k.tasks.slots[ix].loc = QueueLoc::Rq;
            k.rq.enqueue(&mut k.tasks.slots, ix, level);
        }
        // The move may have changed who should be running.
        let top =
            kerncore::RunQueue::<PRI_NUM>::resolve(&k.tasks.slots, k.rq.top_link());
        if top != Some(k.ct) && k.lockctr == 0 {
            if k.sched.is_empty() {
                k.sched = SchedRequest::TEST;
            }
        }
        Ok(())
    })
}

/// Prevents task switches until the matching [`task_unlock`]. LSRs still
/// run. Nests.
pub fn task_lock() {
    // Safety: a counter bump under mask; no frame needed since no dispatch
    // can result.
    unsafe {
        arch::with_ints_masked(|| with_kernel(|k| k.lockctr += 1));
    }
}

/// Releases the task-switch lock; when the count reaches zero, any dispatch
/// that was held off happens before this returns.
pub fn task_unlock() {
    ssr_enter();
    // Safety: masked service body.
    unsafe {
        arch::with_ints_masked(|| {
            with_kernel(|k| {
                if k.lockctr > 0 {
                    k.lockctr -= 1;
                    if k.lockctr == 0 {
                        let top = kerncore::RunQueue::<PRI_NUM>::resolve(
                            &k.tasks.slots,
                            k.rq.top_link(),
                        );
                        if top != Some(k.ct) && k.sched.is_empty() {
                            k.sched = SchedRequest::TEST;
                        }
                    }
                }
            })
        });
    }
    ssr_exit(1);
}

/// Reads one field of a task.
pub fn task_peek(id: TaskId, key: PeekKey) -> Result<u32, ErrorCode> {
    ssr(|k| {
        let ix = match k.tasks.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        let t = &k.tasks.slots[ix];
        match key {
            PeekKey::Priority => Ok(u32::from(t.pri.0)),
            PeekKey::State => Ok(t.state as u32),
            PeekKey::Error => Ok(t.err as u32),
            PeekKey::Shwm => Ok(t.shwm),
            PeekKey::Rtc => Ok(t.rtc),
            _ => k.svc_error(ErrorCode::InvalidParm),
        }
    })
}

/// Reads one system-wide value.
pub fn sys_peek(key: PeekKey) -> Result<u32, ErrorCode> {
    ssr(|k| match key {
        PeekKey::Etime => Ok(crate::time::etime()),
        PeekKey::Lqhwm => Ok(k.lq.high_water_mark() as u32),
        _ => k.svc_error(ErrorCode::InvalidParm),
    })
}

/// Creates an LSR. Without the `mpu` feature every LSR is trusted; with it,
/// a non-trusted LSR must name an owner task whose protection domain it
/// runs in.
pub fn lsr_create(
    entry: EntryFn,
    flags: LsrFlags,
    owner: Option<TaskId>,
) -> Result<LsrId, ErrorCode> {
    ssr(|k| {
        #[cfg(not(feature = "mpu"))]
        {
            let _ = owner;
            if !flags.contains(LsrFlags::TRUST) {
                return k.svc_error(ErrorCode::InvalidParm);
            }
        }
        #[cfg(feature = "mpu")]
        let owner_ix = if flags.contains(LsrFlags::TRUST) {
            None
        } else {
            match owner {
                Some(o) => match k.tasks.check(o) {
                    Ok(ix) => Some(ix as u16),
                    Err(e) => return k.svc_error(e),
                },
                None => return k.svc_error(ErrorCode::InvalidParm),
            }
        };
        let ix = match k.lsrs.alloc() {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        let l = &mut k.lsrs.slots[ix];
        l.entry = Some(entry);
        l.flags = flags;
        #[cfg(feature = "mpu")]
        {
            l.owner = owner_ix;
        }
        Ok(k.lsrs.id_for(ix))
    })
}

/// Deletes an LSR. Entries already posted to the LSR queue are dropped at
/// drain time when their control block no longer checks out.
pub fn lsr_delete(id: LsrId) -> Result<(), ErrorCode> {
    ssr(|k| {
        let ix = match k.lsrs.check(id) {
            Ok(ix) => ix,
            Err(e) => return k.svc_error(e),
        };
        k.lsrs.free(ix);
        Ok(())
    })
}

/// Registers the external timer module's timeout hook.
pub fn set_timeout_hook(hook: TimeoutHook) {
    // Safety: single field store under mask.
    unsafe {
        arch::with_ints_masked(|| with_kernel(|k| k.timeout_hook = Some(hook)));
    }
}
