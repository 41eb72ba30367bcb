// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel's stack manager: binding pool stacks to tasks, releasing them
//! at stop, and the background scans that turn sentinel fills into high-water
//! marks.
//!
//! Scanning runs from the idle task, one step per idle pass, so it costs
//! nothing while real work exists. Released (unbound) stacks take precedence
//! over bound ones: a scanned stack goes back on the free list, which is what
//! one-shot task dispatch is waiting for.

#[cfg(feature = "stack-scan")]
use abi::{CbType, ErrorCode, TaskFlags};
use kerncore::stackpool::{StackPool, WORD_NONE};

#[cfg(feature = "stack-scan")]
use crate::config::STK_FILL_VAL;
use crate::config::{SIZE_STACK, SIZE_STACK_BLK, SIZE_STACK_PAD};
use crate::sched::Kernel;
#[cfg(feature = "stack-scan")]
use crate::startup::with_kernel;

pub(crate) struct StackMgr {
    pub(crate) pool: StackPool<'static>,
    /// Bound-scan cursor: next TCB slot to consider.
    tcbns: usize,
    /// Main stack scanned since the last profile frame.
    pub(crate) ms_scanned: bool,
}

impl StackMgr {
    pub(crate) fn new(pool: StackPool<'static>) -> Self {
        Self {
            pool,
            tcbns: 0,
            ms_scanned: false,
        }
    }
}

impl Kernel {
    /// Binds the free-list head to task `ix`: stack geometry into the TCB,
    /// sentinel verified across the block by the pool, and (under `mpu`) the
    /// task's stack region slot rewritten to follow the new stack.
    ///
    /// Callers check `has_free` first; an empty pool here is a logic error
    /// upstream in the out-of-stacks policy.
    pub(crate) fn get_pool_stack(&mut self, ix: usize) {
        let Some(block) = self.stacks.pool.alloc() else {
            return;
        };
        let base = self.stacks.pool.words(block).as_ptr() as u32;

        let t = &mut self.tasks.slots[ix];
        t.spp = base;
        t.stp = base + SIZE_STACK_PAD as u32;
        t.sbp = base + SIZE_STACK_BLK as u32;
        t.ssz = SIZE_STACK as u32;
        t.stack_block = block as u32;

        #[cfg(feature = "mpu")]
        t.mpa.set_stack_region(base, SIZE_STACK_BLK as u32);

        // A successful bind opens a new out-of-stacks episode.
        self.eoos_once = true;
    }

    /// Returns task `ix`'s pool stack to the scan list, tagged with the
    /// owner so the scanner can commit its high-water mark posthumously, and
    /// clears the TCB's stack geometry.
    pub(crate) fn rel_pool_stack(&mut self, ix: usize) {
        let t = &mut self.tasks.slots[ix];
        let block = t.stack_block;
        t.spp = 0;
        t.stp = 0;
        t.sbp = 0;
        t.ssz = 0;
        t.stack_block = WORD_NONE;
        if block != WORD_NONE {
            self.stacks.pool.release(block as usize, ix as u32);
        }
    }

    /// Scans one unbound (released) stack and recycles it to the free list.
    /// The previous owner's high-water mark is raised if the measurement
    /// beats it -- never lowered, since the task may already be running on a
    /// fresh stack -- and marked valid only if the owner is still stopped.
    #[cfg(feature = "stack-scan")]
    pub(crate) fn scan_unbound_step(&mut self) {
        // The measurement may be preempted; the `in_scan_unbound` latch (set
        // by the idle-side caller) keeps dispatch from re-entering the pool
        // meanwhile.
        let Some(m) = self.stacks.pool.scan_measure() else {
            return;
        };

        // Owner update and list commit must be atomic against stack
        // releases from the stop path.
        //
        // Safety: masking interrupts briefly at thread or handler level is
        // always sound; the closure does bounded work.
        unsafe {
            crate::arch::with_ints_masked(|| {
                let owner = m.owner as usize;
                if m.owner != WORD_NONE && owner < self.tasks.slots.len() {
                    let t = &mut self.tasks.slots[owner];
                    if t.cbtype == CbType::Task {
                        if m.used_bytes as u32 > t.shwm {
                            t.shwm = m.used_bytes as u32;
                        }
                        if t.stp == 0 {
                            t.flags.insert(TaskFlags::STK_HWMV);
                        }
                    }
                }
                self.stacks.pool.scan_commit(m.block);
            });
        }
    }

    /// Considers one TCB slot for a bound-stack scan and advances the
    /// cursor. Scans only stacks whose mark is stale; the walk reads live
    /// task memory, which is safe but racy, so the result commits only if
    /// the stack is still the one that was measured.
    #[cfg(feature = "stack-scan")]
    pub(crate) fn scan_bound_step(&mut self) {
        let ix = self.stacks.tcbns;
        self.stacks.tcbns = (ix + 1) % self.tasks.slots.len();

        // Safety: brief masked snapshot of the candidate's stack range so it
        // can't be released out from under the reads.
        let snapshot = unsafe {
            crate::arch::with_ints_masked(|| {
                let t = &self.tasks.slots[ix];
                if t.cbtype != CbType::Task || t.stp == 0 || t.flags.contains(TaskFlags::STK_HWMV)
                {
                    None
                } else {
                    Some((t.spp, t.sbp, t.stp))
                }
            })
        };
        let Some((spp, sbp, stp)) = snapshot else {
            return;
        };

        // Safety: spp..sbp is a stack block the kernel carved itself; the
        // owning task may push frames while we read, which only makes the
        // measurement conservative for this pass.
        let words = unsafe {
            core::slice::from_raw_parts(spp as *const u32, ((sbp - spp) / 4) as usize)
        };
        let used = kerncore::stackpool::used_high_water(words, STK_FILL_VAL) as u32;

        // Safety: brief masked commit, re-checking that the same stack is
        // still attached; the task may have stopped (and released the block)
        // during the walk.
        unsafe {
            crate::arch::with_ints_masked(|| {
                let t = &mut self.tasks.slots[ix];
                if t.stp != 0 && t.stp == stp {
                    if used > t.shwm {
                        t.shwm = used;
                    }
                    t.flags.insert(TaskFlags::STK_HWMV);
                }
            });
        }
    }
}

/// One pass of background stack upkeep, called from the idle task.
///
/// Order of business: the main (handler) stack once per profile frame, then
/// released stacks, then bound stacks. The unbound scan runs with interrupts
/// enabled under the `in_scan_unbound` latch -- if dispatch catches it
/// midway and needs the free list, the scheduler keeps idle running so the
/// scan finishes on the next pass.
#[cfg(feature = "stack-scan")]
pub fn stack_scan() {
    // Main-stack check, once per frame.
    //
    // Safety: with_kernel at thread level; the masked sections keep each
    // kernel access whole against exceptions.
    let do_main = unsafe {
        crate::arch::with_ints_masked(|| {
            with_kernel(|k| {
                if k.idleup {
                    // Dispatch is waiting on the in-flight unbound scan;
                    // finish that before anything else.
                    false
                } else if !k.stacks.ms_scanned {
                    k.stacks.ms_scanned = true;
                    true
                } else {
                    false
                }
            })
        })
    };
    if do_main {
        let (used, size) = crate::arch::main_stack_used(STK_FILL_VAL);
        if used >= size {
            unsafe {
                crate::arch::with_ints_masked(|| {
                    with_kernel(|k| k.err.report(ErrorCode::MstkOvfl))
                });
            }
        }
        return;
    }

    // Safety: as above. The measurement phase deliberately runs with
    // interrupts enabled; `in_scan_unbound` tells the scheduler not to
    // race it.
    unsafe {
        with_kernel(|k| {
            if k.stacks.pool.has_scan() {
                k.in_scan_unbound = true;
                k.scan_unbound_step();
                k.in_scan_unbound = false;
                k.idleup = false;
            } else {
                k.scan_bound_step();
            }
        });
    }
}
