// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Link service routines: deferred interrupt work.
//!
//! An ISR does the minimum the hardware demands and posts the rest as an
//! `(lsr, parameter)` pair through [`invoke`]. The pair waits in the LSR
//! queue until the pendable context-switch exception drains it -- after the
//! ISR (and anything it nested into) has unwound, but before any task
//! resumes. LSRs therefore run with interrupts enabled, cannot be preempted
//! by tasks or by each other, and see the kernel in a consistent state.
//!
//! A *trusted* LSR is called in place, with kernel privilege, on the kernel
//! stack. A *safe* LSR (requires the `mpu` feature) is launched into its
//! owning task's protection domain through the architecture trampoline, so a
//! bug in it faults against the owner's regions instead of the kernel.

use abi::{CbType, EntryFn, ErrorCode, Generation, LsrFlags, LsrId};

use crate::config::NUM_LSRS;

/// LSR control block.
pub struct Lcb {
    pub(crate) cbtype: CbType,
    pub(crate) gen: Generation,
    pub(crate) flags: LsrFlags,
    pub(crate) entry: Option<EntryFn>,
    /// Task whose protection domain a safe LSR runs in. Unused (and
    /// meaningless) for trusted LSRs.
    #[cfg(feature = "mpu")]
    pub(crate) owner: Option<u16>,
}

impl Lcb {
    pub(crate) const fn empty() -> Self {
        Self {
            cbtype: CbType::Free,
            gen: Generation::ZERO,
            flags: LsrFlags::empty(),
            entry: None,
            #[cfg(feature = "mpu")]
            owner: None,
        }
    }
}

/// The LSR control-block pool.
pub struct LcbPool {
    pub(crate) slots: [Lcb; NUM_LSRS],
}

impl LcbPool {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { Lcb::empty() }; NUM_LSRS],
        }
    }

    pub(crate) fn alloc(&mut self) -> Result<usize, ErrorCode> {
        for (ix, slot) in self.slots.iter_mut().enumerate() {
            if slot.cbtype == CbType::Free {
                let gen = slot.gen;
                *slot = Lcb::empty();
                slot.gen = gen;
                slot.cbtype = CbType::Lsr;
                return Ok(ix);
            }
        }
        Err(ErrorCode::OutOfLcbs)
    }

    pub(crate) fn free(&mut self, ix: usize) {
        let gen = self.slots[ix].gen.next();
        self.slots[ix] = Lcb::empty();
        self.slots[ix].gen = gen;
    }

    pub(crate) fn check(&self, id: LsrId) -> Result<usize, ErrorCode> {
        let ix = id.index();
        if ix >= NUM_LSRS {
            return Err(ErrorCode::InvalidParm);
        }
        let slot = &self.slots[ix];
        if slot.cbtype != CbType::Lsr || slot.gen != id.generation() {
            return Err(ErrorCode::StaleHandle);
        }
        Ok(ix)
    }

    pub(crate) fn id_for(&self, ix: usize) -> LsrId {
        LsrId::for_index_and_gen(ix, self.slots[ix].gen)
    }
}

/// Posts an LSR invocation from interrupt context.
///
/// Callable from any ISR, nested or not. The post itself runs with
/// interrupts masked for the few instructions that touch the queue; the
/// drain happens in the context-switch exception after the ISR stack
/// unwinds. A full queue drops the invocation and reports `LqOvfl`; the
/// queue's high-water mark records how close to the edge it runs.
pub fn invoke(id: LsrId, par: u32) {
    // Safety: exception entry; the masked section below keeps the queue
    // update whole against nested interrupts.
    unsafe {
        crate::arch::with_ints_masked(|| {
            crate::startup::with_kernel(|k| {
                let ix = match k.lsrs.check(id) {
                    Ok(ix) => ix,
                    Err(e) => {
                        k.err.report(e);
                        return;
                    }
                };
                if k.lq.post((ix as u16, par)).is_err() {
                    k.err.report(ErrorCode::LqOvfl);
                }
            });
        });
    }
}
