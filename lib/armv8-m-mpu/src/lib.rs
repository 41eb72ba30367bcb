// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Safe sequencing for turning the ARMv8-M MPU off and on around region
//! updates.
//!
//! Region registers on this architecture come in pairs (RBAR/RLAR) that
//! cannot be written atomically, so reprogramming with the MPU enabled risks
//! a window where a region mixes the old RBAR with the new RLAR. The only
//! correct order is: disable, rewrite, re-enable. These helpers provide the
//! disable/enable halves with the barriers the architecture manual requires.

#![no_std]

use cortex_m::peripheral::mpu::RegisterBlock;

/// Disables the MPU, reverting to the default memory map for all privilege
/// levels, after forcing outstanding memory transactions to complete.
///
/// # Safety
///
/// Tasks lose their protection until the MPU is re-enabled; callers must not
/// return to unprivileged code in between.
pub unsafe fn disable_mpu(mpu: &RegisterBlock) {
    const DISABLE: u32 = 0b000;
    cortex_m::asm::dmb();
    mpu.ctrl.write(DISABLE);
}

/// Enables the MPU. When `privileged_default_memmap_access` is set,
/// privileged code falls back to the default memory map for addresses no
/// region covers; otherwise such accesses fault regardless of privilege.
///
/// # Safety
///
/// The caller must have programmed a coherent region set first; enabling an
/// MPU full of stale regions will fault the wrong code.
pub unsafe fn enable_mpu(mpu: &RegisterBlock, privileged_default_memmap_access: bool) {
    const ENABLE: u32 = 0b001;
    let privdefena: u32 = if privileged_default_memmap_access {
        0b100
    } else {
        0b000
    };
    mpu.ctrl.write(ENABLE | privdefena);
    // Barriers so the new configuration governs every subsequent access and
    // instruction fetch.
    cortex_m::asm::dmb();
    cortex_m::asm::isb();
}
