// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-task memory protection.
//!
//! Every sandboxed task carries a memory-protection array (MPA): an ordered
//! list of region descriptors loaded into the MPU's active slots whenever the
//! protection domain changes -- on each dispatch into a task, and around each
//! safe LSR. A prefix of the MPU's slots may be reserved for static system
//! regions programmed once at boot; those are below `MPU_STATIC_SLOTS` and
//! this module never touches them.
//!
//! The last MPA slot always describes the task's stack, and is rewritten by
//! the stack manager each time the task picks up a pool stack, so the region
//! follows the stack from start to start.
//!
//! Region words are precomputed at pack time; the dispatch-time load is a
//! register copy loop with the MPU disabled around it (the region registers
//! cannot be updated atomically while enabled).

use crate::config::MPU_ACTIVE_SLOTS;
#[cfg(any(armv7m, armv8m))]
use crate::config::MPU_STATIC_SLOTS;

// This is defined outside the bitflags! macro so that we can keep a const
// constructor for build-time region tables.
bitflags::bitflags! {
    /// What a region permits, independent of architecture.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    #[repr(transparent)]
    pub struct RegionAttributes: u32 {
        /// Region can be read.
        const READ = 1 << 0;
        /// Region can be written.
        const WRITE = 1 << 1;
        /// Region can contain executable code.
        const EXECUTE = 1 << 2;
        /// Region contains memory-mapped registers; never cached.
        const DEVICE = 1 << 3;
        /// Region is shared with DMA masters; cached conservatively.
        const DMA = 1 << 4;
    }
}

/// PMSAv7-style precomputed region words.
///
/// `repr(C)` to preserve field order, which matches the register order in
/// the MPU; this improves the load loop's code generation.
#[cfg(armv7m)]
#[derive(Copy, Clone, Debug, Default)]
#[repr(C)]
pub struct RegionData {
    rbar: u32,
    rasr: u32,
}

/// ARMv8-M precomputed region words: RBAR, RLAR, and this region's byte of
/// the MAIR attribute registers.
#[cfg(armv8m)]
#[derive(Copy, Clone, Debug, Default)]
#[repr(C)]
pub struct RegionData {
    rbar: u32,
    rlar: u32,
    mair: u8,
}

/// Stand-in for builds without a real MPU (host tooling, tests).
#[cfg(not(any(armv7m, armv8m)))]
#[derive(Copy, Clone, Debug, Default)]
pub struct RegionData;

/// One MPA slot: the packed register words plus the portable description
/// they were derived from.
#[derive(Copy, Clone, Debug, Default)]
pub struct Region {
    pub(crate) data: RegionData,
    pub base: u32,
    pub size: u32,
    pub attributes: RegionAttributes,
}

impl Region {
    /// An empty slot; loads as a disabled region.
    pub const EMPTY: Region = Region {
        data: RegionData::EMPTY,
        base: 0,
        size: 0,
        attributes: RegionAttributes::empty(),
    };

    /// Packs a region. `base` must be 32-byte aligned; on ARMv7-M, `size`
    /// must additionally be a power of two no smaller than 32 and `base`
    /// aligned to it. Violations panic, which at const-evaluation time is a
    /// build failure.
    pub const fn new(base: u32, size: u32, attributes: RegionAttributes) -> Self {
        Region {
            data: RegionData::pack(base, size, attributes),
            base,
            size,
            attributes,
        }
    }
}

#[cfg(armv7m)]
impl RegionData {
    const EMPTY: RegionData = RegionData { rbar: 0, rasr: 0 };

    pub const fn pack(base: u32, size: u32, attributes: RegionAttributes) -> Self {
        // This MPU requires 32-byte alignment of all regions, and
        // power-of-two sizes with natural alignment.
        if base & 0x1F != 0 || !size.is_power_of_two() || base & (size - 1) != 0 {
            panic!();
        }

        let ratts = attributes;
        let xn = !ratts.contains(RegionAttributes::EXECUTE);
        // These AP encodings never deny *privileged* code (i.e. the kernel)
        // access to the memory.
        let ap = if ratts.contains(RegionAttributes::WRITE) {
            0b011
        } else if ratts.contains(RegionAttributes::READ) {
            0b010
        } else {
            0b001
        };
        // TEX/SCB choose memory type, caching policy, and shareability. See
        // table B3-13 in the ARMv7-M ARM.
        let (tex, scb) = if ratts.contains(RegionAttributes::DEVICE) {
            (0b000, 0b001)
        } else if ratts.contains(RegionAttributes::DMA) {
            // Outer and inner non-cacheable, shared.
            (0b001, 0b100)
        } else {
            // Normal memory private to this core: outer and inner
            // write-back, read/write allocate, not shared.
            (0b001, 0b011)
        };
        // The MPU expresses region size in log2 form minus one: the minimum
        // 32 bytes is represented as 4 because 2**(4+1) == 32. Size is a
        // power of two (checked above), so log2 is 31 - clz.
        let l2size = 30 - size.leading_zeros();

        let rasr = (xn as u32) << 28 | ap << 24 | tex << 19 | scb << 16 | l2size << 1 | 1;
        RegionData { rbar: base, rasr }
    }
}

#[cfg(armv8m)]
impl RegionData {
    const EMPTY: RegionData = RegionData {
        rbar: 0,
        rlar: 0,
        mair: 0,
    };

    pub const fn pack(base: u32, size: u32, attributes: RegionAttributes) -> Self {
        // Regions are 32-byte granular; the bottom five bits of both limit
        // registers carry control fields.
        if base & 0x1F != 0 || size & 0x1F != 0 || size == 0 {
            panic!();
        }

        let ratts = attributes;
        let xn = !ratts.contains(RegionAttributes::EXECUTE);
        // This MPU cannot express privileged-RW/unprivileged-RO, so
        // permissions apply to both privilege levels.
        let ap = if ratts.contains(RegionAttributes::WRITE) {
            0b01 // RW any privilege
        } else if ratts.contains(RegionAttributes::READ) {
            0b11 // RO any privilege
        } else {
            0b00 // privileged only
        };

        let (mair, sh) = if ratts.contains(RegionAttributes::DEVICE) {
            // Device memory, outer shared.
            (0b0000_0000, 0b10)
        } else if ratts.contains(RegionAttributes::DMA) {
            // Outer/inner non-cacheable, outer shared.
            (0b0100_0100, 0b10)
        } else {
            let rw = (ratts.contains(RegionAttributes::READ) as u8) << 1
                | (ratts.contains(RegionAttributes::WRITE) as u8);
            // Write-back transient, not shared.
            (0b0100_0100 | rw | rw << 4, 0b00)
        };

        // Enable bit set here: the load sequence runs with the MPU disabled,
        // so there is no window where RBAR and RLAR disagree.
        let rlar = (base + size - 32) | 1;
        let rbar = (xn as u32) | ap << 1 | (sh as u32) << 3 | base;
        RegionData { rbar, rlar, mair }
    }
}

#[cfg(not(any(armv7m, armv8m)))]
impl RegionData {
    const EMPTY: RegionData = RegionData;

    pub const fn pack(_base: u32, _size: u32, _attributes: RegionAttributes) -> Self {
        RegionData
    }
}

/// A task's memory-protection array. Slot order is load order; the final
/// slot belongs to the stack manager.
#[derive(Copy, Clone, Debug)]
pub struct Mpa {
    pub(crate) regions: [Region; MPU_ACTIVE_SLOTS],
}

impl Mpa {
    pub const fn empty() -> Self {
        Self {
            regions: [Region::EMPTY; MPU_ACTIVE_SLOTS],
        }
    }

    /// Builds an MPA from up to `MPU_ACTIVE_SLOTS - 1` regions; the last
    /// slot stays reserved for the stack.
    pub fn from_regions(regions: &[Region]) -> Self {
        let mut mpa = Self::empty();
        let n = regions.len().min(MPU_ACTIVE_SLOTS - 1);
        mpa.regions[..n].copy_from_slice(&regions[..n]);
        mpa
    }

    /// Rewrites the stack slot. Called by the stack manager each time the
    /// owning task binds a pool stack.
    pub(crate) fn set_stack_region(&mut self, base: u32, size: u32) {
        self.regions[MPU_ACTIVE_SLOTS - 1] = Region::new(
            base,
            size,
            RegionAttributes::READ.union(RegionAttributes::WRITE),
        );
    }
}

/// Writes the MPU's active slots from `mpa`.
///
/// Interrupts are expected to be masked, or the protection domain otherwise
/// prevented from being observed mid-update; the MPU is disabled for the
/// duration because its region registers cannot be rewritten coherently
/// while it runs.
#[cfg(armv7m)]
pub(crate) fn load(mpa: &Mpa) {
    // Manufacturing authority to the MPU block: there is no way to thread a
    // cortex-specific peripheral through the scheduler's call graph, and by
    // taking a shared reference we at least avoid aliasing trouble.
    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };

    // Off. No memory-safety implications beyond briefly exposing the kernel
    // to a successful NULL dereference.
    unsafe {
        mpu.ctrl.write(0);
    }

    for (i, region) in mpa.regions.iter().enumerate() {
        // With the MPU off there are no ordering constraints among these
        // writes. The values were packed by trusted code at region-table
        // build time.
        unsafe {
            mpu.rnr.write((MPU_STATIC_SLOTS + i) as u32);
            mpu.rbar.write(region.data.rbar);
            mpu.rasr.write(region.data.rasr);
        }
    }

    const ENABLE: u32 = 0b001;
    const PRIVDEFENA: u32 = 0b100;
    unsafe {
        mpu.ctrl.write(ENABLE | PRIVDEFENA);
    }
}

#[cfg(armv8m)]
pub(crate) fn load(mpa: &Mpa) {
    use armv8_m_mpu::{disable_mpu, enable_mpu};

    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };

    // Disabling and re-enabling costs single-digit cycles; loading region
    // halves with the MPU live has caused real crashes on this
    // architecture, so take the correct path.
    unsafe {
        disable_mpu(mpu);
    }

    // MAIR bytes collect here; indices 0-3 are MAIR0's bytes (LE order),
    // 4-7 MAIR1's.
    let mut mairs = [0u8; 8];

    for (i, region) in mpa.regions.iter().enumerate() {
        let slot = MPU_STATIC_SLOTS + i;
        mairs[slot] = region.data.mair;

        // AttrIdx selects the MAIR byte with the same index as the slot,
        // letting MAIR act as an array parallel to the regions.
        let rlar = region.data.rlar | (slot as u32) << 1;
        unsafe {
            mpu.rnr.write(slot as u32);
            mpu.rbar.write(region.data.rbar);
            mpu.rlar.write(rlar);
        }
    }

    unsafe {
        mpu.mair[0].write(u32::from_le_bytes(mairs[..4].try_into().unwrap()));
        mpu.mair[1].write(u32::from_le_bytes(mairs[4..].try_into().unwrap()));
        enable_mpu(mpu, true);
    }
}

#[cfg(not(any(armv7m, armv8m)))]
pub(crate) fn load(_mpa: &Mpa) {}
