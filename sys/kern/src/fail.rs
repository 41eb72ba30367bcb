// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Terminal kernel failures, recorded where a debugger can find them.
//!
//! A kernel invariant violation is not an application error: there is no
//! task to blame and nothing sensible to continue into, so we stop the world
//! and leave a note. The binary interface to tooling:
//!
//! - `KERNEL_HAS_FAILED` is a `bool`, cleared before kernel main and set to
//!   one if the kernel reaches `die` (explicitly or through `panic!`). Any
//!   other value means the kernel never booted or scribbled itself on the
//!   way down.
//! - `KERNEL_EPITAPH` is a fixed `u8` buffer holding as much of the failure
//!   description (UTF-8) as fits, NUL-padded. Trim trailing NULs to print.

use core::fmt::{Display, Write};
use core::sync::atomic::Ordering;

/// One-stop flag for kernel triage from a debugger.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: this function runs at most usefully once, from a context that
    // is about to stop the world; the swap below detects recursion.
    let previous_fail =
        unsafe { core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true) };
    if previous_fail {
        // Recursive failure: writing a second epitaph would only destroy the
        // first, more interesting one.
        loop {
            core::sync::atomic::fence(Ordering::SeqCst);
        }
    }

    // Safety: the flag above admits exactly one execution to this point.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Records `msg` as the kernel's last words and parks the CPU.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Chisel { dest: buf };
    write!(writer, "{msg}").ok();

    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

struct Chisel {
    dest: &'static mut [u8],
}

impl Write for Chisel {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
