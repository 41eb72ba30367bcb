// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The idle task: priority 0, always ready, owner of the background chores.
//!
//! One scan step per pass keeps stack bookkeeping current without ever
//! competing with real work; between passes the processor sleeps until the
//! next interrupt.

/// Idle task entry. Created and started by kernel init; never stops.
pub(crate) fn idle_main(_par: u32) {
    loop {
        #[cfg(feature = "stack-scan")]
        crate::stack::stack_scan();
        crate::arch::wait_for_interrupt();
    }
}
