// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture selection.
//!
//! The real kernel targets ARMv7-M and ARMv8-M; anything else (host tooling,
//! `cargo check` on a workstation) gets a stub architecture that keeps the
//! portable code honest without being able to run it.

cfg_if::cfg_if! {
    if #[cfg(any(armv7m, armv8m))] {
        #[macro_use]
        mod arm_m;
        pub use arm_m::*;
    } else {
        #[macro_use]
        mod fake;
        pub use fake::*;
    }
}
