// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pure kernel algorithms, separated from kernel state so they can be tested
//! on the host.
//!
//! Everything in this crate is index-based rather than pointer-based: queues
//! link control blocks by arena index, the stack pool hands out block numbers
//! into a word arena, and the profile clock is a plain state machine fed
//! timestamps by its caller. The kernel (`kern`) owns the actual control
//! blocks, memory, and interrupt masking, and calls in here with the
//! appropriate locks held.
//!
//! The damage-tolerance requirements shape the link representation: a queue
//! link is a raw `u32` that may have been corrupted into *any* bit pattern,
//! and every dereference goes through validation against the arena bounds and
//! the control-block type tag.

// Allow std-y things to be used in test. Note that this attribute is a bit of
// a trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]

pub mod lsrq;
pub mod profile;
pub mod runq;
pub mod ssr;
pub mod stackpool;

pub use lsrq::PostRing;
pub use profile::{FrameRecorder, RtClock, Scope};
pub use runq::{Link, QueueNode, Repair, RunQueue};
pub use ssr::{exit_action, ExitAction};
pub use stackpool::StackPool;
