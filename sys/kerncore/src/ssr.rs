// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The service-exit decision.
//!
//! Every kernel service is bracketed by an enter/exit pair that maintains the
//! service-nesting counter. What happens at exit depends only on the nesting
//! depth and on whether anything happened during the service that requires
//! the schedulers to run; that decision is factored out here so it can be
//! checked exhaustively without a live kernel.

/// What a service exit should do.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitAction {
    /// This exit closes an inner service frame: decrement nesting and return
    /// the raw value. No dispatch may happen before the outermost exit.
    Nested,
    /// Outermost exit with a reschedule pending (an inner operation set a
    /// scheduler request, or deferred interrupt work is queued): save the
    /// return value in the caller's control block and run the dispatcher.
    Dispatch,
    /// Outermost exit with nothing pending: clear nesting and return
    /// directly to the caller.
    Direct,
}

/// Decides the exit behavior for a service frame.
///
/// `srnest` is the nesting depth *at exit* (1 = outermost frame is closing);
/// `resched` is true when the scheduler request word is nonzero or the LSR
/// queue is non-empty.
pub fn exit_action(srnest: u32, resched: bool) -> ExitAction {
    if srnest != 1 {
        ExitAction::Nested
    } else if resched {
        ExitAction::Dispatch
    } else {
        ExitAction::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nested enter/enter/exit/exit: only the outermost exit may dispatch,
    /// and the nesting counter returns to its pre-call value.
    #[test]
    fn nested_frames_defer_dispatch_to_outermost_exit() {
        let mut srnest = 0u32;

        // enter / enter
        srnest += 1;
        srnest += 1;

        // Inner exit: no dispatch even though work is pending.
        assert_eq!(exit_action(srnest, true), ExitAction::Nested);
        srnest -= 1;

        // Outermost exit dispatches.
        assert_eq!(exit_action(srnest, true), ExitAction::Dispatch);

        // The dispatcher, not the exit path, owns the counter from here; a
        // completed dispatch leaves it back at zero.
        srnest -= 1;
        assert_eq!(srnest, 0);
    }

    #[test]
    fn quiet_outermost_exit_returns_directly() {
        assert_eq!(exit_action(1, false), ExitAction::Direct);
    }

    #[test]
    fn pending_work_forces_dispatch() {
        assert_eq!(exit_action(1, true), ExitAction::Dispatch);
    }

    #[test]
    fn deep_nesting_is_always_nested() {
        for depth in 2..6 {
            assert_eq!(exit_action(depth, true), ExitAction::Nested);
            assert_eq!(exit_action(depth, false), ExitAction::Nested);
        }
    }
}
