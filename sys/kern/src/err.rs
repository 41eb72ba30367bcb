// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The error manager.
//!
//! Kernel errors flow through one funnel: `ErrorManager::report`. It counts
//! the error, remembers the most recent one, and forwards to the
//! application's hook, whose policy (log, trap into a debugger, kill the
//! task) is its own business. Errors are never thrown across exception
//! frames -- after the hook returns, control continues along the defined
//! scheduling paths.
//!
//! Errors raised *inside a service* are additionally recorded in the calling
//! task's error field and returned to the caller; errors raised by the
//! scheduler itself have no caller and go only to the hook.

use abi::{ErrorCode, Severity};

use crate::time::Timestamp;

/// Signature of the application error hook.
pub type ErrorHook = fn(ErrorCode, Severity);

/// Number of distinct error codes, for the counter array.
const CODE_COUNT: usize = ErrorCode::Locked as usize + 1;

pub struct ErrorManager {
    hook: Option<ErrorHook>,
    counts: [u16; CODE_COUNT],
    last: ErrorCode,
    last_at: Timestamp,
}

impl ErrorManager {
    pub const fn new() -> Self {
        Self {
            hook: None,
            counts: [0; CODE_COUNT],
            last: ErrorCode::Ok,
            last_at: Timestamp::ZERO,
        }
    }

    /// Installs the process-wide error hook. Later calls replace earlier
    /// ones.
    pub fn set_hook(&mut self, hook: ErrorHook) {
        self.hook = Some(hook);
    }

    /// Records `code` and forwards it to the hook.
    pub fn report(&mut self, code: ErrorCode) {
        if code.is_ok() {
            return;
        }
        let sev = code.severity();
        let slot = &mut self.counts[code as usize];
        *slot = slot.saturating_add(1);
        self.last = code;
        self.last_at = crate::time::now();

        klog!("kern error: {:?} ({:?})", code, sev);

        if let Some(hook) = self.hook {
            hook(code, sev);
        }
    }

    /// Times `code` has been reported since boot.
    pub fn count(&self, code: ErrorCode) -> u16 {
        self.counts[code as usize]
    }

    /// Most recent error reported, `Ok` if none.
    pub fn last(&self) -> ErrorCode {
        self.last
    }

    /// Kernel time of the most recent report.
    pub fn last_at(&self) -> Timestamp {
        self.last_at
    }
}

impl Default for ErrorManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers the application error hook. Usually called once during board
/// bring-up, before tasks start.
pub fn set_error_hook(hook: ErrorHook) {
    // Safety: hook registration is a single field store; done from startup
    // or task context this cannot tear against the scheduler's reports.
    unsafe {
        crate::startup::with_kernel(|k| k.err.set_hook(hook));
    }
}
