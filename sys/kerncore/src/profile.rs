// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime accounting: who owns the CPU right now, and for how long.
//!
//! The clock is fed raw timestamps from a free-running counter whose period
//! is one tick; deltas are corrected for wraparound under the assumption
//! that no accounted span exceeds one period (the tick interrupt itself
//! guarantees this, since it closes out any running span).
//!
//! The clock accumulates ISR and LSR time itself. Task time is *returned* to
//! the caller instead, because crediting a task touches its control block
//! (its frame counter, and possibly an ancestor's runtime-limit counter) and
//! this crate doesn't know about control blocks.
//!
//! Overhead is never measured directly: it is defined as the remainder of a
//! profile frame after ISR, LSR, and task time are subtracted.

/// Who currently owns CPU time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Scope {
    /// Kernel overhead: scheduling, service internals.
    Overhead,
    /// An application task.
    Task,
    /// A link service routine.
    Lsr,
    /// An interrupt service routine (base level; nested ISRs extend the
    /// same span).
    Isr,
}

/// The profiling clock: current scope, last sample, and the ISR/LSR
/// accumulators.
#[derive(Debug)]
pub struct RtClock {
    pf: Scope,
    /// Scope the base ISR interrupted, restored at base ISR end.
    interrupted: Scope,
    ptime: u32,
    period: u32,
    isr_nest: u32,
    isr_rtc: u32,
    lsr_rtc: u32,
}

impl RtClock {
    pub const fn new(period: u32) -> Self {
        Self {
            pf: Scope::Overhead,
            interrupted: Scope::Overhead,
            ptime: 0,
            period,
            isr_nest: 0,
            isr_rtc: 0,
            lsr_rtc: 0,
        }
    }

    pub fn scope(&self) -> Scope {
        self.pf
    }

    pub fn isr_rtc(&self) -> u32 {
        self.isr_rtc
    }

    pub fn lsr_rtc(&self) -> u32 {
        self.lsr_rtc
    }

    /// Wraparound-corrected time since the previous sample; advances the
    /// sample.
    fn elapse(&mut self, now: u32) -> u32 {
        let mut d = now as i64 - self.ptime as i64;
        if d < 0 {
            d += self.period as i64;
        }
        self.ptime = now;
        d as u32
    }

    /// Marks ISR entry. Only the base (non-nested) entry closes out the
    /// interrupted scope; the returned value is the span to credit to the
    /// current task, nonzero only when a task was interrupted.
    #[must_use]
    pub fn isr_start(&mut self, now: u32) -> u32 {
        self.isr_nest += 1;
        if self.isr_nest != 1 {
            return 0;
        }
        let e = self.elapse(now);
        self.interrupted = self.pf;
        let task_credit = match self.pf {
            Scope::Task => e,
            Scope::Lsr => {
                self.lsr_rtc += e;
                0
            }
            _ => 0,
        };
        self.pf = Scope::Isr;
        task_credit
    }

    /// Marks ISR exit. The base exit accumulates the whole ISR span
    /// (including nested ISRs) and restores the interrupted scope.
    pub fn isr_end(&mut self, now: u32) {
        debug_assert!(self.isr_nest > 0);
        self.isr_nest -= 1;
        if self.isr_nest == 0 {
            let e = self.elapse(now);
            self.isr_rtc += e;
            self.pf = self.interrupted;
        }
    }

    /// Marks LSR entry, closing out a task span if one was open. Returns the
    /// span to credit to the current task.
    #[must_use]
    pub fn lsr_start(&mut self, now: u32) -> u32 {
        let e = self.elapse(now);
        let task_credit = if self.pf == Scope::Task { e } else { 0 };
        self.pf = Scope::Lsr;
        task_credit
    }

    /// Marks LSR exit; the span goes to the LSR accumulator and the
    /// processor returns to kernel overhead.
    pub fn lsr_end(&mut self, now: u32) {
        let e = self.elapse(now);
        self.lsr_rtc += e;
        self.pf = Scope::Overhead;
    }

    /// Marks the processor's handoff to a task; time before this instant is
    /// overhead.
    pub fn task_start(&mut self, now: u32) {
        self.ptime = now;
        self.pf = Scope::Task;
    }

    /// Closes out a task span. Returns the span to credit to the current
    /// task, zero if no task span was open.
    #[must_use]
    pub fn task_end(&mut self, now: u32) -> u32 {
        if self.pf != Scope::Task {
            return 0;
        }
        let e = self.elapse(now);
        self.pf = Scope::Overhead;
        e
    }

    /// Reads and zeroes both accumulators, for the frame snapshot.
    pub fn take_counters(&mut self) -> (u32, u32) {
        let out = (self.isr_rtc, self.lsr_rtc);
        self.isr_rtc = 0;
        self.lsr_rtc = 0;
        out
    }
}

/// Writes one row per profile frame into a caller-supplied buffer treated as
/// a ring of rows.
///
/// Row layout: tick timestamp, ISR total, LSR total, one slot per task, task
/// sum, overhead. The first frame after boot only primes the baseline (the
/// caller zeroes its counters); rows are recorded from the second frame on,
/// so every recorded row covers exactly one whole frame.
pub struct FrameRecorder<'a> {
    buf: &'a mut [u32],
    row_len: usize,
    next: usize,
    primed: bool,
}

impl<'a> FrameRecorder<'a> {
    /// `row_len` must be task count + 5. A buffer shorter than one row
    /// records nothing.
    pub fn new(buf: &'a mut [u32], row_len: usize) -> Self {
        Self {
            buf,
            row_len,
            next: 0,
            primed: false,
        }
    }

    /// True once the baseline frame has passed.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Consumes the baseline frame.
    pub fn prime(&mut self) {
        self.primed = true;
    }

    /// Records one frame row. `frame_len` is the frame length in counter
    /// units; overhead is computed as the remainder (clamped at zero, in
    /// case counter slop makes the parts exceed the whole).
    ///
    /// Returns the computed overhead.
    pub fn record(
        &mut self,
        etime: u32,
        isr_rtc: u32,
        lsr_rtc: u32,
        frame_len: u32,
        task_rtcs: impl Iterator<Item = u32>,
    ) -> u32 {
        debug_assert!(self.primed);
        if self.buf.len() < self.row_len {
            // Still compute overhead for the caller even when there is
            // nowhere to store the row.
            let task_total: u32 = task_rtcs.sum();
            return frame_len.saturating_sub(isr_rtc + lsr_rtc + task_total);
        }
        if self.next + self.row_len > self.buf.len() {
            self.next = 0;
        }
        let row = &mut self.buf[self.next..self.next + self.row_len];
        row[0] = etime;
        row[1] = isr_rtc;
        row[2] = lsr_rtc;
        let mut task_total: u32 = 0;
        let mut i = 3;
        for rtc in task_rtcs {
            if i + 2 < row.len() {
                row[i] = rtc;
                i += 1;
            }
            task_total = task_total.wrapping_add(rtc);
        }
        // Unfilled task slots (fewer tasks than the row was sized for) read
        // as zero.
        for slot in &mut row[i..self.row_len - 2] {
            *slot = 0;
        }
        let overhead = frame_len.saturating_sub(isr_rtc + lsr_rtc + task_total);
        row[self.row_len - 2] = task_total;
        row[self.row_len - 1] = overhead;
        self.next += self.row_len;
        overhead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: u32 = 1000;

    #[test]
    fn task_span_accumulates() {
        let mut c = RtClock::new(PERIOD);
        c.task_start(100);
        assert_eq!(c.task_end(350), 250);
        // No open span: nothing to credit.
        assert_eq!(c.task_end(400), 0);
    }

    #[test]
    fn wraparound_correction() {
        let mut c = RtClock::new(PERIOD);
        c.task_start(900);
        // Counter rolled at 1000; 900 -> 200 is 300 counts.
        assert_eq!(c.task_end(200), 300);
    }

    #[test]
    fn only_base_isr_accounts() {
        let mut c = RtClock::new(PERIOD);
        c.task_start(0);
        assert_eq!(c.isr_start(100), 100); // base: task credited
        assert_eq!(c.isr_start(120), 0); // nested: no accounting
        c.isr_end(150); // nested exit: no accounting
        assert_eq!(c.isr_rtc(), 0);
        c.isr_end(200); // base exit: whole span to ISR
        assert_eq!(c.isr_rtc(), 100);
        // Scope returns to the interrupted task.
        assert_eq!(c.scope(), Scope::Task);
        assert_eq!(c.task_end(250), 50);
    }

    #[test]
    fn isr_during_lsr_credits_lsr() {
        let mut c = RtClock::new(PERIOD);
        assert_eq!(c.lsr_start(0), 0);
        assert_eq!(c.isr_start(40), 0); // LSR span closed into lsr_rtc
        assert_eq!(c.lsr_rtc(), 40);
        c.isr_end(70);
        assert_eq!(c.scope(), Scope::Lsr);
        c.lsr_end(100);
        assert_eq!(c.lsr_rtc(), 70);
        assert_eq!(c.isr_rtc(), 30);
    }

    #[test]
    fn lsr_preempting_task_credits_task() {
        let mut c = RtClock::new(PERIOD);
        c.task_start(0);
        assert_eq!(c.lsr_start(60), 60);
        c.lsr_end(90);
        assert_eq!(c.lsr_rtc(), 30);
        assert_eq!(c.scope(), Scope::Overhead);
    }

    /// The frame contract: task + ISR + LSR + overhead spans sum to the
    /// frame length.
    #[test]
    fn frame_accounting_sums_to_frame_length() {
        const FRAME: u32 = 1000;
        let mut c = RtClock::new(PERIOD);
        let mut task_rtc = [0u32; 2];

        // Frame timeline: overhead 0-50, task0 50-300, ISR 300-400 (task0
        // resumes after), task0 400-500, switch overhead 500-520, task1
        // 520-700, LSR 700-800, task1 800-950, overhead to 1000.
        c.task_start(50);
        task_rtc[0] += c.isr_start(300);
        c.isr_end(400);
        task_rtc[0] += c.task_end(500);
        c.task_start(520);
        task_rtc[1] += c.lsr_start(700);
        c.lsr_end(800);
        c.task_start(800);
        task_rtc[1] += c.task_end(950);

        let (isr, lsr) = c.take_counters();
        assert_eq!(task_rtc[0], 250 + 100);
        assert_eq!(task_rtc[1], 180 + 150);
        assert_eq!(isr, 100);
        assert_eq!(lsr, 100);

        let mut buf = vec![0u32; (2 + 5) * 4];
        let mut rec = FrameRecorder::new(&mut buf, 2 + 5);
        rec.prime();
        let overhead = rec.record(1, isr, lsr, FRAME, task_rtc.iter().copied());
        let total = task_rtc.iter().sum::<u32>() + isr + lsr + overhead;
        assert_eq!(total, FRAME);
    }

    /// One compute task plus idle: rtc's and overhead partition the frame.
    #[test]
    fn frame_roundup_with_idle() {
        const FRAME: u32 = 1000;
        let mut c = RtClock::new(PERIOD);
        let mut compute = 0;
        let mut idle = 0;

        c.task_start(10); // compute runs
        compute += c.task_end(700);
        c.task_start(720); // idle runs
        idle += c.task_end(990);

        let (isr, lsr) = c.take_counters();
        let mut buf = vec![0u32; 7];
        let mut rec = FrameRecorder::new(&mut buf, 7);
        rec.prime();
        let overhead = rec.record(1, isr, lsr, FRAME, [compute, idle].into_iter());
        assert_eq!(compute + idle + overhead, FRAME);
        assert!(overhead > 0);
    }

    #[test]
    fn recorder_row_layout_and_wrap() {
        let mut buf = vec![0u32; 6 * 2]; // two rows of 1 task + 5
        {
            let mut rec = FrameRecorder::new(&mut buf, 6);
            assert!(!rec.is_primed());
            rec.prime();
            rec.record(11, 5, 7, 100, [20u32].into_iter());
            rec.record(12, 1, 2, 100, [30u32].into_iter());
            rec.record(13, 0, 0, 100, [40u32].into_iter()); // wraps to row 0
        }
        assert_eq!(&buf[0..6], &[13, 0, 0, 40, 40, 60]);
        assert_eq!(&buf[6..12], &[12, 1, 2, 30, 30, 67]);
    }

    #[test]
    fn overhead_clamps_at_zero() {
        let mut buf = vec![0u32; 6];
        let mut rec = FrameRecorder::new(&mut buf, 6);
        rec.prime();
        let overhead = rec.record(1, 60, 60, 100, [20u32].into_iter());
        assert_eq!(overhead, 0);
    }
}
