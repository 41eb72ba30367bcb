// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shared stack pool: a word arena carved into equal fixed-size blocks,
//! tracked on two lists.
//!
//! Blocks move `free -> bound -> scan -> free`. A block on the free list is
//! entirely sentinel-filled except its word 1, which links to the next free
//! block. A bound block belongs to a running or stopped-but-resumable task
//! and is not on any list. When a task stops, its block goes to the *scan*
//! list so the high-water measurement can be committed after the task is
//! gone; while there, word 0 (the pad word, about to be re-filled anyway)
//! links to the next scan entry and word 1 records the previous owner.
//!
//! Each block starts with `pad_words` of padding below the usable stack
//! region. The pad stays sentinel-filled in normal operation; a small
//! overrun lands in the pad and shows up in the measured high water mark
//! without damaging a neighbor.
//!
//! The pool knows nothing about tasks: owners are opaque `u32` values, and
//! the caller applies its own rules to the measurement that `scan_unbound`
//! reports.

/// Reserved "no link" / "no owner" word.
pub const WORD_NONE: u32 = u32::MAX;

/// Result of scanning one released block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScanOutcome {
    /// The block that was scanned and returned to the free list.
    pub block: usize,
    /// The owner recorded at release, or `WORD_NONE` if the owner was
    /// deleted before the scan ran.
    pub owner: u32,
    /// High-water measurement in bytes: distance from the deepest
    /// non-sentinel word to the top of the block. May exceed the usable
    /// stack size if the task dipped into the pad.
    pub used_bytes: usize,
}

/// Errors from pool construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolInitError {
    /// The arena does not hold even one block.
    ArenaTooSmall,
    /// Block geometry is impossible (no pad, or pad consumes the block).
    BadGeometry,
}

/// Fixed-size stack block allocator over a borrowed word arena.
#[derive(Debug)]
pub struct StackPool<'a> {
    mem: &'a mut [u32],
    block_words: usize,
    pad_words: usize,
    blocks: usize,
    fill: u32,
    free: u32,
    scan: u32,
    scan_tail: u32,
}

impl<'a> StackPool<'a> {
    /// Carves `mem` into blocks of `block_words` (pad included), fills every
    /// word with the sentinel, and links all blocks onto the free list.
    ///
    /// Trailing words of `mem` that don't make a whole block are ignored.
    pub fn new(
        mem: &'a mut [u32],
        block_words: usize,
        pad_words: usize,
        fill: u32,
    ) -> Result<Self, PoolInitError> {
        if pad_words < 1 || block_words <= pad_words + 1 {
            return Err(PoolInitError::BadGeometry);
        }
        let blocks = mem.len() / block_words;
        if blocks == 0 {
            return Err(PoolInitError::ArenaTooSmall);
        }

        for w in mem.iter_mut() {
            *w = fill;
        }
        let mut pool = Self {
            mem,
            block_words,
            pad_words,
            blocks,
            fill,
            free: WORD_NONE,
            scan: WORD_NONE,
            scan_tail: WORD_NONE,
        };
        // Link free list back-to-front so block 0 is handed out first.
        for b in (0..blocks).rev() {
            pool.words_mut(b)[1] = pool.free;
            pool.free = b as u32;
        }
        Ok(pool)
    }

    /// A pool with no blocks at all: every allocation fails, every list is
    /// empty. Lets a kernel whose arena failed to carve keep a working (if
    /// useless) pool while it reports the failure.
    pub fn empty() -> StackPool<'static> {
        StackPool {
            mem: &mut [],
            block_words: 2,
            pad_words: 1,
            blocks: 0,
            fill: 0,
            free: WORD_NONE,
            scan: WORD_NONE,
            scan_tail: WORD_NONE,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Words making up the block's pad region, in arena order.
    pub fn pad_words(&self) -> usize {
        self.pad_words
    }

    /// Usable stack size of each block, in bytes.
    pub fn stack_bytes(&self) -> usize {
        (self.block_words - self.pad_words) * 4
    }

    pub fn has_free(&self) -> bool {
        self.free != WORD_NONE
    }

    pub fn has_scan(&self) -> bool {
        self.scan != WORD_NONE
    }

    /// Shared view of a block's words, for bound-stack scanning and tests.
    pub fn words(&self, block: usize) -> &[u32] {
        &self.mem[block * self.block_words..(block + 1) * self.block_words]
    }

    fn words_mut(&mut self, block: usize) -> &mut [u32] {
        &mut self.mem[block * self.block_words..(block + 1) * self.block_words]
    }

    /// Pops the free-list head. The returned block is sentinel-filled
    /// throughout, its link word restored to the sentinel.
    pub fn alloc(&mut self) -> Option<usize> {
        if self.free == WORD_NONE {
            return None;
        }
        let b = self.free as usize;
        self.free = self.words(b)[1];
        let fill = self.fill;
        self.words_mut(b)[1] = fill;
        Some(b)
    }

    /// Appends a bound block to the scan list, recording its owner so the
    /// scanner can credit the measurement after the owner's control state is
    /// long gone.
    pub fn release(&mut self, block: usize, owner: u32) {
        {
            let words = self.words_mut(block);
            words[0] = WORD_NONE;
            words[1] = owner;
        }
        if self.scan_tail == WORD_NONE {
            self.scan = block as u32;
        } else {
            let tail = self.scan_tail as usize;
            self.words_mut(tail)[0] = block as u32;
        }
        self.scan_tail = block as u32;
    }

    /// Drops a block's recorded owner, for use when the owning task is
    /// deleted while its stack still sits on the scan list.
    pub fn disown(&mut self, owner: u32) {
        let mut cur = self.scan;
        while cur != WORD_NONE {
            let b = cur as usize;
            if self.words(b)[1] == owner {
                self.words_mut(b)[1] = WORD_NONE;
            }
            cur = self.words(b)[0];
        }
    }

    /// First half of scanning the scan-list head: measures how deep the
    /// previous owner got and refills the measured region with the sentinel.
    /// The block stays at the head of the scan list; callers follow up with
    /// [`Self::scan_commit`].
    ///
    /// The split exists for preemption: measurement walks a whole block and
    /// may run with interrupts live, because it touches nothing a concurrent
    /// [`Self::release`] touches (releases append through word 0 of the
    /// *tail* block and the list heads, never the head block's payload). The
    /// commit is the part that must be atomic against releases.
    pub fn scan_measure(&mut self) -> Option<ScanOutcome> {
        if self.scan == WORD_NONE {
            return None;
        }
        let b = self.scan as usize;
        let fill = self.fill;

        let mut first_used = self.block_words;
        {
            let words = self.words_mut(b);
            let owner = words[1];
            // The owner word rejoins the measurement region; word 0 stays a
            // list link until commit.
            words[1] = fill;

            // Deepest word the owner touched, scanning up from just above
            // the link word. Word 0 is excluded: it is the pad word proper
            // and doubles as the list link, so it can't witness a
            // high-water mark.
            for (i, w) in words.iter().enumerate().skip(1) {
                if *w != fill {
                    first_used = i;
                    break;
                }
            }
            for w in &mut words[first_used..] {
                *w = fill;
            }
            let used_bytes = (words.len() - first_used) * 4;
            Some(ScanOutcome {
                block: b,
                owner,
                used_bytes,
            })
        }
    }

    /// Second half of the scan: unlinks the measured block from the scan
    /// list, restores its pad sentinel, and splices it onto the free list.
    /// Must run atomically with respect to [`Self::release`].
    pub fn scan_commit(&mut self, block: usize) {
        debug_assert_eq!(self.scan, block as u32);
        // Read the link at commit time: a release may have appended behind
        // this block since it was measured.
        self.scan = self.words(block)[0];
        if self.scan == WORD_NONE {
            self.scan_tail = WORD_NONE;
        }
        let fill = self.fill;
        let free = self.free;
        let words = self.words_mut(block);
        words[0] = fill;
        words[1] = free;
        self.free = block as u32;
    }

    /// Scans the scan-list head in one call: measure, then commit. For
    /// callers that already hold whatever lock covers releases.
    pub fn scan_unbound(&mut self) -> Option<ScanOutcome> {
        let outcome = self.scan_measure()?;
        self.scan_commit(outcome.block);
        Some(outcome)
    }

    /// Number of blocks currently on the free list. O(n); intended for
    /// startup checks and tests.
    pub fn free_count(&self) -> usize {
        let mut n = 0;
        let mut cur = self.free;
        while cur != WORD_NONE && n <= self.blocks {
            n += 1;
            cur = self.words(cur as usize)[1];
        }
        n
    }
}

/// Measures a stack's high-water mark by counting sentinel words from the
/// low end: returns the byte distance from the first overwritten word to the
/// top of `words`. Used for bound stacks, whose memory stays attached to the
/// task; pass the full pad-plus-stack region.
pub fn used_high_water(words: &[u32], fill: u32) -> usize {
    for (i, w) in words.iter().enumerate() {
        if *w != fill {
            return (words.len() - i) * 4;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILL: u32 = 0xDCDC_DCDC;
    const BLK: usize = 16; // words per block
    const PAD: usize = 2;

    fn pool(mem: &mut [u32]) -> StackPool<'_> {
        StackPool::new(mem, BLK, PAD, FILL).unwrap()
    }

    #[test]
    fn init_carves_and_fills() {
        let mut mem = vec![0u32; BLK * 3 + 5]; // 5 stray words ignored
        let p = pool(&mut mem);
        assert_eq!(p.block_count(), 3);
        assert_eq!(p.free_count(), 3);
        assert_eq!(p.stack_bytes(), (BLK - PAD) * 4);
        // All words sentinel except the free links.
        for b in 0..3 {
            for (i, w) in p.words(b).iter().enumerate() {
                if i != 1 {
                    assert_eq!(*w, FILL, "block {b} word {i}");
                }
            }
        }
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut mem = vec![0u32; 64];
        assert_eq!(
            StackPool::new(&mut mem, 4, 4, FILL).unwrap_err(),
            PoolInitError::BadGeometry
        );
        let mut tiny = vec![0u32; 8];
        assert_eq!(
            StackPool::new(&mut tiny, 16, 2, FILL).unwrap_err(),
            PoolInitError::ArenaTooSmall
        );
    }

    #[test]
    fn alloc_restores_link_word() {
        let mut mem = vec![0u32; BLK * 2];
        let mut p = pool(&mut mem);
        let b = p.alloc().unwrap();
        for (i, w) in p.words(b).iter().enumerate() {
            assert_eq!(*w, FILL, "word {i} not sentinel after alloc");
        }
    }

    #[test]
    fn release_scan_free_round_trip() {
        let mut mem = vec![0u32; BLK * 2];
        let mut p = pool(&mut mem);
        let b = p.alloc().unwrap();

        // Simulate a task that used the top 6 words of its stack.
        {
            let words = &mut p.mem[b * BLK..(b + 1) * BLK];
            for w in &mut words[BLK - 6..] {
                *w = 0x1111_2222;
            }
        }
        p.release(b, 7);
        assert!(p.has_scan());

        let outcome = p.scan_unbound().unwrap();
        assert_eq!(outcome.block, b);
        assert_eq!(outcome.owner, 7);
        assert_eq!(outcome.used_bytes, 6 * 4);
        assert!(!p.has_scan());

        // Block is back on the free list, fully sentinel-filled apart from
        // its link word.
        assert_eq!(p.free_count(), 2);
        let nb = p.alloc().unwrap();
        assert_eq!(nb, b); // LIFO free list hands the fresh block back
        for (i, w) in p.words(nb).iter().enumerate() {
            assert_eq!(*w, FILL, "word {i} dirty after scan");
        }
    }

    #[test]
    fn untouched_stack_scans_as_zero() {
        let mut mem = vec![0u32; BLK];
        let mut p = pool(&mut mem);
        let b = p.alloc().unwrap();
        p.release(b, 3);
        let outcome = p.scan_unbound().unwrap();
        assert_eq!(outcome.used_bytes, 0);
    }

    #[test]
    fn scan_list_is_fifo() {
        let mut mem = vec![0u32; BLK * 3];
        let mut p = pool(&mut mem);
        let b0 = p.alloc().unwrap();
        let b1 = p.alloc().unwrap();
        let b2 = p.alloc().unwrap();
        p.release(b1, 10);
        p.release(b2, 20);
        p.release(b0, 30);
        assert_eq!(p.scan_unbound().unwrap().owner, 10);
        assert_eq!(p.scan_unbound().unwrap().owner, 20);
        assert_eq!(p.scan_unbound().unwrap().owner, 30);
        assert_eq!(p.scan_unbound(), None);
        assert_eq!(p.free_count(), 3);
    }

    #[test]
    fn exhaustion_recovers_through_scan() {
        // Scenario: more tasks than stacks; progress resumes once a stopped
        // task's stack is scanned back onto the free list.
        let mut mem = vec![0u32; BLK * 2];
        let mut p = pool(&mut mem);
        let b0 = p.alloc().unwrap();
        let _b1 = p.alloc().unwrap();
        assert_eq!(p.alloc(), None); // third task waits

        p.release(b0, 1); // first task stopped
        assert_eq!(p.alloc(), None); // still unavailable until scanned
        p.scan_unbound().unwrap();
        assert!(p.alloc().is_some()); // third task can start
    }

    #[test]
    fn release_lands_behind_in_flight_measurement() {
        // A stopped task can release its stack while the idle task is midway
        // through scanning another block; the commit must still see the
        // late-appended block.
        let mut mem = vec![0u32; BLK * 3];
        let mut p = pool(&mut mem);
        let b0 = p.alloc().unwrap();
        let b1 = p.alloc().unwrap();
        p.release(b0, 1);

        let m = p.scan_measure().unwrap();
        assert_eq!(m.block, b0);
        p.release(b1, 2); // preempting release during the measurement
        p.scan_commit(m.block);

        assert_eq!(p.scan_unbound().unwrap().owner, 2);
        assert_eq!(p.free_count(), 3);
    }

    #[test]
    fn disown_clears_owner_in_place() {
        let mut mem = vec![0u32; BLK * 2];
        let mut p = pool(&mut mem);
        let b = p.alloc().unwrap();
        p.release(b, 42);
        p.disown(42);
        assert_eq!(p.scan_unbound().unwrap().owner, WORD_NONE);
    }

    #[test]
    fn pad_overrun_exceeds_stack_bytes() {
        let mut mem = vec![0u32; BLK];
        let mut p = pool(&mut mem);
        let b = p.alloc().unwrap();
        // Task blew through the stack into the pad (word 1).
        {
            let words = &mut p.mem[b * BLK..(b + 1) * BLK];
            for w in &mut words[1..] {
                *w = 0xBAD0_BAD0;
            }
        }
        p.release(b, 5);
        let outcome = p.scan_unbound().unwrap();
        // The overflow test is `used >= stack size`: the pad words can't
        // witness (they double as list housekeeping), so a pad overrun shows
        // up as a measurement that reaches the stack size exactly.
        assert!(outcome.used_bytes >= p.stack_bytes());
    }

    #[test]
    fn bound_scan_measures_from_low_end() {
        let mut words = vec![FILL; 32];
        assert_eq!(used_high_water(&words, FILL), 0);
        words[20] = 1;
        assert_eq!(used_high_water(&words, FILL), 12 * 4);
        // A hole below the deepest touch still counts from the deepest.
        words[5] = 2;
        assert_eq!(used_high_water(&words, FILL), 27 * 4);
    }
}
