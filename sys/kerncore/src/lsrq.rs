// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded ring used for the LSR queue: interrupt handlers post entries at
//! one end, the LSR scheduler drains them at the other, strictly FIFO.
//!
//! The ring does no locking of its own. The kernel posts with interrupts
//! disabled and drains under the service-nesting barrier, so each operation
//! here runs to completion without observation from the other side.

/// A bounded FIFO ring of `N` entries.
///
/// Tracks its length and a high-water mark; the mark is taken on the drain
/// side (greatest length seen when an entry was consumed), matching how the
/// queue's capacity is tuned in the field: a mark near `N` means interrupts
/// are outrunning the drain.
pub struct PostRing<T, const N: usize> {
    slots: [Option<T>; N],
    inx: usize,
    outx: usize,
    ctr: usize,
    hwm: usize,
}

impl<T: Copy, const N: usize> PostRing<T, N> {
    pub const fn new() -> Self {
        const { assert!(N > 0) };
        Self {
            slots: [None; N],
            inx: 0,
            outx: 0,
            ctr: 0,
            hwm: 0,
        }
    }

    /// Appends `entry`, failing when the ring is full. Callers report the
    /// failure as a queue-overflow error; the entry is lost either way.
    pub fn post(&mut self, entry: T) -> Result<(), T> {
        if self.ctr == N {
            return Err(entry);
        }
        self.slots[self.inx] = Some(entry);
        self.inx += 1;
        if self.inx == N {
            self.inx = 0;
        }
        self.ctr += 1;
        Ok(())
    }

    /// Removes and returns the oldest entry, updating the high-water mark.
    pub fn take(&mut self) -> Option<T> {
        if self.ctr == 0 {
            return None;
        }
        if self.ctr > self.hwm {
            self.hwm = self.ctr;
        }
        self.ctr -= 1;
        let entry = self.slots[self.outx].take();
        self.outx += 1;
        if self.outx == N {
            self.outx = 0;
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.ctr
    }

    pub fn is_empty(&self) -> bool {
        self.ctr == 0
    }

    /// Greatest queue depth observed at drain time since boot.
    pub fn high_water_mark(&self) -> usize {
        self.hwm
    }
}

impl<T: Copy, const N: usize> Default for PostRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = PostRing::<(u16, u32), 4>::new();
        q.post((1, 10)).unwrap();
        q.post((2, 20)).unwrap();
        q.post((3, 30)).unwrap();
        assert_eq!(q.take(), Some((1, 10)));
        assert_eq!(q.take(), Some((2, 20)));
        // Interleaved posting lands behind earlier entries.
        q.post((4, 40)).unwrap();
        assert_eq!(q.take(), Some((3, 30)));
        assert_eq!(q.take(), Some((4, 40)));
        assert_eq!(q.take(), None);
    }

    #[test]
    fn overflow_is_reported() {
        let mut q = PostRing::<u32, 2>::new();
        q.post(1).unwrap();
        q.post(2).unwrap();
        assert_eq!(q.post(3), Err(3));
        // The ring is intact: existing entries drain in order.
        assert_eq!(q.take(), Some(1));
        assert_eq!(q.take(), Some(2));
    }

    #[test]
    fn wraps_around() {
        let mut q = PostRing::<u32, 3>::new();
        for round in 0..10u32 {
            q.post(round).unwrap();
            assert_eq!(q.take(), Some(round));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn high_water_mark_tracks_drain_depth() {
        let mut q = PostRing::<u32, 8>::new();
        q.post(1).unwrap();
        q.take().unwrap();
        assert_eq!(q.high_water_mark(), 1);
        for i in 0..5 {
            q.post(i).unwrap();
        }
        assert_eq!(q.high_water_mark(), 1); // not yet observed
        q.take().unwrap();
        assert_eq!(q.high_water_mark(), 5);
        while q.take().is_some() {}
        assert_eq!(q.high_water_mark(), 5);
    }
}
