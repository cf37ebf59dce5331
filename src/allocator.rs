use std::ops::Range;

/// Byte range a scheduled task holds in CMX while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval {
    /// Index into the task's buffer list
    pub buffer: usize,
    pub begin: u64,
    pub end: u64,
}

impl Interval {
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn range(&self) -> Range<u64> {
        self.begin..self.end
    }
}

/// First-fit allocator over `[0, capacity)` with a coalescing free list.
#[derive(Debug, Clone)]
pub struct LinearScan {
    capacity: u64,
    alignment: u64,
    /// Free ranges, sorted and never adjacent
    free: Vec<Range<u64>>,
    used: u64,
    peak: u64,
}

impl LinearScan {
    pub fn new(capacity: u64, alignment: u64) -> Self {
        Self {
            capacity,
            alignment: alignment.max(1),
            free: if capacity > 0 { vec![0..capacity] } else { vec![] },
            used: 0,
            peak: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently handed out, including alignment padding.
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    pub fn aligned(&self, size: u64) -> u64 {
        size.next_multiple_of(self.alignment)
    }

    /// Reserve `size` bytes at the lowest offset that fits.
    pub fn alloc(&mut self, size: u64) -> Option<Range<u64>> {
        let size = self.aligned(size);
        if size == 0 {
            return Some(0..0);
        }
        let slot = self.free.iter().position(|r| r.end - r.start >= size)?;
        let begin = self.free[slot].start;
        if self.free[slot].end - begin == size {
            self.free.remove(slot);
        } else {
            self.free[slot].start += size;
        }
        self.used += size;
        self.peak = self.peak.max(self.used);
        Some(begin..begin + size)
    }

    /// Whether every size in `sizes` could be reserved at once, in order.
    ///
    /// Replays first fit against the free list, tracking only the bytes each
    /// touched range would lose.
    pub fn can_alloc(&self, sizes: &[u64]) -> bool {
        let mut taken: Vec<(usize, u64)> = Vec::with_capacity(sizes.len());
        sizes.iter().all(|&size| {
            let size = self.aligned(size);
            if size == 0 {
                return true;
            }
            let slot = (0..self.free.len()).find(|&i| {
                let consumed = taken.iter().find(|(s, _)| *s == i).map_or(0, |&(_, c)| c);
                self.free[i].end - self.free[i].start - consumed >= size
            });
            match slot {
                Some(i) => {
                    match taken.iter_mut().find(|(s, _)| *s == i) {
                        Some((_, consumed)) => *consumed += size,
                        None => taken.push((i, size)),
                    }
                    true
                }
                None => false,
            }
        })
    }

    /// Give back a range previously returned by [`LinearScan::alloc`].
    pub fn free(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let at = self.free.partition_point(|r| r.start < range.start);
        assert!(
            (at == 0 || self.free[at - 1].end <= range.start)
                && self.free.get(at).is_none_or(|next| range.end <= next.start),
            "range {range:?} is already free"
        );
        self.used -= range.end - range.start;
        self.free.insert(at, range);
        if at + 1 < self.free.len() && self.free[at].end == self.free[at + 1].start {
            let next = self.free.remove(at + 1);
            self.free[at].end = next.end;
        }
        if at > 0 && self.free[at - 1].end == self.free[at].start {
            let this = self.free.remove(at);
            self.free[at - 1].end = this.end;
        }
    }
}
