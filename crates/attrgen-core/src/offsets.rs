//! Translation of original source offsets to offsets in the running buffer.
//!
//! Every rendered mutation is recorded as an edit in original coordinates. Edits are kept
//! sorted and non-overlapping, so translating an offset is a binary search plus the sum of
//! the deltas before it.

use crate::tree::Splice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edit {
    start: usize,
    end: usize,
    delta: isize,
}

impl Edit {
    fn new_len(&self) -> usize {
        ((self.end - self.start) as isize + self.delta) as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
    edits: Vec<Edit>,
}

impl OffsetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Map an offset of the original source into the current buffer.
    ///
    /// Offsets that fell inside a rewritten region collapse to the start of that region.
    pub fn to_current(&self, original: usize) -> usize {
        let idx = self.edits.partition_point(|e| e.end <= original);
        let shift: isize = self.edits[..idx].iter().map(|e| e.delta).sum();
        let position = match self.edits.get(idx) {
            Some(edit) if edit.start < original => edit.start,
            _ => original,
        };
        (position as isize + shift) as usize
    }

    /// Whether `original` lies strictly inside a region that has been rewritten.
    pub fn is_rewritten(&self, original: usize) -> bool {
        let idx = self.edits.partition_point(|e| e.end <= original);
        self.edits
            .get(idx)
            .is_some_and(|edit| edit.start < original)
    }

    /// Map an offset of the current buffer back to original coordinates.
    pub fn to_original(&self, current: usize) -> usize {
        let mut shift = 0isize;
        for edit in &self.edits {
            let current_start = (edit.start as isize + shift) as usize;
            if current < current_start {
                break;
            }
            if current < current_start + edit.new_len() {
                return edit.start;
            }
            shift += edit.delta;
        }
        (current as isize - shift) as usize
    }

    /// Record splices applied to the current buffer, given in ascending order.
    pub fn record(&mut self, splices: &[Splice]) {
        // Later splices are expressed in pre-render coordinates too, so translate them all
        // before touching the edit list.
        let translated: Vec<Edit> = splices
            .iter()
            .map(|s| Edit {
                start: self.to_original(s.start),
                end: self.to_original(s.end),
                delta: s.new_len as isize - (s.end - s.start) as isize,
            })
            .collect();

        for edit in translated {
            self.insert(edit);
        }
    }

    fn insert(&mut self, mut edit: Edit) {
        let first = self.edits.partition_point(|e| e.end < edit.start);
        let mut last = first;
        while last < self.edits.len() && self.edits[last].start <= edit.end {
            let existing = self.edits[last];
            edit.start = edit.start.min(existing.start);
            edit.end = edit.end.max(existing.end);
            edit.delta += existing.delta;
            last += 1;
        }
        self.edits.splice(first..last, [edit]);
    }
}
