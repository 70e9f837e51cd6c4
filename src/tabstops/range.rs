use crate::host::{Delta, MarkerId, Range};
use crate::snippets::Transform;

/// A tabstop occurrence followed as the buffer changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRange {
    pub(crate) key: usize,
    pub(crate) range: Range,
    /// Mirrors are rewritten from the primary occurrence rather than edited
    pub(crate) linked: bool,
    pub(crate) transform: Option<Transform>,
    pub(crate) marker: Option<MarkerId>,
}

impl TrackedRange {
    pub(crate) fn new(key: usize, range: Range, linked: bool, transform: Option<Transform>) -> Self {
        Self {
            key,
            range,
            linked,
            transform,
            marker: None,
        }
    }

    pub fn key(&self) -> usize {
        self.key
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    /// Moves the range along with a change. Text inserted at one of its boundaries ends up
    /// inside an `absorbing` range and outside any other.
    /// Returns whether the range moved.
    pub(crate) fn shift(&mut self, delta: &Delta, absorbing: bool) -> bool {
        let start = delta.shift(self.range.start, absorbing);
        let mut end = delta.shift(self.range.end, !absorbing);
        if end < start {
            end = start;
        }
        let moved = start != self.range.start || end != self.range.end;
        self.range = Range { start, end };
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Position;

    fn tracked(start: (usize, usize), end: (usize, usize)) -> TrackedRange {
        TrackedRange::new(
            0,
            Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1)),
            false,
            None,
        )
    }

    fn span(r: &TrackedRange) -> ((usize, usize), (usize, usize)) {
        (
            (r.range.start.row, r.range.start.column),
            (r.range.end.row, r.range.end.column),
        )
    }

    #[test]
    fn absorbing_ranges_grow_at_both_ends() {
        let mut r = tracked((0, 2), (0, 4));
        r.shift(&Delta::insert(Position::new(0, 4), "xy"), true);
        assert_eq!(span(&r), ((0, 2), (0, 6)));
        r.shift(&Delta::insert(Position::new(0, 2), "z"), true);
        assert_eq!(span(&r), ((0, 2), (0, 7)));
    }

    #[test]
    fn other_ranges_keep_boundary_edits_out() {
        let mut r = tracked((0, 2), (0, 4));
        r.shift(&Delta::insert(Position::new(0, 4), "xy"), false);
        assert_eq!(span(&r), ((0, 2), (0, 4)));
        r.shift(&Delta::insert(Position::new(0, 2), "z"), false);
        assert_eq!(span(&r), ((0, 3), (0, 5)));

        let mut empty = tracked((0, 1), (0, 1));
        empty.shift(&Delta::insert(Position::new(0, 1), "ab\nc"), false);
        assert_eq!(span(&empty), ((1, 1), (1, 1)));
    }

    #[test]
    fn removals_collapse_ranges() {
        let mut r = tracked((0, 2), (0, 4));
        let removed = Range::new(Position::new(0, 1), Position::new(0, 3));
        assert!(r.shift(&Delta::remove(removed, "ab"), false));
        assert_eq!(span(&r), ((0, 1), (0, 2)));
        let removed = Range::new(Position::new(0, 5), Position::new(0, 8));
        assert!(!r.shift(&Delta::remove(removed, "abc"), true));
    }
}
