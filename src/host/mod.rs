//! What the snippet engine needs from the editor it is embedded in.
//!
//! The engine never owns the text buffer: it reads and edits it through [`EditorHost`], and
//! the host tells it about what happened through [`EditorEvent`]s.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::snippets::SnippetContext;

mod buffer;

pub use buffer::BufferEditor;

/// A position in a buffer. Both fields are 0-based and `column` is counted in chars.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    /// Where this position ends up once `text` is inserted right before it, or where
    /// the end of `text` lands if it's inserted at this position.
    pub fn advance(self, text: &str) -> Self {
        match text.rsplit_once('\n') {
            Some((before, last)) => Position {
                row: self.row + before.matches('\n').count() + 1,
                column: last.chars().count(),
            },
            None => Position {
                row: self.row,
                column: self.column + text.chars().count(),
            },
        }
    }

    /// Translates a position expressed relative to a snippet into buffer coordinates
    pub fn offset_by(self, origin: Position) -> Self {
        if self.row == 0 {
            Position::new(origin.row, origin.column + self.column)
        } else {
            Position::new(origin.row + self.row, self.column)
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Builds a range, swapping the points if needed
    pub fn new(a: Position, b: Position) -> Self {
        if b < a {
            Self { start: b, end: a }
        } else {
            Self { start: a, end: b }
        }
    }

    pub fn empty(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the point is inside the range, boundaries included
    pub fn contains(&self, point: Position) -> bool {
        self.start <= point && point <= self.end
    }

    /// Whether the range is strictly inside `other`, touching neither of its ends
    pub fn is_strictly_inside(&self, other: &Range) -> bool {
        other.start < self.start && self.end < other.end
    }

    /// Where the point is compared to the range: `Less` before it, `Greater` after it
    pub fn compare_point(&self, point: Position) -> Ordering {
        if point < self.start {
            Ordering::Less
        } else if point > self.end {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// A selection: `anchor` is where it started, `lead` is where the cursor is.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub lead: Position,
}

impl Selection {
    pub fn cursor(at: Position) -> Self {
        Self {
            anchor: at,
            lead: at,
        }
    }

    /// Selects the range with the cursor at its end
    pub fn range(range: Range) -> Self {
        Self {
            anchor: range.start,
            lead: range.end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.lead
    }

    pub fn to_range(&self) -> Range {
        Range::new(self.anchor, self.lead)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    Insert,
    Remove,
}

/// A single change applied to a buffer.
/// For an insertion `end` is where the inserted text ends, for a removal it's the end of
/// the text that was removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delta {
    pub action: DeltaAction,
    pub start: Position,
    pub end: Position,
    pub text: String,
}

impl Delta {
    pub fn insert(start: Position, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            action: DeltaAction::Insert,
            start,
            end: start.advance(&text),
            text,
        }
    }

    pub fn remove(range: Range, text: impl Into<String>) -> Self {
        Self {
            action: DeltaAction::Remove,
            start: range.start,
            end: range.end,
            text: text.into(),
        }
    }

    pub fn range(&self) -> Range {
        Range::new(self.start, self.end)
    }

    pub fn is_noop(&self) -> bool {
        self.start == self.end
    }

    /// Where `point` is after this change.
    ///
    /// When text is inserted exactly at `point`, it stays in place if `stay_on_insert` is
    /// true and moves to the end of the inserted text otherwise.
    pub fn shift(&self, point: Position, stay_on_insert: bool) -> Position {
        match self.action {
            DeltaAction::Insert => {
                if point < self.start || (point == self.start && stay_on_insert) {
                    return point;
                }
                if point.row == self.start.row {
                    Position::new(
                        self.end.row,
                        self.end.column + (point.column - self.start.column),
                    )
                } else {
                    Position::new(point.row + self.end.row - self.start.row, point.column)
                }
            }
            DeltaAction::Remove => {
                if point <= self.start {
                    point
                } else if point <= self.end {
                    self.start
                } else if point.row == self.end.row {
                    Position::new(
                        self.start.row,
                        self.start.column + (point.column - self.end.column),
                    )
                } else {
                    Position::new(point.row - (self.end.row - self.start.row), point.column)
                }
            }
        }
    }
}

/// Opaque handle on a highlight marker created by the host
pub type MarkerId = usize;

/// Things happening in the editor the snippet engine cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// The buffer changed. Edits made by the engine itself through
    /// [`EditorHost::replace`] must not be reported back.
    Change(Delta),
    ChangeSelection,
    /// The editor now shows another document
    ChangeSession,
    /// A command finished running
    AfterExec { read_only: bool },
}

/// The kinds of [`EditorEvent`] a listener can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Change,
    ChangeSelection,
    ChangeSession,
    AfterExec,
}

impl EditorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EditorEvent::Change(_) => EventKind::Change,
            EditorEvent::ChangeSelection => EventKind::ChangeSelection,
            EditorEvent::ChangeSession => EventKind::ChangeSession,
            EditorEvent::AfterExec { .. } => EventKind::AfterExec,
        }
    }
}

/// The editor surface used by the snippet engine and the tabstop manager
pub trait EditorHost: SnippetContext {
    /// Id of the language mode of the document, used to pick the snippets that apply
    fn mode_id(&self) -> &str;

    /// The primary selection
    fn selection(&self) -> Selection;

    fn selections(&self) -> Vec<Selection> {
        vec![self.selection()]
    }

    /// Replaces every selection, the first one becoming the primary selection
    fn set_selections(&mut self, selections: Vec<Selection>);

    fn text_range(&self, range: Range) -> String;

    /// Replaces the text in `range` and returns the changes actually applied to the buffer
    /// in order, usually a removal followed by an insertion.
    fn replace(&mut self, range: Range, text: &str) -> Vec<Delta>;

    fn is_empty(&self) -> bool;

    fn add_marker(&mut self, range: Range) -> MarkerId;

    fn update_marker(&mut self, _id: MarkerId, _range: Range) {}

    fn remove_marker(&mut self, id: MarkerId);

    /// Opens the completion popup with the given choices
    fn start_autocomplete(&mut self, _choices: &[String]) {}

    /// Called when the tabstop commands should start or stop taking over their keys
    fn bind_tabstop_commands(&mut self, _active: bool) {}
}
