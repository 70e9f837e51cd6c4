use std::collections::BTreeMap;

use crate::host::{Delta, EditorHost, MarkerId, Position, Range, Selection};
use crate::snippets::SnippetContext;

/// A minimal in-memory editor: a list of lines, some selections and markers.
///
/// Good enough to drive the snippet engine from tests and from the CLI. Edits made through
/// [`BufferEditor::type_text`] return the deltas the caller should forward to the engine
/// as [`EditorEvent::Change`](crate::EditorEvent::Change).
#[derive(Debug, Clone)]
pub struct BufferEditor {
    lines: Vec<String>,
    selections: Vec<Selection>,
    mode_id: String,
    markers: BTreeMap<MarkerId, Range>,
    next_marker: MarkerId,
    soft_tabs: bool,
    tab_size: usize,
    clipboard: Option<String>,
    file_path: Option<String>,
    line_comment: Option<String>,
    block_comment: Option<(String, String)>,
    completions: Vec<String>,
    commands_bound: bool,
}

impl Default for BufferEditor {
    fn default() -> Self {
        Self::new("")
    }
}

impl BufferEditor {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(|l| l.to_owned()).collect(),
            selections: vec![Selection::default()],
            mode_id: "text".to_owned(),
            markers: BTreeMap::new(),
            next_marker: 0,
            soft_tabs: true,
            tab_size: 4,
            clipboard: None,
            file_path: None,
            line_comment: None,
            block_comment: None,
            completions: Vec::new(),
            commands_bound: false,
        }
    }

    pub fn with_mode(mut self, mode_id: impl Into<String>) -> Self {
        self.mode_id = mode_id.into();
        self
    }

    pub fn with_tabs(mut self, soft_tabs: bool, tab_size: usize) -> Self {
        self.soft_tabs = soft_tabs;
        self.tab_size = tab_size.max(1);
        self
    }

    pub fn with_clipboard(mut self, text: impl Into<String>) -> Self {
        self.clipboard = Some(text.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_comments(mut self, line: Option<&str>, block: Option<(&str, &str)>) -> Self {
        self.line_comment = line.map(|s| s.to_owned());
        self.block_comment = block.map(|(a, b)| (a.to_owned(), b.to_owned()));
        self
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn set_cursor(&mut self, at: Position) {
        let at = self.clamp(at);
        self.selections = vec![Selection::cursor(at)];
    }

    pub fn select(&mut self, range: Range) {
        let range = Range::new(self.clamp(range.start), self.clamp(range.end));
        self.selections = vec![Selection::range(range)];
    }

    /// Ranges of the markers currently alive
    pub fn markers(&self) -> impl Iterator<Item = &Range> {
        self.markers.values()
    }

    /// The choices of the last autocomplete popup that was opened
    pub fn completions(&self) -> &[String] {
        &self.completions
    }

    pub fn commands_bound(&self) -> bool {
        self.commands_bound
    }

    /// Types `text` at every selection, replacing what is selected, and leaves a cursor
    /// after each insertion. Returns the changes in the order they were applied.
    pub fn type_text(&mut self, text: &str) -> Vec<Delta> {
        let mut order: Vec<usize> = (0..self.selections.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.selections[i].to_range().start));

        let mut cursors = vec![Position::default(); self.selections.len()];
        let mut done: Vec<usize> = Vec::with_capacity(order.len());
        let mut deltas = Vec::new();

        for i in order {
            let range = self.selections[i].to_range();
            let applied = self.apply(range, text);
            for delta in &applied {
                for &j in &done {
                    cursors[j] = delta.shift(cursors[j], false);
                }
            }
            cursors[i] = self.clamp(range.start).advance(text);
            done.push(i);
            deltas.extend(applied);
        }

        self.selections = cursors.into_iter().map(Selection::cursor).collect();
        deltas
    }

    /// Moves a position back inside the buffer
    fn clamp(&self, pos: Position) -> Position {
        let last_row = self.lines.len().saturating_sub(1);
        if pos.row > last_row {
            let column = self.lines.get(last_row).map(|l| l.chars().count()).unwrap_or(0);
            return Position::new(last_row, column);
        }
        let len = self.lines[pos.row].chars().count();
        Position::new(pos.row, pos.column.min(len))
    }

    fn byte_index(&self, pos: Position) -> usize {
        let line = &self.lines[pos.row];
        line.char_indices()
            .nth(pos.column)
            .map(|(i, _)| i)
            .unwrap_or(line.len())
    }

    /// Replaces the range without touching the selections
    fn apply(&mut self, range: Range, text: &str) -> Vec<Delta> {
        let start = self.clamp(range.start);
        let end = self.clamp(range.end);
        let mut deltas = Vec::with_capacity(2);

        if start != end {
            let removed = self.text_range(Range::new(start, end));
            let tail = {
                let line = &self.lines[end.row];
                line[self.byte_index(end)..].to_owned()
            };
            let cut = self.byte_index(start);
            self.lines[start.row].truncate(cut);
            self.lines[start.row].push_str(&tail);
            self.lines.drain(start.row + 1..=end.row);
            deltas.push(Delta::remove(Range::new(start, end), removed));
        }

        if !text.is_empty() {
            let cut = self.byte_index(start);
            let tail = self.lines[start.row].split_off(cut);
            let mut inserted = text.split('\n').map(|s| s.to_owned());
            if let Some(first) = inserted.next() {
                self.lines[start.row].push_str(&first);
            }
            let mut row = start.row;
            for line in inserted {
                row += 1;
                self.lines.insert(row, line);
            }
            self.lines[row].push_str(&tail);
            deltas.push(Delta::insert(start, text));
        }

        deltas
    }
}

impl SnippetContext for BufferEditor {
    fn line(&self, row: usize) -> Option<&str> {
        self.lines.get(row).map(|l| l.as_str())
    }

    fn cursor(&self) -> Position {
        self.selection().lead
    }

    fn selected_text(&self) -> String {
        self.text_range(self.selection().to_range())
    }

    fn soft_tabs(&self) -> bool {
        self.soft_tabs
    }

    fn tab_size(&self) -> usize {
        self.tab_size
    }

    fn clipboard_text(&self) -> Option<String> {
        self.clipboard.clone()
    }

    fn file_path(&self) -> Option<String> {
        self.file_path.clone()
    }

    fn line_comment(&self) -> Option<String> {
        self.line_comment.clone()
    }

    fn block_comment(&self) -> Option<(String, String)> {
        self.block_comment.clone()
    }
}

impl EditorHost for BufferEditor {
    fn mode_id(&self) -> &str {
        &self.mode_id
    }

    fn selection(&self) -> Selection {
        self.selections.first().copied().unwrap_or_default()
    }

    fn selections(&self) -> Vec<Selection> {
        self.selections.clone()
    }

    fn set_selections(&mut self, selections: Vec<Selection>) {
        let selections: Vec<_> = selections
            .into_iter()
            .map(|s| Selection {
                anchor: self.clamp(s.anchor),
                lead: self.clamp(s.lead),
            })
            .collect();
        if !selections.is_empty() {
            self.selections = selections;
        }
    }

    fn text_range(&self, range: Range) -> String {
        let start = self.clamp(range.start);
        let end = self.clamp(range.end);
        if start.row == end.row {
            let line = &self.lines[start.row];
            return line[self.byte_index(start)..self.byte_index(end)].to_owned();
        }
        let mut out = self.lines[start.row][self.byte_index(start)..].to_owned();
        for row in start.row + 1..end.row {
            out.push('\n');
            out.push_str(&self.lines[row]);
        }
        out.push('\n');
        out.push_str(&self.lines[end.row][..self.byte_index(end)]);
        out
    }

    fn replace(&mut self, range: Range, text: &str) -> Vec<Delta> {
        let deltas = self.apply(range, text);
        for delta in &deltas {
            for selection in &mut self.selections {
                selection.anchor = delta.shift(selection.anchor, true);
                selection.lead = delta.shift(selection.lead, true);
            }
        }
        deltas
    }

    fn is_empty(&self) -> bool {
        self.lines.len() == 1 && self.lines[0].is_empty()
    }

    fn add_marker(&mut self, range: Range) -> MarkerId {
        let id = self.next_marker;
        self.next_marker += 1;
        self.markers.insert(id, range);
        id
    }

    fn update_marker(&mut self, id: MarkerId, range: Range) {
        if let Some(marker) = self.markers.get_mut(&id) {
            *marker = range;
        }
    }

    fn remove_marker(&mut self, id: MarkerId) {
        self.markers.remove(&id);
    }

    fn start_autocomplete(&mut self, choices: &[String]) {
        self.completions = choices.to_vec();
    }

    fn bind_tabstop_commands(&mut self, active: bool) {
        self.commands_bound = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DeltaAction;

    #[test]
    fn replace_across_lines() {
        let mut buffer = BufferEditor::new("abc\ndef\nghi");
        let deltas = buffer.replace(
            Range::new(Position::new(0, 1), Position::new(2, 1)),
            "X\nY",
        );
        assert_eq!(buffer.text(), "aX\nYhi");
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].action, DeltaAction::Remove);
        assert_eq!(deltas[0].text, "bc\ndef\ng");
        assert_eq!(deltas[1].end, Position::new(1, 1));
    }

    #[test]
    fn text_range_handles_multibyte_chars() {
        let buffer = BufferEditor::new("héllo\nwörld");
        let range = Range::new(Position::new(0, 1), Position::new(1, 2));
        assert_eq!(buffer.text_range(range), "éllo\nwö");
    }

    #[test]
    fn typing_at_several_cursors() {
        let mut buffer = BufferEditor::new("a b");
        buffer.set_selections(vec![
            Selection::cursor(Position::new(0, 0)),
            Selection::cursor(Position::new(0, 2)),
        ]);
        let deltas = buffer.type_text("xy");
        assert_eq!(buffer.text(), "xya xyb");
        assert_eq!(deltas.len(), 2);
        assert_eq!(
            buffer.selections(),
            vec![
                Selection::cursor(Position::new(0, 2)),
                Selection::cursor(Position::new(0, 6)),
            ]
        );
    }

    #[test]
    fn selections_follow_external_edits() {
        let mut buffer = BufferEditor::new("hello world");
        buffer.set_cursor(Position::new(0, 8));
        buffer.replace(Range::empty(Position::new(0, 0)), ">> ");
        assert_eq!(buffer.cursor(), Position::new(0, 11));
        buffer.replace(Range::empty(Position::new(0, 11)), "!");
        assert_eq!(buffer.cursor(), Position::new(0, 11));
    }

    #[test]
    fn empty_buffer() {
        let mut buffer = BufferEditor::new("ab");
        assert!(!buffer.is_empty());
        buffer.replace(Range::new(Position::new(0, 0), Position::new(0, 2)), "");
        assert!(buffer.is_empty());
    }
}
