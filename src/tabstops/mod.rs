//! Interactive editing of an expanded snippet.
//!
//! The [`TabstopManager`] tracks the tabstops of the snippets inserted in one editor, moves
//! the selection between them and keeps mirrors in sync with what the user types. It never
//! talks to the editor on its own: the host forwards its events to [`TabstopManager::handle`].

use crate::host::{Delta, DeltaAction, EditorEvent, EditorHost, EventKind, Position, Range, Selection};
use crate::options::TabstopOptions;
use crate::snippets::{TabstopGroup, VariableResolver};

mod range;

pub use range::TrackedRange;

/// The events a manager listens to while attached
const SUBSCRIPTIONS: [EventKind; 4] = [
    EventKind::Change,
    EventKind::ChangeSelection,
    EventKind::ChangeSession,
    EventKind::AfterExec,
];

/// All the occurrences of one tabstop of one inserted snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tabstop {
    /// Unique in the manager, unlike `id` which repeats for nested snippets
    key: usize,
    id: usize,
    ranges: Vec<TrackedRange>,
    choices: Option<Vec<String>>,
    /// Keys of the tabstops this one is nested in
    parents: Vec<usize>,
}

impl Tabstop {
    pub fn key(&self) -> usize {
        self.key
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ranges(&self) -> &[TrackedRange] {
        &self.ranges
    }

    pub fn choices(&self) -> Option<&[String]> {
        self.choices.as_deref()
    }

    /// The occurrence the user edits, the others being derived from it
    pub fn primary(&self) -> Option<&TrackedRange> {
        self.ranges.iter().find(|r| !r.linked)
    }

    pub fn has_linked_ranges(&self) -> bool {
        self.ranges.iter().any(|r| r.linked)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TabstopManager {
    /// In navigation order. Index 0 is the final tabstop of the first snippet.
    tabstops: Vec<Tabstop>,
    index: usize,
    selected: Option<usize>,
    subscriptions: Vec<EventKind>,
    options: TabstopOptions,
    resolver: VariableResolver,
    next_key: usize,
    /// Set while the manager writes mirrors, so its own edits don't end the session
    in_change: bool,
    /// The mirror being rewritten, which takes the text inserted at its edges
    editing: Option<usize>,
}

impl TabstopManager {
    pub fn new(options: TabstopOptions, resolver: VariableResolver) -> Self {
        Self {
            options,
            resolver,
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    pub fn subscriptions(&self) -> &[EventKind] {
        &self.subscriptions
    }

    pub fn tabstops(&self) -> &[Tabstop] {
        &self.tabstops
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn selected(&self) -> Option<&Tabstop> {
        let key = self.selected?;
        self.tabstops.iter().find(|t| t.key == key)
    }

    pub fn resolver_mut(&mut self) -> &mut VariableResolver {
        &mut self.resolver
    }

    /// Starts a session. Does nothing if one is already running.
    pub fn attach<H: EditorHost>(&mut self, host: &mut H) {
        if self.is_active() {
            return;
        }
        self.tabstops.clear();
        self.index = 0;
        self.selected = None;
        self.subscriptions = SUBSCRIPTIONS.to_vec();
        host.bind_tabstop_commands(true);
    }

    /// Ends the session, removing every marker. Does nothing if no session is running.
    pub fn detach<H: EditorHost>(&mut self, host: &mut H) {
        if !self.is_active() {
            return;
        }
        #[cfg(feature = "debug")]
        log::debug!("[TabstopManager::detach] ending session of {} tabstops", self.tabstops.len());
        for tabstop in &mut self.tabstops {
            for range in &mut tabstop.ranges {
                if let Some(marker) = range.marker.take() {
                    host.remove_marker(marker);
                }
            }
        }
        self.tabstops.clear();
        self.index = 0;
        self.selected = None;
        self.subscriptions.clear();
        self.in_change = false;
        host.bind_tabstop_commands(false);
    }

    /// Tracks the tabstops of a snippet inserted at `origin`.
    ///
    /// `groups` is in navigation order with the final tabstop last. When a session is
    /// already running, they're placed right after the selected tabstop so the next tab
    /// goes through the new snippet first.
    pub fn add_tabstops<H: EditorHost>(&mut self, host: &mut H, groups: &[TabstopGroup], origin: Position) {
        let first_key = self.next_key;
        let key_of = |position: usize| first_key + position;
        self.next_key += groups.len();

        let mut batch: Vec<Tabstop> = Vec::with_capacity(groups.len());
        for (position, group) in groups.iter().enumerate() {
            let mut tabstop = Tabstop {
                key: key_of(position),
                id: group.id,
                ranges: Vec::with_capacity(group.ranges.len()),
                choices: group.choices.clone(),
                parents: group
                    .parents
                    .iter()
                    .filter_map(|id| groups.iter().position(|g| g.id == *id).map(key_of))
                    .collect(),
            };

            for range in &group.ranges {
                let linked = range.transform.is_some()
                    || (self.options.link_mirrors && tabstop.primary().is_some());
                let bounds = Range::new(range.start.offset_by(origin), range.end.offset_by(origin));
                let mut tracked = TrackedRange::new(self.next_key, bounds, linked, range.transform.clone());
                self.next_key += 1;
                tracked.marker = Some(host.add_marker(bounds));
                tabstop.ranges.push(tracked);
            }
            batch.push(tabstop);
        }

        // the final tabstop of the first snippet is where the session ends
        if self.tabstops.is_empty()
            && let Some(last) = batch.pop()
        {
            batch.insert(0, last);
        }
        let at = (self.index + 1).min(self.tabstops.len());
        self.tabstops.splice(at..at, batch);
    }

    /// Moves to the next tabstop, or the previous one when `direction` is negative.
    /// Reaching the final tabstop ends the session.
    pub fn tab_next<H: EditorHost>(&mut self, host: &mut H, direction: isize) {
        let count = self.tabstops.len();
        if !self.is_active() || count == 0 {
            return;
        }
        let mut index = self
            .index
            .saturating_add_signed(if direction == 0 { 1 } else { direction })
            .clamp(1, count);
        if index == count {
            index = 0;
        }
        self.select_tabstop(host, index);
        if index == 0 {
            self.detach(host);
        }
    }

    /// Selects every editable occurrence of the tabstop at `index`
    pub fn select_tabstop<H: EditorHost>(&mut self, host: &mut H, index: usize) {
        self.index = index;
        let Some(tabstop) = self.tabstops.get(index) else {
            return;
        };
        let Some(primary) = tabstop.primary().or(tabstop.ranges.first()) else {
            return;
        };
        self.selected = Some(tabstop.key);

        let mut selections = vec![if tabstop.choices.is_some() {
            Selection {
                anchor: primary.range.end,
                lead: primary.range.start,
            }
        } else {
            Selection::range(primary.range)
        }];
        selections.extend(
            tabstop
                .ranges
                .iter()
                .filter(|r| !r.linked && r.key != primary.key)
                .map(|r| Selection::range(r.range)),
        );
        host.set_selections(selections);

        if let Some(choices) = &tabstop.choices {
            host.start_autocomplete(choices);
        }
    }

    /// Dispatches an editor event to the matching handler, if subscribed to it
    pub fn handle<H: EditorHost>(&mut self, host: &mut H, event: &EditorEvent) {
        if !self.subscriptions.contains(&event.kind()) {
            return;
        }
        match event {
            EditorEvent::Change(delta) => self.on_change(host, delta),
            EditorEvent::ChangeSelection => self.on_change_selection(host),
            EditorEvent::ChangeSession => self.detach(host),
            EditorEvent::AfterExec { read_only } => {
                if !read_only {
                    self.update_linked_fields(host);
                }
            }
        }
    }

    fn on_change<H: EditorHost>(&mut self, host: &mut H, delta: &Delta) {
        let selected = self.selected;
        let parents = self.selected().map(|t| t.parents.clone()).unwrap_or_default();
        let removed = delta.range();
        let editing = self.editing;
        let mut dropped = Vec::new();

        for tabstop in &mut self.tabstops {
            let is_parent = parents.contains(&tabstop.key);
            let active = selected == Some(tabstop.key) || is_parent;
            let owner = match delta.action {
                DeltaAction::Insert if active => edge_owner(&tabstop.ranges, delta.start, editing),
                _ => None,
            };

            if delta.action == DeltaAction::Remove && selected != Some(tabstop.key) {
                for range in &tabstop.ranges {
                    let swallowed = if is_parent {
                        removed.contains(range.range.start)
                            && removed.contains(range.range.end)
                            && range.range != removed
                    } else {
                        range.range.is_strictly_inside(&removed)
                    };
                    if swallowed {
                        dropped.push(range.key);
                    }
                }
            }

            for range in &mut tabstop.ranges {
                let absorbing = active && owner.is_none_or(|key| key == range.key);
                if range.shift(delta, absorbing)
                    && let Some(marker) = range.marker
                {
                    host.update_marker(marker, range.range);
                }
            }
        }

        for key in dropped {
            self.remove_range(host, key);
        }

        if !self.in_change && delta.action == DeltaAction::Remove && host.is_empty() {
            #[cfg(feature = "debug")]
            log::debug!("[TabstopManager::on_change] buffer is empty");
            self.detach(host);
        }
    }

    fn on_change_selection<H: EditorHost>(&mut self, host: &mut H) {
        let selection = host.selection();
        let empty = selection.is_empty();
        let inside = self.tabstops.iter().flat_map(|t| &t.ranges).any(|r| {
            !r.linked
                && r.range.contains(selection.lead)
                && (empty || r.range.contains(selection.anchor))
        });
        if !inside {
            #[cfg(feature = "debug")]
            log::debug!("[TabstopManager::on_change_selection] selection left the tabstops");
            self.detach(host);
        }
    }

    /// Stops tracking a range, dropping its tabstop once it has no range left.
    /// Unknown keys are ignored.
    pub fn remove_range<H: EditorHost>(&mut self, host: &mut H, key: usize) {
        let Some(index) = self
            .tabstops
            .iter()
            .position(|t| t.ranges.iter().any(|r| r.key == key))
        else {
            return;
        };
        let tabstop = &mut self.tabstops[index];
        tabstop.ranges.retain_mut(|r| {
            if r.key != key {
                return true;
            }
            if let Some(marker) = r.marker.take() {
                host.remove_marker(marker);
            }
            false
        });

        if tabstop.ranges.is_empty() {
            let removed = self.tabstops.remove(index);
            if self.selected == Some(removed.key) {
                self.selected = None;
            }
            if index < self.index {
                self.index -= 1;
            }
            if self.tabstops.is_empty() {
                self.detach(host);
            }
        }
    }

    /// Rewrites the mirrors of the selected tabstop from its primary occurrence
    pub fn update_linked_fields<H: EditorHost>(&mut self, host: &mut H) {
        let Some(tabstop) = self.selected() else {
            return;
        };
        if !tabstop.has_linked_ranges() {
            return;
        }
        let Some(primary) = tabstop.primary() else {
            return;
        };
        let text = host.text_range(primary.range);
        let mirrors: Vec<_> = tabstop
            .ranges
            .iter()
            .filter(|r| r.linked)
            .map(|r| (r.key, r.transform.clone()))
            .collect();

        self.in_change = true;
        for (key, transform) in mirrors {
            let Some(range) = self.find_range(key).map(|r| r.range) else {
                continue;
            };
            let value = match &transform {
                Some(transform) => self.resolver.apply_transform(transform, &text, &*host),
                None => text.clone(),
            };
            if host.text_range(range) == value {
                continue;
            }
            self.editing = Some(key);
            for delta in host.replace(range, &value) {
                self.on_change(host, &delta);
            }
            self.editing = None;
            if let Some(tracked) = self.find_range_mut(key) {
                tracked.range = Range::new(range.start, range.start.advance(&value));
                if let Some(marker) = tracked.marker {
                    host.update_marker(marker, tracked.range);
                }
            }
        }
        self.in_change = false;
    }

    fn find_range(&self, key: usize) -> Option<&TrackedRange> {
        self.tabstops
            .iter()
            .flat_map(|t| &t.ranges)
            .find(|r| r.key == key)
    }

    fn find_range_mut(&mut self, key: usize) -> Option<&mut TrackedRange> {
        self.tabstops
            .iter_mut()
            .flat_map(|t| &mut t.ranges)
            .find(|r| r.key == key)
    }
}

/// When text is inserted where one range of a group ends and another one starts, only one
/// of them may take it: the mirror being rewritten, else an editable range, else the first
/// range.
fn edge_owner(ranges: &[TrackedRange], at: Position, editing: Option<usize>) -> Option<usize> {
    let touching: Vec<&TrackedRange> = ranges
        .iter()
        .filter(|r| r.range.start == at || r.range.end == at)
        .collect();
    let shared = touching.iter().any(|a| {
        a.range.end == at && touching.iter().any(|b| b.key != a.key && b.range.start == at)
    });
    if !shared {
        return None;
    }
    touching
        .iter()
        .find(|r| Some(r.key) == editing)
        .or_else(|| touching.iter().find(|r| !r.linked))
        .or_else(|| touching.iter().min_by_key(|r| (r.range.start, r.range.end)))
        .map(|r| r.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferEditor;
    use crate::options::InsertOptions;
    use crate::snippets::SnippetExpander;

    /// Inserts a snippet at the cursor and selects its first tabstop
    fn insert(manager: &mut TabstopManager, buffer: &mut BufferEditor, template: &str) {
        let expanded = SnippetExpander::new(VariableResolver::default())
            .unwrap()
            .expand(template, &*buffer, &InsertOptions::default());
        let range = buffer.selection().to_range();
        let deltas = buffer.replace(range, &expanded.text);
        for delta in &deltas {
            manager.handle(buffer, &EditorEvent::Change(delta.clone()));
        }
        manager.attach(buffer);
        manager.add_tabstops(buffer, &expanded.tabstops, range.start);
        manager.tab_next(buffer, 1);
    }

    fn type_text(manager: &mut TabstopManager, buffer: &mut BufferEditor, text: &str) {
        for delta in buffer.type_text(text) {
            manager.handle(buffer, &EditorEvent::Change(delta));
        }
        manager.handle(buffer, &EditorEvent::AfterExec { read_only: false });
        manager.handle(buffer, &EditorEvent::ChangeSelection);
    }

    fn cursor(row: usize, column: usize) -> Vec<Selection> {
        vec![Selection::cursor(Position::new(row, column))]
    }

    #[test]
    fn tab_goes_through_tabstops_then_ends() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "a$1b$2c");
        assert_eq!(buffer.text(), "abc");
        assert!(buffer.commands_bound());
        assert_eq!(manager.selected().map(|t| t.id()), Some(1));
        assert_eq!(buffer.selections(), cursor(0, 1));

        manager.tab_next(&mut buffer, 1);
        assert_eq!(manager.selected().map(|t| t.id()), Some(2));
        assert_eq!(buffer.selections(), cursor(0, 2));

        manager.tab_next(&mut buffer, 1);
        assert_eq!(buffer.selections(), cursor(0, 3));
        assert!(!manager.is_active());
        assert!(manager.subscriptions().is_empty());
        assert!(!buffer.commands_bound());
        assert_eq!(buffer.markers().count(), 0);
    }

    #[test]
    fn shift_tab_stops_at_the_first_tabstop() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:x} ${2:y}");
        manager.tab_next(&mut buffer, 1);
        manager.tab_next(&mut buffer, -1);
        manager.tab_next(&mut buffer, -1);
        assert_eq!(manager.selected().map(|t| t.id()), Some(1));
        assert_eq!(
            buffer.selection(),
            Selection::range(Range::new(Position::new(0, 0), Position::new(0, 1)))
        );
        assert!(manager.is_active());
    }

    #[test]
    fn snippet_without_tabstops_ends_right_away() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "done\nhere");
        assert_eq!(buffer.selections(), cursor(1, 4));
        assert!(!manager.is_active());
    }

    #[test]
    fn mirrors_follow_the_primary() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:foo} $1;$0");
        assert_eq!(buffer.text(), "foo foo;");

        type_text(&mut manager, &mut buffer, "bar");
        assert_eq!(buffer.text(), "bar bar;");
        type_text(&mut manager, &mut buffer, "ista");
        assert_eq!(buffer.text(), "barista barista;");
        assert!(manager.is_active());

        manager.tab_next(&mut buffer, 1);
        assert_eq!(buffer.selections(), cursor(0, 16));
    }

    #[test]
    fn mirror_right_after_its_placeholder() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:foo}$1");
        assert_eq!(buffer.text(), "foofoo");

        type_text(&mut manager, &mut buffer, "x");
        assert_eq!(buffer.text(), "xx");
        type_text(&mut manager, &mut buffer, "yz");
        assert_eq!(buffer.text(), "xyzxyz");
        assert!(manager.is_active());

        let ranges: Vec<Range> = manager
            .selected()
            .unwrap()
            .ranges()
            .iter()
            .map(|r| r.range())
            .collect();
        assert_eq!(
            ranges,
            vec![
                Range::new(Position::new(0, 0), Position::new(0, 3)),
                Range::new(Position::new(0, 3), Position::new(0, 6)),
            ]
        );
        manager.tab_next(&mut buffer, 1);
        assert_eq!(buffer.selections(), cursor(0, 6));
    }

    #[test]
    fn empty_placeholder_and_mirror_at_the_same_spot() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "$1$1");
        assert_eq!(buffer.text(), "");
        type_text(&mut manager, &mut buffer, "ab");
        assert_eq!(buffer.text(), "abab");
        assert_eq!(buffer.selections(), cursor(0, 2));
    }

    #[test]
    fn transformed_mirrors() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:foo} ${1/(.*)/${1:/upcase}/}");
        assert_eq!(buffer.text(), "foo FOO");
        type_text(&mut manager, &mut buffer, "bar");
        assert_eq!(buffer.text(), "bar BAR");
    }

    #[test]
    fn unlinked_mirrors_are_selected_together() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::new(
            TabstopOptions::default().link_mirrors(false),
            VariableResolver::default(),
        );
        insert(&mut manager, &mut buffer, "${1:x} $1");
        assert_eq!(buffer.selections().len(), 2);
        type_text(&mut manager, &mut buffer, "ab");
        assert_eq!(buffer.text(), "ab ab");
        assert!(manager.is_active());
    }

    #[test]
    fn choices_open_the_completion_popup() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1|red,green,blue|}");
        assert_eq!(buffer.completions(), ["red", "green", "blue"]);
        assert_eq!(buffer.selection().lead, Position::new(0, 0));
    }

    #[test]
    fn leaving_the_tabstops_ends_the_session() {
        let mut buffer = BufferEditor::new("let x;\n");
        let mut manager = TabstopManager::default();
        buffer.set_cursor(Position::new(1, 0));
        insert(&mut manager, &mut buffer, "${1:a} + ${2:b}");

        manager.handle(&mut buffer, &EditorEvent::ChangeSelection);
        assert!(manager.is_active());

        buffer.set_cursor(Position::new(0, 2));
        manager.handle(&mut buffer, &EditorEvent::ChangeSelection);
        assert!(!manager.is_active());
        assert_eq!(buffer.markers().count(), 0);
    }

    #[test]
    fn emptying_the_buffer_ends_the_session() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:a}\n$2");
        let all = Range::new(Position::new(0, 0), Position::new(1, 0));
        for delta in buffer.replace(all, "") {
            manager.handle(&mut buffer, &EditorEvent::Change(delta));
        }
        assert!(!manager.is_active());
    }

    #[test]
    fn session_change_ends_the_session() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "$1 $2");
        manager.handle(&mut buffer, &EditorEvent::ChangeSession);
        assert!(!manager.is_active());
        // nothing to do once detached
        manager.detach(&mut buffer);
        manager.handle(&mut buffer, &EditorEvent::ChangeSession);
    }

    #[test]
    fn deleting_over_a_tabstop_drops_it() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:a}(${2:b})$0");
        assert_eq!(manager.tabstops().len(), 3);

        let parens = Range::new(Position::new(0, 1), Position::new(0, 4));
        for delta in buffer.replace(parens, "") {
            manager.handle(&mut buffer, &EditorEvent::Change(delta));
        }
        assert_eq!(buffer.text(), "a");
        let ids: Vec<_> = manager.tabstops().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(buffer.markers().count(), 2);
    }

    #[test]
    fn removing_ranges_twice_is_harmless() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "$1 $2");
        let key = manager.tabstops()[2].ranges()[0].key();
        manager.remove_range(&mut buffer, key);
        manager.remove_range(&mut buffer, key);
        let ids: Vec<_> = manager.tabstops().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![0, 1]);

        for key in [0, 1, 2, 3, 4, 5] {
            manager.remove_range(&mut buffer, key);
        }
        assert!(!manager.is_active());
    }

    #[test]
    fn nested_snippets_are_visited_first() {
        let mut buffer = BufferEditor::default();
        let mut manager = TabstopManager::default();
        insert(&mut manager, &mut buffer, "${1:x}, $2");
        insert(&mut manager, &mut buffer, "[${1:y}]");
        assert_eq!(buffer.text(), "[y], ");
        assert_eq!(manager.selected().map(|t| t.id()), Some(1));
        assert_eq!(
            buffer.selection(),
            Selection::range(Range::new(Position::new(0, 1), Position::new(0, 2)))
        );

        let ids: Vec<_> = manager.tabstops().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![0, 1, 1, 0, 2]);

        manager.tab_next(&mut buffer, 1);
        assert_eq!(buffer.selections(), cursor(0, 3));
        manager.tab_next(&mut buffer, 1);
        assert_eq!(buffer.selections(), cursor(0, 5));
        manager.tab_next(&mut buffer, 1);
        assert!(!manager.is_active());
    }
}
