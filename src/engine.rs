use crate::error::TesseraResult;
use crate::host::{EditorEvent, EditorHost, Position, Range, Selection};
use crate::options::{InsertOptions, TabstopOptions};
use crate::snippets::{
    ExpandedSnippet, SnippetDefinition, SnippetExpander, SnippetRegistry, VariableResolver,
};
use crate::tabstops::TabstopManager;

/// The commands a host binds to keys while a snippet session is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabstopCommand {
    /// Expands the snippet before the cursor if any, moves to the next tabstop otherwise
    Next,
    Previous,
    /// Ends the session
    Cancel,
}

impl TabstopCommand {
    pub const ALL: [TabstopCommand; 3] = [
        TabstopCommand::Next,
        TabstopCommand::Previous,
        TabstopCommand::Cancel,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            TabstopCommand::Next => "snippet.tab_next",
            TabstopCommand::Previous => "snippet.tab_previous",
            TabstopCommand::Cancel => "snippet.cancel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Inserts snippets in an editor and runs the tabstop session that follows
#[derive(Debug, Clone)]
pub struct SnippetEngine {
    snippets: SnippetRegistry,
    expander: SnippetExpander,
    tabstops: TabstopManager,
    options: TabstopOptions,
}

impl SnippetEngine {
    pub fn new() -> TesseraResult<Self> {
        Self::with_options(TabstopOptions::default())
    }

    pub fn with_options(options: TabstopOptions) -> TesseraResult<Self> {
        Ok(Self {
            snippets: SnippetRegistry::default(),
            expander: SnippetExpander::new(VariableResolver::default())?,
            tabstops: TabstopManager::new(options, VariableResolver::default()),
            options,
        })
    }

    pub fn with_resolver(mut self, resolver: VariableResolver) -> Self {
        *self.expander.resolver_mut() = resolver;
        self
    }

    pub fn snippets(&self) -> &SnippetRegistry {
        &self.snippets
    }

    pub fn snippets_mut(&mut self) -> &mut SnippetRegistry {
        &mut self.snippets
    }

    pub fn resolver_mut(&mut self) -> &mut VariableResolver {
        self.expander.resolver_mut()
    }

    pub fn tabstops(&self) -> &TabstopManager {
        &self.tabstops
    }

    pub fn register_snippets(
        &mut self,
        definitions: impl IntoIterator<Item = SnippetDefinition>,
        scope: Option<&str>,
    ) -> TesseraResult<()> {
        self.snippets.register(definitions, scope)
    }

    /// Replaces the selection with the expanded snippet and selects its first tabstop.
    /// Inserting while a session is running nests the new snippet in it.
    pub fn insert_snippet<H: EditorHost>(
        &mut self,
        host: &mut H,
        template: &str,
        options: &InsertOptions,
    ) -> ExpandedSnippet {
        let range = host.selection().to_range();
        let expanded = self.expander.expand(template, &*host, options);
        if options.dry_run {
            return expanded;
        }

        for delta in host.replace(range, &expanded.text) {
            self.tabstops.handle(host, &EditorEvent::Change(delta));
        }
        if !self.tabstops.is_active() {
            self.tabstops = TabstopManager::new(self.options, VariableResolver::default());
            self.tabstops.attach(host);
        }
        *self.tabstops.resolver_mut() = self.expander.resolver().clone();
        self.tabstops.add_tabstops(host, &expanded.tabstops, range.start);
        self.tabstops.tab_next(host, 1);
        expanded
    }

    /// Expands the snippet whose trigger is right before the cursor.
    /// Returns whether one was found.
    pub fn expand_with_tab<H: EditorHost>(&mut self, host: &mut H, options: &InsertOptions) -> bool {
        let cursor = host.cursor();
        let line = host.line(cursor.row).unwrap_or_default();
        let split = line
            .char_indices()
            .nth(cursor.column)
            .map(|(i, _)| i)
            .unwrap_or(line.len());
        let (before, after) = line.split_at(split);

        let scopes = self.snippets.active_scopes(host.mode_id());
        let Some(found) = self.snippets.find_trigger(&scopes, before, after) else {
            return false;
        };
        if options.dry_run {
            return true;
        }
        #[cfg(feature = "debug")]
        log::debug!(
            "[SnippetEngine::expand_with_tab] expanding {:?}",
            found.snippet.name()
        );

        let start = Position::new(
            cursor.row,
            cursor.column - found.replace_before.chars().count(),
        );
        let end = Position::new(
            cursor.row,
            cursor.column + found.replace_after.chars().count(),
        );
        for delta in host.replace(Range::new(start, end), "") {
            self.tabstops.handle(host, &EditorEvent::Change(delta));
        }
        host.set_selections(vec![Selection::cursor(start)]);

        let resolver = self.expander.resolver_mut();
        resolver.set_trigger_captures(&found.before_captures, &found.after_captures);
        self.insert_snippet(host, found.snippet.content(), options);
        self.expander.resolver_mut().clear_trigger_captures();
        true
    }

    /// Runs one of the tabstop commands, returning whether it did anything
    pub fn exec_command<H: EditorHost>(&mut self, host: &mut H, command: TabstopCommand) -> bool {
        match command {
            TabstopCommand::Next => {
                if self.expand_with_tab(host, &InsertOptions::default()) {
                    return true;
                }
                if !self.tabstops.is_active() {
                    return false;
                }
                self.tabstops.tab_next(host, 1);
            }
            TabstopCommand::Previous => {
                if !self.tabstops.is_active() {
                    return false;
                }
                self.tabstops.tab_next(host, -1);
            }
            TabstopCommand::Cancel => {
                if !self.tabstops.is_active() {
                    return false;
                }
                self.tabstops.detach(host);
            }
        }
        true
    }

    /// Forwards an editor event to the running session
    pub fn handle<H: EditorHost>(&mut self, host: &mut H, event: &EditorEvent) {
        self.tabstops.handle(host, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferEditor;
    use crate::snippets::SnippetContext;

    fn type_text(engine: &mut SnippetEngine, buffer: &mut BufferEditor, text: &str) {
        for delta in buffer.type_text(text) {
            engine.handle(buffer, &EditorEvent::Change(delta));
        }
        engine.handle(buffer, &EditorEvent::AfterExec { read_only: false });
        engine.handle(buffer, &EditorEvent::ChangeSelection);
    }

    fn selected(buffer: &BufferEditor) -> ((usize, usize), (usize, usize)) {
        let range = buffer.selection().to_range();
        (
            (range.start.row, range.start.column),
            (range.end.row, range.end.column),
        )
    }

    #[test]
    fn for_loop_session() {
        let mut buffer = BufferEditor::new("").with_tabs(false, 4);
        let mut engine = SnippetEngine::new().unwrap();
        let expanded = engine.insert_snippet(
            &mut buffer,
            "for (let ${1:i} = 0; $1 < ${2:n}; $1++) {\n\t$0\n}",
            &InsertOptions::default(),
        );
        assert_eq!(expanded.navigation_order(), vec![1, 2, 0]);
        assert_eq!(buffer.text(), "for (let i = 0; i < n; i++) {\n\t\n}");
        assert_eq!(selected(&buffer), ((0, 9), (0, 10)));

        type_text(&mut engine, &mut buffer, "idx");
        assert_eq!(buffer.text(), "for (let idx = 0; idx < n; idx++) {\n\t\n}");

        assert!(engine.exec_command(&mut buffer, TabstopCommand::Next));
        assert_eq!(selected(&buffer), ((0, 24), (0, 25)));
        assert!(engine.exec_command(&mut buffer, TabstopCommand::Next));
        assert_eq!(selected(&buffer), ((1, 1), (1, 1)));
        assert!(!engine.tabstops().is_active());
        assert!(!engine.exec_command(&mut buffer, TabstopCommand::Next));
    }

    #[test]
    fn dry_run_leaves_the_buffer_alone() {
        let mut buffer = BufferEditor::new("abc");
        let mut engine = SnippetEngine::new().unwrap();
        let expanded = engine.insert_snippet(
            &mut buffer,
            "${1:x} $TM_LINE_NUMBER",
            &InsertOptions::default().dry_run(true),
        );
        assert_eq!(expanded.text, "x 1");
        assert_eq!(buffer.text(), "abc");
        assert!(!engine.tabstops().is_active());
    }

    #[test]
    fn selection_is_replaced() {
        let mut buffer = BufferEditor::new("call(value)");
        buffer.select(Range::new(Position::new(0, 5), Position::new(0, 10)));
        let mut engine = SnippetEngine::new().unwrap();
        engine.insert_snippet(&mut buffer, "Some($SELECTION)", &InsertOptions::default());
        assert_eq!(buffer.text(), "call(Some(value))");
        assert_eq!(buffer.cursor(), Position::new(0, 16));
    }

    #[test]
    fn tab_triggers() {
        let mut buffer = BufferEditor::new("  fn").with_mode("rust");
        buffer.set_cursor(Position::new(0, 4));
        let mut engine = SnippetEngine::new().unwrap();
        engine
            .register_snippets(
                vec![SnippetDefinition::new("fn", "fn ${1:name}() {}")],
                Some("rust"),
            )
            .unwrap();

        assert!(engine.expand_with_tab(&mut buffer, &InsertOptions::default().dry_run(true)));
        assert_eq!(buffer.text(), "  fn");

        assert!(engine.expand_with_tab(&mut buffer, &InsertOptions::default()));
        assert_eq!(buffer.text(), "  fn name() {}");
        assert_eq!(selected(&buffer), ((0, 5), (0, 9)));

        let mut other = BufferEditor::new("  fn").with_mode("python");
        other.set_cursor(Position::new(0, 4));
        assert!(!engine.expand_with_tab(&mut other, &InsertOptions::default()));
    }

    #[test]
    fn regex_triggers_fill_match_variables() {
        let mut buffer = BufferEditor::new("foo.log");
        buffer.set_cursor(Position::new(0, 7));
        let mut engine = SnippetEngine::new().unwrap();
        let definition = SnippetDefinition {
            name: Some("log".to_owned()),
            trigger: Some(r"(\w+)\.log".to_owned()),
            content: "console.log($M1)".to_owned(),
            ..Default::default()
        };
        engine.register_snippets(vec![definition], None).unwrap();

        assert!(engine.exec_command(&mut buffer, TabstopCommand::Next));
        assert_eq!(buffer.text(), "console.log(foo)");
        assert_eq!(buffer.cursor(), Position::new(0, 16));
    }

    #[test]
    fn snippets_nest_in_a_running_session() {
        let mut buffer = BufferEditor::default();
        let mut engine = SnippetEngine::new().unwrap();
        engine
            .register_snippets(vec![SnippetDefinition::new("sq", "[$1]")], None)
            .unwrap();
        engine.insert_snippet(&mut buffer, "(${1:a}, $2)", &InsertOptions::default());
        type_text(&mut engine, &mut buffer, "sq");
        assert_eq!(buffer.text(), "(sq, )");

        assert!(engine.exec_command(&mut buffer, TabstopCommand::Next));
        assert_eq!(buffer.text(), "([], )");
        assert_eq!(selected(&buffer), ((0, 2), (0, 2)));

        engine.exec_command(&mut buffer, TabstopCommand::Next);
        assert_eq!(selected(&buffer), ((0, 3), (0, 3)));
        engine.exec_command(&mut buffer, TabstopCommand::Next);
        assert_eq!(selected(&buffer), ((0, 5), (0, 5)));
        engine.exec_command(&mut buffer, TabstopCommand::Next);
        assert_eq!(selected(&buffer), ((0, 6), (0, 6)));
        assert!(!engine.tabstops().is_active());
    }

    #[test]
    fn cancel_and_previous() {
        let mut buffer = BufferEditor::default();
        let mut engine = SnippetEngine::new().unwrap();
        engine.insert_snippet(&mut buffer, "${1:a} ${2:b}", &InsertOptions::default());
        assert!(engine.exec_command(&mut buffer, TabstopCommand::Next));
        assert!(engine.exec_command(&mut buffer, TabstopCommand::Previous));
        assert_eq!(selected(&buffer), ((0, 0), (0, 1)));
        assert!(engine.exec_command(&mut buffer, TabstopCommand::Cancel));
        assert!(!engine.tabstops().is_active());
        assert!(!buffer.commands_bound());
        assert!(!engine.exec_command(&mut buffer, TabstopCommand::Cancel));
    }

    #[test]
    fn command_names() {
        for command in TabstopCommand::ALL {
            assert_eq!(TabstopCommand::from_name(command.name()), Some(command));
        }
        assert_eq!(TabstopCommand::from_name("snippet.unknown"), None);
    }
}
