use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Local};

use crate::host::Position;
use crate::snippets::transform::Transform;
use crate::snippets::{SnippetToken, closing_index};

/// The editor state snippet variables are computed from
pub trait SnippetContext {
    /// Text of a line, without its terminator
    fn line(&self, row: usize) -> Option<&str>;

    fn cursor(&self) -> Position;

    fn selected_text(&self) -> String {
        String::new()
    }

    /// The word the cursor is in or touching
    fn current_word(&self) -> String {
        let cursor = self.cursor();
        let Some(line) = self.line(cursor.row) else {
            return String::new();
        };
        let chars: Vec<char> = line.chars().collect();
        let is_word = |c: &char| c.is_alphanumeric() || *c == '_';
        let column = cursor.column.min(chars.len());
        let start = chars[..column]
            .iter()
            .rposition(|c| !is_word(c))
            .map(|i| i + 1)
            .unwrap_or(0);
        let end = chars[column..]
            .iter()
            .position(|c| !is_word(c))
            .map(|i| column + i)
            .unwrap_or(chars.len());
        chars[start..end].iter().collect()
    }

    fn soft_tabs(&self) -> bool {
        true
    }

    fn tab_size(&self) -> usize {
        4
    }

    /// What a `\t` in a snippet turns into
    fn tab_string(&self) -> String {
        if self.soft_tabs() {
            " ".repeat(self.tab_size())
        } else {
            "\t".to_owned()
        }
    }

    fn clipboard_text(&self) -> Option<String> {
        None
    }

    fn file_path(&self) -> Option<String> {
        None
    }

    fn workspace_name(&self) -> Option<String> {
        None
    }

    fn full_name(&self) -> Option<String> {
        None
    }

    /// Start and end of a block comment in the current language
    fn block_comment(&self) -> Option<(String, String)> {
        None
    }

    fn line_comment(&self) -> Option<String> {
        None
    }
}

/// Leading whitespace of the text
fn indentation(text: &str) -> &str {
    let end = text
        .find(|c: char| !c.is_whitespace())
        .unwrap_or(text.len());
    &text[..end]
}

/// Computes the value of snippet variables and substitutes them in parsed snippets.
///
/// Variables can be written with or without their `TM_` prefix. Unknown variables are
/// empty.
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    custom: BTreeMap<String, String>,
    /// Fixed time for the date variables, the current time otherwise
    clock: Option<DateTime<Local>>,
}

impl VariableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, now: DateTime<Local>) -> Self {
        self.clock = Some(now);
        self
    }

    /// Registers a variable. It takes precedence over the built-in one of the same name.
    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) {
        let name = name.strip_prefix("TM_").unwrap_or(name);
        self.custom.insert(name.to_owned(), value.into());
    }

    pub fn remove_variable(&mut self, name: &str) {
        let name = name.strip_prefix("TM_").unwrap_or(name);
        self.custom.remove(name);
    }

    /// Exposes the groups of a trigger match as `M0`, `M1`, ... (text before the cursor)
    /// and `T0`, `T1`, ... (text after the cursor).
    pub fn set_trigger_captures(&mut self, before: &[String], after: &[String]) {
        self.clear_trigger_captures();
        for (i, group) in before.iter().enumerate() {
            self.custom.insert(format!("M{i}"), group.clone());
        }
        for (i, group) in after.iter().enumerate() {
            self.custom.insert(format!("T{i}"), group.clone());
        }
    }

    pub fn clear_trigger_captures(&mut self) {
        self.custom.retain(|name, _| {
            let mut chars = name.chars();
            let is_capture = matches!(chars.next(), Some('M' | 'T'))
                && !chars.as_str().is_empty()
                && chars.all(|c| c.is_ascii_digit());
            !is_capture
        });
    }

    fn now(&self) -> DateTime<Local> {
        self.clock.unwrap_or_else(Local::now)
    }

    /// Value of a variable. `indentation` is what the lines of a multi-line selection are
    /// prefixed with.
    pub fn value(&self, ctx: &dyn SnippetContext, name: &str, indentation: &str) -> String {
        let name = name.strip_prefix("TM_").unwrap_or(name);
        if let Some(value) = self.custom.get(name) {
            return value.clone();
        }

        let cursor = ctx.cursor();
        let path = ctx.file_path();
        let path = path.as_deref().map(Path::new);
        let date = |fmt: &str| self.now().format(fmt).to_string();

        match name {
            "SELECTION" | "SELECTED_TEXT" => {
                let text = ctx.selected_text();
                if indentation.is_empty() {
                    text
                } else {
                    text.replace('\n', &format!("\n{indentation}"))
                }
            }
            "CURRENT_WORD" => ctx.current_word(),
            "CURRENT_LINE" => ctx.line(cursor.row).unwrap_or_default().to_owned(),
            "PREV_LINE" => cursor
                .row
                .checked_sub(1)
                .and_then(|row| ctx.line(row))
                .unwrap_or_default()
                .to_owned(),
            "LINE_INDEX" => cursor.row.to_string(),
            "LINE_NUMBER" => (cursor.row + 1).to_string(),
            "SOFT_TABS" => (if ctx.soft_tabs() { "YES" } else { "NO" }).to_owned(),
            "TAB_SIZE" => ctx.tab_size().to_string(),
            "CLIPBOARD" => ctx.clipboard_text().unwrap_or_default(),
            "FILEPATH" => ctx.file_path().unwrap_or_default(),
            "FILENAME" => path
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "FILENAME_BASE" => path
                .and_then(|p| p.file_stem())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "DIRECTORY" => path
                .and_then(|p| p.parent())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            "WORKSPACE_NAME" => ctx.workspace_name().unwrap_or_default(),
            "FULLNAME" => ctx.full_name().unwrap_or_default(),
            "BLOCK_COMMENT_START" => ctx.block_comment().map(|c| c.0).unwrap_or_default(),
            "BLOCK_COMMENT_END" => ctx.block_comment().map(|c| c.1).unwrap_or_default(),
            "LINE_COMMENT" => ctx.line_comment().unwrap_or_default(),
            "CURRENT_YEAR" => date("%Y"),
            "CURRENT_YEAR_SHORT" => date("%y"),
            "CURRENT_MONTH" => date("%m"),
            "CURRENT_MONTH_NAME" => date("%B"),
            "CURRENT_MONTH_NAME_SHORT" => date("%b"),
            "CURRENT_DATE" => date("%d"),
            "CURRENT_DAY_NAME" => date("%A"),
            "CURRENT_DAY_NAME_SHORT" => date("%a"),
            "CURRENT_HOUR" => date("%H"),
            "CURRENT_MINUTE" => date("%M"),
            "CURRENT_SECOND" => date("%S"),
            _ => String::new(),
        }
    }

    /// Runs a transform, the variables it mentions being resolved against `ctx`
    pub fn apply_transform(
        &self,
        transform: &Transform,
        value: &str,
        ctx: &dyn SnippetContext,
    ) -> String {
        transform.apply(value, &|name| self.value(ctx, name, ""))
    }

    /// Replaces the variables of a parsed snippet by their value.
    ///
    /// A variable with a non-empty value replaces its whole placeholder, default included.
    /// An empty one is dropped and its default, if any, is kept. Tabstops are left as is.
    pub fn resolve(&self, tokens: &[SnippetToken], ctx: &dyn SnippetContext) -> Vec<SnippetToken> {
        let mut out: Vec<SnippetToken> = Vec::with_capacity(tokens.len());
        let mut handled = HashSet::new();
        // snippet text written so far on the current line
        let mut line = String::new();

        let push_text = |out: &mut Vec<SnippetToken>, line: &mut String, text: &str| {
            match text.rsplit_once('\n') {
                Some((_, last)) => *line = last.to_owned(),
                None => line.push_str(text),
            }
            if let Some(SnippetToken::Text(last)) = out.last_mut() {
                last.push_str(text);
            } else if !text.is_empty() {
                out.push(SnippetToken::Text(text.to_owned()));
            }
        };

        let mut i = 0;
        while i < tokens.len() {
            match &tokens[i] {
                SnippetToken::Text(text) => push_text(&mut out, &mut line, text),
                SnippetToken::Tabstop(_) => out.push(tokens[i].clone()),
                SnippetToken::Variable(var) => {
                    if handled.insert(var.marker) {
                        let mut value = self.value(ctx, &var.name, indentation(&line));
                        if let Some(transform) = &var.transform {
                            value = self.apply_transform(transform, &value, ctx);
                        }
                        if !value.is_empty() {
                            push_text(&mut out, &mut line, &value);
                            if let Some(end) = closing_index(tokens, i) {
                                i = end;
                            }
                        }
                    }
                }
            }
            i += 1;
        }

        out
    }
}
