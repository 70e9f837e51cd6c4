//! TextMate-style snippets: parsing, variable resolution, expansion into text and tabstops,
//! and the definitions loaded from snippet files.

mod expander;
mod file;
mod parser;
mod registry;
mod transform;
mod variables;

pub use expander::{ExpandedSnippet, SnippetExpander, TabstopGroup, TabstopRange};
pub use file::{SnippetDefinition, parse_snippet_file, to_snippet_file};
pub use parser::SnippetGrammar;
pub use registry::{GLOBAL_SCOPE, Snippet, SnippetRegistry, TriggerMatch};
pub use transform::{CaseChange, CaseFunction, FormatToken, Transform};
pub use variables::{SnippetContext, VariableResolver};

/// A tabstop occurrence: `$1`, `${1:default}`, `${1|a,b|}` or `${1/re/fmt/}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabstopMarker {
    /// Identifies the occurrence: the opening and closing tokens of a placeholder share it
    pub marker: usize,
    pub id: usize,
    pub choices: Option<Vec<String>>,
    pub transform: Option<Transform>,
}

/// A variable occurrence: `$NAME`, `${NAME:default}` or `${NAME/re/fmt/}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMarker {
    pub marker: usize,
    pub name: String,
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnippetToken {
    Text(String),
    Tabstop(TabstopMarker),
    Variable(VariableMarker),
}

impl SnippetToken {
    pub fn marker(&self) -> Option<usize> {
        match self {
            SnippetToken::Text(_) => None,
            SnippetToken::Tabstop(t) => Some(t.marker),
            SnippetToken::Variable(v) => Some(v.marker),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SnippetToken::Text(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn set_transform(&mut self, transform: Transform) {
        match self {
            SnippetToken::Tabstop(t) => t.transform = Some(transform),
            SnippetToken::Variable(v) => v.transform = Some(transform),
            SnippetToken::Text(_) => {}
        }
    }
}

/// Index of the token closing the placeholder opened at `index`, if any
pub(crate) fn closing_index(tokens: &[SnippetToken], index: usize) -> Option<usize> {
    let marker = tokens.get(index)?.marker()?;
    tokens[index + 1..]
        .iter()
        .position(|t| t.marker() == Some(marker))
        .map(|i| index + 1 + i)
}
