mod error;
mod options;
mod registry;
mod rules;
mod tokenizer;

mod engine;
mod host;
mod snippets;
mod tabstops;

pub use engine::{SnippetEngine, TabstopCommand};
pub use error::Error;
pub use host::{
    BufferEditor, Delta, DeltaAction, EditorEvent, EditorHost, EventKind, MarkerId, Position,
    Range, Selection,
};
pub use options::{
    DEFAULT_MAX_MATCHES_PER_LINE, DEFAULT_OVERFLOW_CHUNK, InsertOptions, TabstopOptions,
    TokenizerOptions,
};
pub use registry::{PLAIN_MODE_NAME, Registry};
pub use rules::{
    Classifier, MatchHandler, RawEntry, RawPush, RawRule, RawRuleTable, RawToken, Regex, Rule,
    RuleEntry, RuleTable, RuleTableBuilder, StateName, TokenSpec, Transition,
};
pub use snippets::{
    CaseChange, CaseFunction, ExpandedSnippet, FormatToken, GLOBAL_SCOPE, Snippet,
    SnippetContext, SnippetDefinition, SnippetExpander, SnippetGrammar, SnippetRegistry,
    SnippetToken, TabstopGroup, TabstopMarker, TabstopRange, Transform, TriggerMatch,
    VariableMarker, VariableResolver, parse_snippet_file, to_snippet_file,
};
pub use tabstops::{Tabstop, TabstopManager, TrackedRange};
pub use tokenizer::{
    EMPTY_TOKEN, LineTokens, OVERFLOW_TOKEN, START_STATE, StateStack, TEXT_TOKEN, Token,
    Tokenizer,
};
