//! Declarative rule tables fed to the [`Tokenizer`](crate::Tokenizer).
//!
//! A rule table maps state names to ordered lists of rules. Tables are plain data: they are
//! never mutated once built. Deriving a new mode from an existing one goes through
//! [`RuleTable::extend`] which copies the base table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::tokenizer::{StateStack, Token};

pub(crate) mod pattern_set;
mod raw;
pub(crate) mod regex;

pub use pattern_set::{PatternSet, PatternSetMatch};
pub use raw::{RawEntry, RawPush, RawRule, RawRuleTable, RawToken};
pub use regex::Regex;

pub type StateName = String;

/// Computes a token type from the text of a match.
/// Receives the whole match followed by the rule's capture groups.
pub type Classifier = Arc<dyn Fn(&[&str]) -> String + Send + Sync>;

/// Custom handling of a match: receives the matched text, the current state name and
/// the state stack, which it can modify. It returns the tokens to emit, whose values
/// should add up to the matched text.
pub type MatchHandler = Arc<dyn Fn(&str, &str, &mut StateStack) -> Vec<Token> + Send + Sync>;

/// How a rule decides the type of the token it produces
#[derive(Clone)]
pub enum TokenSpec {
    /// A fixed token type
    Literal(String),
    /// One token type per capture group of the rule regex
    Groups(Vec<String>),
    /// A function deciding the type from the matched groups
    Classify(Classifier),
}

impl fmt::Debug for TokenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSpec::Literal(t) => write!(f, "Literal({t:?})"),
            TokenSpec::Groups(t) => write!(f, "Groups({t:?})"),
            TokenSpec::Classify(_) => f.write_str("Classify(<fn>)"),
        }
    }
}

impl From<&str> for TokenSpec {
    fn from(value: &str) -> Self {
        TokenSpec::Literal(value.to_owned())
    }
}

impl From<String> for TokenSpec {
    fn from(value: String) -> Self {
        TokenSpec::Literal(value)
    }
}

impl From<Vec<&str>> for TokenSpec {
    fn from(value: Vec<&str>) -> Self {
        TokenSpec::Groups(value.into_iter().map(|s| s.to_owned()).collect())
    }
}

/// What happens to the state stack after a rule matched
#[derive(Debug, Clone)]
pub enum Transition {
    /// Replace the current state
    Next(StateName),
    /// Enter a nested state, keeping the current one underneath
    Push(StateName),
    /// Enter an anonymous nested state made of these rules
    PushRules(Vec<RuleEntry>),
    /// Go back to the enclosing state, or to `start` if there is none
    Pop,
}

#[derive(Clone)]
pub struct Rule {
    pub(crate) regex: String,
    pub(crate) token: TokenSpec,
    pub(crate) transition: Option<Transition>,
    pub(crate) on_match: Option<MatchHandler>,
    pub(crate) case_insensitive: bool,
    pub(crate) merge: bool,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("regex", &self.regex)
            .field("token", &self.token)
            .field("transition", &self.transition)
            .field("on_match", &self.on_match.as_ref().map(|_| "<fn>"))
            .field("case_insensitive", &self.case_insensitive)
            .field("merge", &self.merge)
            .finish()
    }
}

impl Rule {
    pub fn new(token: impl Into<TokenSpec>, regex: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            token: token.into(),
            transition: None,
            on_match: None,
            case_insensitive: false,
            merge: true,
        }
    }

    /// A rule whose token type is computed from the match
    pub fn classify<F>(classifier: F, regex: impl Into<String>) -> Self
    where
        F: Fn(&[&str]) -> String + Send + Sync + 'static,
    {
        Self::new(TokenSpec::Classify(Arc::new(classifier)), regex)
    }

    pub fn next(mut self, state: impl Into<StateName>) -> Self {
        self.transition = Some(Transition::Next(state.into()));
        self
    }

    pub fn push(mut self, state: impl Into<StateName>) -> Self {
        self.transition = Some(Transition::Push(state.into()));
        self
    }

    pub fn push_rules(mut self, rules: Vec<RuleEntry>) -> Self {
        self.transition = Some(Transition::PushRules(rules));
        self
    }

    pub fn pop(mut self) -> Self {
        self.transition = Some(Transition::Pop);
        self
    }

    pub fn on_match<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str, &mut StateStack) -> Vec<Token> + Send + Sync + 'static,
    {
        self.on_match = Some(Arc::new(handler));
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Never merge this rule's tokens with a preceding token of the same type
    pub fn no_merge(mut self) -> Self {
        self.merge = false;
        self
    }

    pub fn regex(&self) -> &str {
        &self.regex
    }

    pub fn token(&self) -> &TokenSpec {
        &self.token
    }

    pub fn transition(&self) -> Option<&Transition> {
        self.transition.as_ref()
    }
}

/// An item in the list of rules of a state
#[derive(Debug, Clone)]
pub enum RuleEntry {
    Rule(Rule),
    /// Splice the rules of another state at this position
    Include(StateName),
    /// Token type used for text no rule of the state matches
    DefaultToken(String),
}

impl From<Rule> for RuleEntry {
    fn from(value: Rule) -> Self {
        RuleEntry::Rule(value)
    }
}

impl RuleEntry {
    pub fn include(state: impl Into<StateName>) -> Self {
        RuleEntry::Include(state.into())
    }

    pub fn default_token(token: impl Into<String>) -> Self {
        RuleEntry::DefaultToken(token.into())
    }

    fn with_prefix(&self, prefix: &str) -> Self {
        let prefixed = |name: &str| {
            if name.starts_with(prefix) {
                name.to_owned()
            } else {
                format!("{prefix}{name}")
            }
        };
        match self {
            RuleEntry::Rule(rule) => {
                let mut rule = rule.clone();
                rule.transition = match rule.transition {
                    Some(Transition::Next(s)) => Some(Transition::Next(prefixed(&s))),
                    Some(Transition::Push(s)) => Some(Transition::Push(prefixed(&s))),
                    Some(Transition::PushRules(rules)) => Some(Transition::PushRules(
                        rules.iter().map(|r| r.with_prefix(prefix)).collect(),
                    )),
                    other => other,
                };
                RuleEntry::Rule(rule)
            }
            RuleEntry::Include(s) => RuleEntry::Include(prefixed(s)),
            RuleEntry::DefaultToken(t) => RuleEntry::DefaultToken(t.clone()),
        }
    }
}

/// A complete set of states for one mode
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    pub(crate) states: BTreeMap<StateName, Vec<RuleEntry>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a state
    pub fn with_state<I, E>(mut self, name: impl Into<StateName>, entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<RuleEntry>,
    {
        self.states
            .insert(name.into(), entries.into_iter().map(Into::into).collect());
        self
    }

    pub fn state(&self, name: &str) -> Option<&[RuleEntry]> {
        self.states.get(name).map(|s| s.as_slice())
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(|s| s.as_str())
    }

    /// Starts building a new table from a copy of this one.
    pub fn extend(&self) -> RuleTableBuilder {
        RuleTableBuilder {
            states: self.states.clone(),
        }
    }
}

/// Builds a new [`RuleTable`] out of a base table and a list of edits.
/// The base table is copied, never modified.
#[derive(Debug, Clone)]
pub struct RuleTableBuilder {
    states: BTreeMap<StateName, Vec<RuleEntry>>,
}

impl RuleTableBuilder {
    /// Adds a state or replaces it entirely
    pub fn state<I, E>(mut self, name: impl Into<StateName>, entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<RuleEntry>,
    {
        self.states
            .insert(name.into(), entries.into_iter().map(Into::into).collect());
        self
    }

    /// Inserts rules before the existing rules of a state, creating it if needed
    pub fn prepend<I, E>(self, name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<RuleEntry>,
    {
        self.insert(name, 0, entries)
    }

    /// Adds rules after the existing rules of a state, creating it if needed
    pub fn append<I, E>(mut self, name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<RuleEntry>,
    {
        self.states
            .entry(name.to_owned())
            .or_default()
            .extend(entries.into_iter().map(Into::into));
        self
    }

    /// Inserts rules at the given position of a state, clamped to its length
    pub fn insert<I, E>(mut self, name: &str, index: usize, entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<RuleEntry>,
    {
        let state = self.states.entry(name.to_owned()).or_default();
        let index = index.min(state.len());
        state.splice(index..index, entries.into_iter().map(Into::into));
        self
    }

    /// Embeds all the states of another table, renamed with `prefix`.
    ///
    /// Transitions and includes of the embedded table are renamed the same way. The
    /// `escape_rules` are put at the front of every embedded state: they are the way back
    /// to the host mode, eg the closing `</script>` tag for JS inside HTML.
    pub fn embed(mut self, prefix: &str, table: &RuleTable, escape_rules: &[RuleEntry]) -> Self {
        for (name, entries) in &table.states {
            let mut state: Vec<RuleEntry> = escape_rules.to_vec();
            state.extend(entries.iter().map(|e| e.with_prefix(prefix)));
            self.states.insert(format!("{prefix}{name}"), state);
        }
        self
    }

    pub fn build(self) -> RuleTable {
        RuleTable {
            states: self.states,
        }
    }
}
