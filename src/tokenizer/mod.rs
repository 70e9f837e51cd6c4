//! Line tokenizer driven by a [`RuleTable`].
//!
//! Every state of the table is compiled into a single [`PatternSet`]. A line is scanned
//! from left to right: the earliest match of the current state wins, ties going to the
//! rule declared first. Text no rule matched gets the default token of the state.
//! The state reached at the end of a line is what the next line starts with.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, TesseraResult};
use crate::options::TokenizerOptions;
use crate::rules::pattern_set::PatternSource;
use crate::rules::{
    MatchHandler, PatternSet, PatternSetMatch, Rule, RuleEntry, RuleTable, StateName, TokenSpec,
    Transition,
};

mod stack;

pub use stack::StateStack;

/// Every table must have a state with that name: it's where the first line starts.
pub const START_STATE: &str = "start";
/// Default token type for text that no rule matched
pub const TEXT_TOKEN: &str = "text";
/// Token type used when a zero-width match forces the scanner to skip a char
pub const EMPTY_TOKEN: &str = "empty";
/// Token type of the rest of a line once the per-line match budget is exhausted
pub const OVERFLOW_TOKEN: &str = "overflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The token type, eg `keyword` or `string.quoted`
    #[serde(rename = "type")]
    pub kind: String,
    /// The exact text covered by the token
    pub value: String,
}

impl Token {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// The tokens of a line and the state the following line should start in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    pub state: StateStack,
}

/// Small wrapper so we only produce non-empty tokens and keep track of whether the last
/// token can still be extended.
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Whether the last token came from a single-type rule (or from unmatched text) and
    /// can absorb a following token of the same type
    open: bool,
}

impl TokenAccumulator {
    fn produce(&mut self, kind: &str, value: &str, merge: bool) {
        if value.is_empty() {
            return;
        }
        if merge
            && self.open
            && let Some(last) = self.tokens.last_mut()
            && last.kind == kind
        {
            last.value.push_str(value);
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!("[produce] {kind}: {value:?}");
        self.tokens.push(Token::new(kind, value));
        self.open = true;
    }

    /// Tokens coming from capture groups or handlers are never merged with anything
    fn produce_separate(&mut self, kind: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        #[cfg(feature = "debug")]
        log::trace!("[produce_separate] {kind}: {value:?}");
        self.tokens.push(Token::new(kind, value));
        self.open = false;
    }
}

#[derive(Debug, Clone)]
enum Jump {
    Next(StateName),
    Push(StateName),
    Pop,
}

#[derive(Clone)]
struct CompiledRule {
    token: TokenSpec,
    jump: Option<Jump>,
    on_match: Option<MatchHandler>,
    merge: bool,
}

struct CompiledState {
    name: StateName,
    default_token: String,
    patterns: PatternSet,
    rules: Vec<CompiledRule>,
}

/// A tokenizer compiled from a [`RuleTable`]. It is immutable once built and can be shared
/// between threads.
pub struct Tokenizer {
    states: Vec<CompiledState>,
    state_ids: HashMap<StateName, usize>,
    start: usize,
    options: TokenizerOptions,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("states", &self.states.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

/// Gives a name to every inline `push` list and turns it into a regular state.
fn hoist_inline_states(table: &RuleTable) -> BTreeMap<StateName, Vec<RuleEntry>> {
    fn hoist(
        owner: &str,
        entries: &mut [RuleEntry],
        counter: &mut usize,
        out: &mut Vec<(StateName, Vec<RuleEntry>)>,
    ) {
        for entry in entries.iter_mut() {
            let RuleEntry::Rule(rule) = entry else {
                continue;
            };
            if let Some(Transition::PushRules(rules)) = &rule.transition {
                *counter += 1;
                let name = format!("{owner}#{counter}");
                let mut rules = rules.clone();
                hoist(&name, &mut rules, counter, out);
                out.push((name.clone(), rules));
                rule.transition = Some(Transition::Push(name));
            }
        }
    }

    let mut states = BTreeMap::new();
    for (name, entries) in &table.states {
        let mut entries = entries.clone();
        let mut counter = 0;
        let mut hoisted = Vec::new();
        hoist(name, &mut entries, &mut counter, &mut hoisted);
        states.insert(name.clone(), entries);
        states.extend(hoisted);
    }
    states
}

/// Splices the rules of included states in place.
/// A state including itself, directly or not, is only expanded once.
fn resolve_includes<'a>(
    states: &'a BTreeMap<StateName, Vec<RuleEntry>>,
    name: &'a str,
    visiting: &mut Vec<&'a str>,
    out: &mut Vec<&'a Rule>,
) -> TesseraResult<()> {
    visiting.push(name);
    for entry in states.get(name).map(|s| s.as_slice()).unwrap_or_default() {
        match entry {
            RuleEntry::Rule(rule) => out.push(rule),
            RuleEntry::Include(target) => {
                let Some((key, _)) = states.get_key_value(target) else {
                    return Err(Error::UnknownInclude {
                        from: name.to_owned(),
                        target: target.clone(),
                    });
                };
                if visiting.contains(&key.as_str()) {
                    #[cfg(feature = "debug")]
                    log::debug!("[resolve_includes] {name} includes {target} recursively, skipping");
                    continue;
                }
                resolve_includes(states, key, visiting, out)?;
            }
            RuleEntry::DefaultToken(_) => {}
        }
    }
    visiting.pop();
    Ok(())
}

fn compile_rule(rule: &Rule, patterns: &PatternSet, index: usize) -> CompiledRule {
    let token = match &rule.token {
        // A group list only makes sense if it lines up with the regex groups
        TokenSpec::Groups(kinds)
            if kinds.len() <= 1 || kinds.len() != patterns.rule_captures(index) =>
        {
            TokenSpec::Literal(
                kinds
                    .first()
                    .cloned()
                    .unwrap_or_else(|| TEXT_TOKEN.to_owned()),
            )
        }
        other => other.clone(),
    };
    let jump = match &rule.transition {
        Some(Transition::Next(s)) => Some(Jump::Next(s.clone())),
        Some(Transition::Push(s)) => Some(Jump::Push(s.clone())),
        Some(Transition::Pop) => Some(Jump::Pop),
        // hoisted before compiling
        Some(Transition::PushRules(_)) | None => None,
    };
    CompiledRule {
        token,
        jump,
        on_match: rule.on_match.clone(),
        merge: rule.merge,
    }
}

impl Tokenizer {
    pub fn new(table: &RuleTable) -> TesseraResult<Self> {
        Self::with_options(table, TokenizerOptions::default())
    }

    pub fn with_options(table: &RuleTable, options: TokenizerOptions) -> TesseraResult<Self> {
        if !table.states.contains_key(START_STATE) {
            return Err(Error::MissingStartState);
        }
        let raw_states = hoist_inline_states(table);

        let mut states = Vec::with_capacity(raw_states.len());
        let mut state_ids = HashMap::with_capacity(raw_states.len());

        for (name, entries) in &raw_states {
            let mut rules = Vec::new();
            resolve_includes(&raw_states, name, &mut Vec::new(), &mut rules)?;

            for rule in &rules {
                let target = match &rule.transition {
                    Some(Transition::Next(s)) | Some(Transition::Push(s)) => s,
                    _ => continue,
                };
                if !raw_states.contains_key(target) {
                    return Err(Error::UnknownState {
                        from: name.clone(),
                        target: target.clone(),
                    });
                }
            }

            // The last default token declared by the state itself wins
            let default_token = entries
                .iter()
                .rev()
                .find_map(|e| match e {
                    RuleEntry::DefaultToken(t) => Some(t.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| TEXT_TOKEN.to_owned());

            let sources: Vec<_> = rules
                .iter()
                .map(|r| PatternSource {
                    pattern: r.regex.as_str(),
                    case_insensitive: r.case_insensitive,
                })
                .collect();
            let patterns = PatternSet::new(name, &sources)?;
            let rules = rules
                .iter()
                .enumerate()
                .map(|(i, r)| compile_rule(r, &patterns, i))
                .collect();

            state_ids.insert(name.clone(), states.len());
            states.push(CompiledState {
                name: name.clone(),
                default_token,
                patterns,
                rules,
            });
        }

        #[cfg(feature = "debug")]
        log::debug!("[Tokenizer::new] compiled {} states", states.len());

        Ok(Self {
            start: state_ids[START_STATE],
            states,
            state_ids,
            options,
        })
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|s| s.name.as_str())
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state_ids.contains_key(name)
    }

    /// Looks up the state to scan with. A stack pointing to a state that doesn't exist,
    /// which only handlers can cause, is put back on `start`.
    fn current_state(&self, stack: &mut StateStack) -> &CompiledState {
        match self.state_ids.get(stack.current()) {
            Some(id) => &self.states[*id],
            None => {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[current_state] unknown state {:?}, falling back to start",
                    stack.current()
                );
                stack.next(START_STATE);
                &self.states[self.start]
            }
        }
    }

    fn emit(
        &self,
        rule: &CompiledRule,
        state: &CompiledState,
        line: &str,
        m: &PatternSetMatch,
        stack: &mut StateStack,
        acc: &mut TokenAccumulator,
    ) {
        let value = &line[m.start..m.end];

        if let Some(handler) = &rule.on_match {
            let current = stack.current().to_owned();
            let tokens = handler(value, &current, stack);
            let covered = tokens.iter().map(|t| t.value.as_str()).collect::<String>();
            if covered == value {
                for token in &tokens {
                    acc.produce_separate(&token.kind, &token.value);
                }
            } else {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[emit] handler in {current} returned tokens covering {covered:?} instead of {value:?}"
                );
                acc.produce(&state.default_token, value, rule.merge);
            }
            return;
        }

        match &rule.token {
            TokenSpec::Literal(kind) => acc.produce(kind, value, rule.merge),
            TokenSpec::Classify(classifier) => {
                let groups: Vec<&str> = m
                    .capture_pos
                    .iter()
                    .map(|p| p.map(|(s, e)| &line[s..e]).unwrap_or(""))
                    .collect();
                let kind = classifier(&groups);
                acc.produce(&kind, value, rule.merge);
            }
            TokenSpec::Groups(kinds) => {
                let mut cursor = m.start;
                for (i, kind) in kinds.iter().enumerate() {
                    let Some((start, end)) = m.capture_pos.get(i + 1).copied().flatten() else {
                        continue;
                    };
                    // Nested or lookaround groups can't be represented as a flat token list
                    if start < cursor || end <= start || end > m.end {
                        continue;
                    }
                    acc.produce_separate(&state.default_token, &line[cursor..start]);
                    acc.produce_separate(kind, &line[start..end]);
                    cursor = end;
                }
                acc.produce_separate(&state.default_token, &line[cursor..m.end]);
            }
        }
    }

    /// Tokenizes a single line (without its line terminator), starting from `state`.
    ///
    /// This never fails: text is always covered exactly by the returned tokens and the
    /// scan always terminates.
    pub fn get_line_tokens(&self, line: &str, state: &StateStack) -> LineTokens {
        let mut stack = state.clone();
        let mut acc = TokenAccumulator::default();
        let mut pos = 0;
        let mut match_count = 0;
        // zero-width matches in a row at the same position
        let mut stalled = 0;

        while pos < line.len() {
            if match_count >= self.options.max_matches_per_line {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[get_line_tokens] more than {} matches, giving up on the rest of the line",
                    self.options.max_matches_per_line
                );
                while pos < line.len() {
                    let end = advance_chars(line, pos, self.options.overflow_chunk);
                    acc.produce_separate(OVERFLOW_TOKEN, &line[pos..end]);
                    pos = end;
                }
                stack.reset();
                break;
            }

            let state = self.current_state(&mut stack);
            let Some(m) = state.patterns.find_at(line, pos) else {
                acc.produce(&state.default_token, &line[pos..], true);
                break;
            };
            match_count += 1;

            #[cfg(feature = "debug")]
            log::trace!(
                "[get_line_tokens] {} rule #{} matched {:?} at {}",
                state.name,
                m.rule,
                &line[m.start..m.end],
                m.start
            );

            acc.produce(&state.default_token, &line[pos..m.start], true);
            pos = m.start;

            let rule = &state.rules[m.rule];
            let before = (m.start == m.end).then(|| stack.clone());
            self.emit(rule, state, line, &m, &mut stack, &mut acc);
            match &rule.jump {
                Some(Jump::Next(s)) => stack.next(s.clone()),
                Some(Jump::Push(s)) => stack.push(s.clone()),
                Some(Jump::Pop) => stack.pop(),
                None => {}
            }

            if m.end > m.start {
                pos = m.end;
                stalled = 0;
                continue;
            }

            // A zero-width match is allowed to change state without consuming anything,
            // but not forever
            stalled += 1;
            if before.as_ref() == Some(&stack) || stalled > self.states.len() {
                let next = advance_chars(line, pos, 1);
                #[cfg(feature = "debug")]
                log::debug!(
                    "[get_line_tokens] zero-width match at {pos} in {}, skipping {:?}",
                    stack.current(),
                    &line[pos..next]
                );
                acc.produce_separate(EMPTY_TOKEN, &line[pos..next]);
                pos = next;
                stalled = 0;
            }
        }

        LineTokens {
            tokens: acc.tokens,
            state: stack,
        }
    }

    /// Tokenizes a whole text, carrying the state from one line to the next.
    /// Lines are split on `\n` and the terminators are not part of any token.
    pub fn tokenize_lines(&self, text: &str) -> Vec<LineTokens> {
        let mut state = StateStack::default();
        let mut lines = Vec::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let tokens = self.get_line_tokens(line, &state);
            state = tokens.state.clone();
            lines.push(tokens);
        }
        lines
    }
}

/// Byte offset `count` chars after `pos`, or the end of the text
fn advance_chars(text: &str, pos: usize, count: usize) -> usize {
    text[pos..]
        .char_indices()
        .nth(count)
        .map(|(i, _)| pos + i)
        .unwrap_or(text.len())
}
