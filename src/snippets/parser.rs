//! Turns TextMate snippet syntax into a flat list of [`SnippetToken`]s.
//!
//! This uses the same machinery as the line tokenizer: one [`PatternSet`] per state, the
//! earliest match winning. The four states are `start` (snippet body), `snippetVar` (what
//! follows `${N`), `formatString` (the format part of a transform) and `formatStringVar`
//! (what follows `${N` inside a format).
//!
//! A placeholder with a body shows up twice in the output: once before its body and once
//! after it, both tokens sharing the same `marker`.

use crate::error::TesseraResult;
use crate::rules::pattern_set::PatternSource;
use crate::rules::{PatternSet, PatternSetMatch};
use crate::snippets::transform::{CaseChange, CaseFunction, FormatToken, Transform};
use crate::snippets::{SnippetToken, TabstopMarker, VariableMarker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Start,
    SnippetVar,
    FormatString,
    FormatStringVar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Escape,
    Close,
    Reference,
    Open,
    Choices,
    Guard,
    SkipToStart,
    FormatColon,
    FormatEscape,
    EndTransform,
    FormatReference,
    FormatOpen,
    FormatClose,
    FormatFunction,
    ConditionalKind,
    SkipToFormat,
}

#[derive(Debug)]
struct ModeRules {
    patterns: PatternSet,
    actions: Vec<Action>,
}

impl ModeRules {
    fn new(name: &str, rules: &[(&str, Action)]) -> TesseraResult<Self> {
        let sources: Vec<_> = rules
            .iter()
            .map(|(pattern, _)| PatternSource {
                pattern,
                case_insensitive: false,
            })
            .collect();
        Ok(Self {
            patterns: PatternSet::new(name, &sources)?,
            actions: rules.iter().map(|(_, a)| *a).collect(),
        })
    }
}

/// The compiled snippet syntax. Building it compiles a handful of regexes, so it is built
/// once and shared by whoever parses snippets.
#[derive(Debug)]
pub struct SnippetGrammar {
    start: ModeRules,
    snippet_var: ModeRules,
    format_string: ModeRules,
    format_string_var: ModeRules,
}

impl SnippetGrammar {
    pub fn new() -> TesseraResult<Self> {
        Ok(Self {
            start: ModeRules::new(
                "start",
                &[
                    (r"\\.", Action::Escape),
                    (r"\}", Action::Close),
                    (r"\$(?:\d+|\w+)", Action::Reference),
                    (r"\$\{[\dA-Za-z_]+", Action::Open),
                ],
            )?,
            snippet_var: ModeRules::new(
                "snippetVar",
                &[
                    (r"\|(?:\\.|[^\\|])*\|", Action::Choices),
                    (r"/((?:\\.|[^\\/])+)/", Action::Guard),
                    (r"(?:\\.|[^:}\\])*:?", Action::SkipToStart),
                ],
            )?,
            format_string: ModeRules::new(
                "formatString",
                &[
                    (r":", Action::FormatColon),
                    (r"\\.", Action::FormatEscape),
                    (r"/\w*\}", Action::EndTransform),
                    (r"\$(?:\d+|\w+)", Action::FormatReference),
                    (r"\$\{\w+", Action::FormatOpen),
                    (r"\}", Action::FormatClose),
                ],
            )?,
            format_string_var: ModeRules::new(
                "formatStringVar",
                &[
                    (r":/(\w+)\}", Action::FormatFunction),
                    (r":[?\-+]?", Action::ConditionalKind),
                    (r"(?:\\.|[^:}\\])*:?", Action::SkipToFormat),
                ],
            )?,
        })
    }

    fn rules(&self, mode: Mode) -> &ModeRules {
        match mode {
            Mode::Start => &self.start,
            Mode::SnippetVar => &self.snippet_var,
            Mode::FormatString => &self.format_string,
            Mode::FormatStringVar => &self.format_string_var,
        }
    }
}

/// A `${...}` opened in the snippet body and not closed yet
#[derive(Debug)]
struct Frame {
    /// Index of the opening token in the output
    output: usize,
    /// Byte offset of the `$` in the source
    source: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionalKind {
    /// `${1:+if}`
    IfSet,
    /// `${1:?if:else}`
    IfElse { in_else: bool },
    /// `${1:-else}` and `${1:else}`
    Else,
}

/// A `${...}` opened in a format string
#[derive(Debug)]
struct FormatFrame {
    reference: String,
    kind: Option<ConditionalKind>,
    if_set: Vec<FormatToken>,
    if_empty: Vec<FormatToken>,
}

impl FormatFrame {
    fn target(&mut self) -> &mut Vec<FormatToken> {
        match self.kind {
            Some(ConditionalKind::IfElse { in_else: true }) | Some(ConditionalKind::Else) => {
                &mut self.if_empty
            }
            _ => &mut self.if_set,
        }
    }

    fn finish(self) -> FormatToken {
        match self.kind {
            None => FormatToken::Reference(self.reference),
            Some(ConditionalKind::IfSet) | Some(ConditionalKind::IfElse { .. }) => {
                FormatToken::Conditional {
                    reference: self.reference,
                    if_set: self.if_set,
                    if_empty: self.if_empty,
                }
            }
            Some(ConditionalKind::Else) => FormatToken::Conditional {
                if_set: vec![FormatToken::Reference(self.reference.clone())],
                reference: self.reference,
                if_empty: self.if_empty,
            },
        }
    }
}

/// The transform being parsed, owned by the innermost body frame
#[derive(Debug, Default)]
struct TransformBuilder {
    guard: String,
    format: Vec<FormatToken>,
    frames: Vec<FormatFrame>,
}

impl TransformBuilder {
    fn target(&mut self) -> &mut Vec<FormatToken> {
        match self.frames.last_mut() {
            Some(frame) => frame.target(),
            None => &mut self.format,
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let target = self.target();
        if let Some(FormatToken::Text(last)) = target.last_mut() {
            last.push_str(text);
        } else {
            target.push(FormatToken::Text(text.to_owned()));
        }
    }

    fn push(&mut self, token: FormatToken) {
        self.target().push(token);
    }

    fn close_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            let token = frame.finish();
            self.push(token);
        }
    }

    fn finish(mut self, flags: &str) -> Transform {
        while !self.frames.is_empty() {
            self.close_frame();
        }
        Transform::new(self.guard, self.format, flags)
    }
}

struct Parser<'a> {
    grammar: &'a SnippetGrammar,
    source: &'a str,
    out: Vec<SnippetToken>,
    frames: Vec<Frame>,
    transform: Option<TransformBuilder>,
    next_marker: usize,
}

/// Splits a `|a,b\,c|` choice list on its unescaped commas
fn parse_choices(value: &str) -> Vec<String> {
    let inner = &value[1..value.len() - 1];
    let mut choices = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(e @ (',' | '|' | '\\')) => current.push(e),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            ',' => choices.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    choices.push(current);
    choices
}

impl<'a> Parser<'a> {
    fn new(grammar: &'a SnippetGrammar, source: &'a str) -> Self {
        Self {
            grammar,
            source,
            out: Vec::new(),
            frames: Vec::new(),
            transform: None,
            next_marker: 0,
        }
    }

    fn marker(&mut self) -> usize {
        self.next_marker += 1;
        self.next_marker - 1
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(SnippetToken::Text(last)) = self.out.last_mut() {
            last.push_str(text);
        } else {
            self.out.push(SnippetToken::Text(text.to_owned()));
        }
    }

    /// `$1`, `${1` → a tabstop, anything else is a variable
    fn reference(&mut self, name: &str) -> SnippetToken {
        let marker = self.marker();
        if name.bytes().all(|b| b.is_ascii_digit())
            && let Ok(id) = name.parse()
        {
            SnippetToken::Tabstop(TabstopMarker {
                marker,
                id,
                choices: None,
                transform: None,
            })
        } else {
            SnippetToken::Variable(VariableMarker {
                marker,
                name: name.to_owned(),
                transform: None,
            })
        }
    }

    /// Closes the innermost body frame, emitting its closing token
    fn close(&mut self, transform: Option<Transform>) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if let Some(transform) = transform {
            self.out[frame.output].set_transform(transform);
        }
        let closing = self.out[frame.output].clone();
        self.out.push(closing);
    }

    fn literal(&mut self, mode: Mode, text: &str) {
        match mode {
            Mode::Start => self.push_text(text),
            Mode::FormatString => {
                if let Some(t) = self.transform.as_mut() {
                    t.push_text(text);
                }
            }
            Mode::SnippetVar | Mode::FormatStringVar => {}
        }
    }

    fn act(&mut self, action: Action, m: &PatternSetMatch) -> Mode {
        let source = self.source;
        let value = &source[m.start..m.end];
        match action {
            Action::Escape => {
                let escaped = &value[1..];
                match escaped {
                    "}" if !self.frames.is_empty() => self.push_text(escaped),
                    "`" | "$" | "\\" => self.push_text(escaped),
                    _ => self.push_text(value),
                }
                Mode::Start
            }
            Action::Close => {
                if self.frames.is_empty() {
                    self.push_text(value);
                } else {
                    self.close(None);
                }
                Mode::Start
            }
            Action::Reference => {
                let token = self.reference(&value[1..]);
                self.out.push(token);
                Mode::Start
            }
            Action::Open => {
                let token = self.reference(&value[2..]);
                self.frames.push(Frame {
                    output: self.out.len(),
                    source: m.start,
                });
                self.out.push(token);
                Mode::SnippetVar
            }
            Action::Choices => {
                let choices = parse_choices(value);
                if let Some(frame) = self.frames.last()
                    && let SnippetToken::Tabstop(t) = &mut self.out[frame.output]
                {
                    t.choices = Some(choices.clone());
                }
                if let Some(first) = choices.first() {
                    self.push_text(first);
                }
                Mode::Start
            }
            Action::Guard => {
                self.transform = Some(TransformBuilder {
                    guard: value[1..value.len() - 1].to_owned(),
                    ..Default::default()
                });
                Mode::FormatString
            }
            Action::SkipToStart => Mode::Start,
            Action::FormatColon => {
                if let Some(t) = self.transform.as_mut() {
                    match t.frames.last_mut() {
                        Some(FormatFrame {
                            kind: Some(ConditionalKind::IfElse { in_else }),
                            ..
                        }) if !*in_else => *in_else = true,
                        _ => t.push_text(value),
                    }
                }
                Mode::FormatString
            }
            Action::FormatEscape => {
                if let Some(t) = self.transform.as_mut() {
                    let c = value[1..].chars().next().unwrap_or('\\');
                    match c {
                        'n' => t.push_text("\n"),
                        't' => t.push_text("\t"),
                        '}' | '`' | '$' | '\\' | '/' | ':' => t.push_text(&value[1..]),
                        _ => match CaseChange::from_escape(c) {
                            Some(change) => t.push(FormatToken::CaseChange(change)),
                            None => t.push_text(value),
                        },
                    }
                }
                Mode::FormatString
            }
            Action::EndTransform => {
                let flags = &value[1..value.len() - 1];
                let transform = self.transform.take().map(|t| t.finish(flags));
                self.close(transform);
                Mode::Start
            }
            Action::FormatReference => {
                if let Some(t) = self.transform.as_mut() {
                    t.push(FormatToken::Reference(value[1..].to_owned()));
                }
                Mode::FormatString
            }
            Action::FormatOpen => {
                if let Some(t) = self.transform.as_mut() {
                    t.frames.push(FormatFrame {
                        reference: value[2..].to_owned(),
                        kind: None,
                        if_set: Vec::new(),
                        if_empty: Vec::new(),
                    });
                }
                Mode::FormatStringVar
            }
            Action::FormatClose => {
                match self.transform.as_mut() {
                    Some(t) if !t.frames.is_empty() => {
                        t.close_frame();
                        return Mode::FormatString;
                    }
                    _ => {}
                }
                // `${1/a/b}` is missing its last slash, take the brace as the end
                let transform = self.transform.take().map(|t| t.finish(""));
                self.close(transform);
                Mode::Start
            }
            Action::FormatFunction => {
                if let Some(t) = self.transform.as_mut()
                    && let Some(frame) = t.frames.pop()
                {
                    let name = &value[2..value.len() - 1];
                    let token = match CaseFunction::from_name(name) {
                        Some(function) => FormatToken::Function {
                            reference: frame.reference,
                            function,
                        },
                        None => FormatToken::Reference(frame.reference),
                    };
                    t.push(token);
                }
                Mode::FormatString
            }
            Action::ConditionalKind => {
                if let Some(t) = self.transform.as_mut()
                    && let Some(frame) = t.frames.last_mut()
                {
                    frame.kind = Some(match value.as_bytes().get(1) {
                        Some(b'+') => ConditionalKind::IfSet,
                        Some(b'?') => ConditionalKind::IfElse { in_else: false },
                        _ => ConditionalKind::Else,
                    });
                }
                Mode::FormatString
            }
            Action::SkipToFormat => Mode::FormatString,
        }
    }

    fn run(mut self) -> Vec<SnippetToken> {
        let grammar = self.grammar;
        let source = self.source;
        let mut mode = Mode::Start;
        let mut pos = 0;

        while pos < source.len() {
            let rules = grammar.rules(mode);
            let Some(m) = rules.patterns.find_at(source, pos) else {
                self.literal(mode, &source[pos..]);
                break;
            };
            self.literal(mode, &source[pos..m.start]);
            let next = self.act(rules.actions[m.rule], &m);
            if m.end == m.start && next == mode {
                // can't happen with the rules above but never spin
                let step = source[pos..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                self.literal(mode, &source[pos..pos + step]);
                pos += step;
            } else {
                pos = m.end;
            }
            mode = next;
        }

        // A transform still open at the end is not a transform
        if self.transform.is_some()
            && let Some(frame) = self.frames.pop()
        {
            #[cfg(feature = "debug")]
            log::debug!(
                "[SnippetGrammar::parse] unterminated transform at {}, keeping it as text",
                frame.source
            );
            self.out.truncate(frame.output);
            let raw = &source[frame.source..];
            self.push_text(raw);
        }
        self.out
    }
}

impl SnippetGrammar {
    /// Parses a snippet body. This never fails: anything that isn't valid snippet syntax is
    /// kept as text.
    pub fn parse(&self, text: &str) -> Vec<SnippetToken> {
        Parser::new(self, text).run()
    }
}
