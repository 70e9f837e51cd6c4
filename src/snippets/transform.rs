//! `${1/regex/format/flags}` transforms.

use crate::rules::Regex;

/// A case directive found in a format string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseChange {
    /// `\u`: upper-case the next char
    UpperNext,
    /// `\l`: lower-case the next char
    LowerNext,
    /// `\U`: upper-case everything until `\E`
    Upper,
    /// `\L`: lower-case everything until `\E`
    Lower,
    /// `\E`
    End,
}

impl CaseChange {
    pub fn from_escape(c: char) -> Option<Self> {
        match c {
            'u' => Some(CaseChange::UpperNext),
            'l' => Some(CaseChange::LowerNext),
            'U' => Some(CaseChange::Upper),
            'L' => Some(CaseChange::Lower),
            'E' => Some(CaseChange::End),
            _ => None,
        }
    }
}

/// The functions available as `${1:/name}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFunction {
    Upcase,
    Downcase,
    Capitalize,
    Camelcase,
    Pascalcase,
}

impl CaseFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "upcase" => Some(CaseFunction::Upcase),
            "downcase" => Some(CaseFunction::Downcase),
            "capitalize" => Some(CaseFunction::Capitalize),
            "camelcase" => Some(CaseFunction::Camelcase),
            "pascalcase" => Some(CaseFunction::Pascalcase),
            _ => None,
        }
    }

    pub fn apply(&self, value: &str) -> String {
        match self {
            CaseFunction::Upcase => value.to_uppercase(),
            CaseFunction::Downcase => value.to_lowercase(),
            CaseFunction::Capitalize => capitalize(value),
            CaseFunction::Camelcase => {
                let mut out = String::with_capacity(value.len());
                for (i, word) in words(value).enumerate() {
                    if i == 0 {
                        let mut chars = word.chars();
                        if let Some(first) = chars.next() {
                            out.extend(first.to_lowercase());
                            out.push_str(chars.as_str());
                        }
                    } else {
                        out.push_str(&capitalize(word));
                    }
                }
                out
            }
            CaseFunction::Pascalcase => words(value).map(capitalize).collect(),
        }
    }
}

fn words(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A piece of the format part of a transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatToken {
    Text(String),
    /// `$1`, `${1}` or `$NAME`: a capture group of the match when numeric, a variable
    /// otherwise
    Reference(String),
    CaseChange(CaseChange),
    /// `${1:/upcase}`
    Function {
        reference: String,
        function: CaseFunction,
    },
    /// `${1:+if}`, `${1:?if:else}`, `${1:-else}` and `${1:else}`
    Conditional {
        reference: String,
        if_set: Vec<FormatToken>,
        if_empty: Vec<FormatToken>,
    },
}

/// The case directives in effect while a format string is being written
#[derive(Debug, Default)]
struct CaseState {
    global: Option<CaseChange>,
    /// Whether the next char should be upper-cased (`true`) or lower-cased
    next: Option<bool>,
}

impl CaseState {
    fn set(&mut self, change: CaseChange) {
        match change {
            CaseChange::UpperNext => self.next = Some(true),
            CaseChange::LowerNext => self.next = Some(false),
            CaseChange::Upper | CaseChange::Lower => self.global = Some(change),
            CaseChange::End => self.global = None,
        }
    }

    fn push(&mut self, out: &mut String, text: &str) {
        let mut chars = text.chars();
        if let Some(upper) = self.next
            && let Some(first) = chars.next()
        {
            self.next = None;
            if upper {
                out.extend(first.to_uppercase());
            } else {
                out.extend(first.to_lowercase());
            }
        }
        let rest = chars.as_str();
        match self.global {
            Some(CaseChange::Upper) => out.push_str(&rest.to_uppercase()),
            Some(CaseChange::Lower) => out.push_str(&rest.to_lowercase()),
            _ => out.push_str(rest),
        }
    }
}

/// A regex substitution applied to a value: every match of `guard` is replaced by the
/// formatted `format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    guard: String,
    format: Vec<FormatToken>,
    /// `g` replaces every match instead of the first one, `i` ignores case.
    /// `^` and `$` always match at line boundaries so `m` changes nothing.
    flags: String,
    /// `None` when the guard doesn't compile
    regex: Option<Regex>,
}

impl Transform {
    /// Compiles the guard once. A guard that doesn't compile gives a transform that leaves
    /// values untouched.
    pub fn new(
        guard: impl Into<String>,
        format: Vec<FormatToken>,
        flags: impl Into<String>,
    ) -> Self {
        let guard = guard.into();
        let flags = flags.into();
        let regex = match Regex::with_options(&guard, flags.contains('i')) {
            Ok(r) => Some(r),
            Err(_e) => {
                #[cfg(feature = "debug")]
                log::debug!("[Transform::new] invalid guard {guard:?}: {_e}");
                None
            }
        };
        Self {
            guard,
            format,
            flags,
            regex,
        }
    }

    pub fn guard(&self) -> &str {
        &self.guard
    }

    pub fn format(&self) -> &[FormatToken] {
        &self.format
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains('g')
    }

    /// Applies the transform. `lookup` resolves the named variables used in the format.
    pub fn apply(&self, value: &str, lookup: &dyn Fn(&str) -> String) -> String {
        let Some(regex) = &self.regex else {
            return value.to_owned();
        };

        let mut out = String::with_capacity(value.len());
        let mut case = CaseState::default();
        let mut pos = 0;

        while pos <= value.len()
            && let Some(captures) = regex.find_at(value, pos)
        {
            let Some((start, end)) = captures.first().copied().flatten() else {
                break;
            };
            out.push_str(&value[pos..start]);
            let groups: Vec<&str> = captures
                .iter()
                .map(|c| c.map(|(s, e)| &value[s..e]).unwrap_or(""))
                .collect();
            render(&self.format, &groups, lookup, &mut case, &mut out);

            if end > start {
                pos = end;
            } else if let Some(c) = value[start..].chars().next() {
                // an empty match keeps the char it sits on
                out.push(c);
                pos = start + c.len_utf8();
            } else {
                pos = value.len();
                break;
            }
            if !self.is_global() {
                break;
            }
        }

        out.push_str(&value[pos.min(value.len())..]);
        out
    }
}

fn render(
    tokens: &[FormatToken],
    groups: &[&str],
    lookup: &dyn Fn(&str) -> String,
    case: &mut CaseState,
    out: &mut String,
) {
    let resolve = |reference: &str| -> String {
        match reference.parse::<usize>() {
            Ok(n) => groups.get(n).map(|g| (*g).to_owned()).unwrap_or_default(),
            Err(_) => lookup(reference),
        }
    };

    for token in tokens {
        match token {
            FormatToken::Text(text) => case.push(out, text),
            FormatToken::Reference(reference) => case.push(out, &resolve(reference)),
            FormatToken::CaseChange(change) => case.set(*change),
            FormatToken::Function {
                reference,
                function,
            } => case.push(out, &function.apply(&resolve(reference))),
            FormatToken::Conditional {
                reference,
                if_set,
                if_empty,
            } => {
                let branch = if resolve(reference).is_empty() {
                    if_empty
                } else {
                    if_set
                };
                render(branch, groups, lookup, case, out);
            }
        }
    }
}
