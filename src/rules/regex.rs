use std::fmt;
use std::sync::Arc;

use onig::{RegexOptions, Region, SearchOptions, Syntax};

/// Capture positions of a single match, as absolute byte offsets.
/// Index 0 is the whole match; groups that did not participate are `None`.
pub type CapturePositions = Vec<Option<(usize, usize)>>;

/// A compiled regex that remembers the pattern it was built from.
///
/// Unlike a lazily compiled wrapper, construction fails immediately on an invalid
/// pattern so rule tables and snippet triggers are validated when registered.
#[derive(Clone)]
pub struct Regex {
    pattern: String,
    compiled: Arc<onig::Regex>,
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Regex {}

impl Regex {
    pub fn new(pattern: impl Into<String>) -> Result<Self, onig::Error> {
        Self::with_options(pattern, false)
    }

    pub fn with_options(pattern: impl Into<String>, ignore_case: bool) -> Result<Self, onig::Error> {
        let pattern = pattern.into();
        let mut options = RegexOptions::REGEX_OPTION_CAPTURE_GROUP;
        if ignore_case {
            options |= RegexOptions::REGEX_OPTION_IGNORECASE;
        }
        let compiled = onig::Regex::with_options(&pattern, options, Syntax::default())?;
        Ok(Self {
            pattern,
            compiled: Arc::new(compiled),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Number of capture groups, not counting the implicit group 0
    pub fn captures_len(&self) -> usize {
        self.compiled.captures_len()
    }

    /// Search for the first match at or after byte `pos`.
    /// We search the full text rather than a slice so lookbehinds and `^` see the real
    /// start of the line.
    pub fn find_at(&self, text: &str, pos: usize) -> Option<CapturePositions> {
        if pos > text.len() {
            return None;
        }
        let mut region = Region::new();
        self.compiled.search_with_options(
            text,
            pos,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        Some((0..region.len()).map(|i| region.pos(i)).collect())
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.find_at(text, 0).is_some()
    }

    /// Returns the text of every group of the first match, empty strings for
    /// groups that did not participate.
    pub fn captures(&self, text: &str) -> Option<Vec<String>> {
        let positions = self.find_at(text, 0)?;
        Some(
            positions
                .into_iter()
                .map(|pos| pos.map(|(s, e)| text[s..e].to_owned()).unwrap_or_default())
                .collect(),
        )
    }
}

/// Renumbers `\N` backreferences so they still point at the right group once the
/// pattern is embedded in a bigger regex where `offset` groups come before it.
pub(crate) fn adjust_backreferences(pattern: &str, offset: usize) -> String {
    if offset == 0 || !pattern.contains('\\') {
        return pattern.to_owned();
    }

    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek().copied() {
                Some(d) if !in_class && d.is_ascii_digit() && d != '0' => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().copied()
                        && d.is_ascii_digit()
                    {
                        digits.push(d);
                        chars.next();
                    }
                    let group: usize = digits.parse().unwrap_or(0);
                    out.push('\\');
                    out.push_str(&(group + offset).to_string());
                }
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                None => out.push('\\'),
            },
            '[' => {
                in_class = true;
                out.push(c);
            }
            ']' => {
                in_class = false;
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out
}

/// Escapes every regex metacharacter of `text` so it matches literally.
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\^$.|?*+()[]{}-/".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_fails_on_construction() {
        assert!(Regex::new("(unclosed").is_err());
        assert!(Regex::new("[a-z]+").is_ok());
    }

    #[test]
    fn find_at_keeps_absolute_positions() {
        let re = Regex::new(r"(\d+)").unwrap();
        let caps = re.find_at("ab 12 cd 34", 6).unwrap();
        assert_eq!(caps[0], Some((9, 11)));
        assert_eq!(caps[1], Some((9, 11)));
    }

    #[test]
    fn lookbehind_sees_text_before_search_start() {
        let re = Regex::new(r"(?<=a)b").unwrap();
        assert_eq!(re.find_at("ab", 1).unwrap()[0], Some((1, 2)));
    }

    #[test]
    fn can_ignore_case() {
        let re = Regex::with_options("select", true).unwrap();
        assert!(re.is_match("SELECT *"));
        assert!(!Regex::new("select").unwrap().is_match("SELECT *"));
    }

    #[test]
    fn backreferences_are_shifted() {
        assert_eq!(adjust_backreferences(r#"(['"])\w+\1"#, 3), r#"(['"])\w+\4"#);
        assert_eq!(adjust_backreferences(r"\\1", 3), r"\\1");
        assert_eq!(adjust_backreferences(r"[\1]\1", 2), r"[\1]\3");
        assert_eq!(adjust_backreferences(r"\d\1", 0), r"\d\1");
    }

    #[test]
    fn escape_makes_literal_pattern() {
        let re = Regex::new(escape("a.b*(c)")).unwrap();
        assert!(re.is_match("xa.b*(c)y"));
        assert!(!re.is_match("aXbbc"));
    }
}
