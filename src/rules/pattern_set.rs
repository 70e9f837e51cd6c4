use std::fmt::{Debug, Formatter};

use crate::error::{Error, TesseraResult};
use crate::rules::regex::{CapturePositions, Regex, adjust_backreferences};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    /// Index of the rule that matched, in declaration order
    pub rule: usize,
    pub start: usize,
    pub end: usize,
    /// Positions relative to the rule itself: index 0 is the whole match followed
    /// by the rule's own capture groups
    pub capture_pos: CapturePositions,
}

/// Where a rule lives inside the combined regex
#[derive(Debug, Clone, Copy)]
struct RuleGroup {
    /// Index of the group wrapping the whole rule
    group: usize,
    /// How many groups the rule declares itself
    captures: usize,
}

/// All the rules of a state compiled into a single alternation: `(r0)|(r1)|...`.
///
/// Alternation tries the branches in order so when several rules could match at the same
/// position, the one declared first wins. Which rule fired is found by looking at which
/// wrapping group participated in the match.
pub struct PatternSet {
    groups: Vec<RuleGroup>,
    regex: Option<Regex>,
}

/// A pattern as given to a [`PatternSet`]
#[derive(Debug, Clone)]
pub struct PatternSource<'a> {
    pub pattern: &'a str,
    pub case_insensitive: bool,
}

impl PatternSet {
    /// Compiles every rule on its own first so a broken regex is reported with the
    /// state and rule index it belongs to, then builds the combined regex.
    pub fn new(state: &str, items: &[PatternSource]) -> TesseraResult<Self> {
        if items.is_empty() {
            return Ok(Self {
                groups: Vec::new(),
                regex: None,
            });
        }

        let mut groups = Vec::with_capacity(items.len());
        let mut alternatives = Vec::with_capacity(items.len());
        let mut next_group = 1;

        for (index, item) in items.iter().enumerate() {
            let single = Regex::with_options(item.pattern, item.case_insensitive).map_err(|e| {
                Error::InvalidRegex {
                    state: state.to_owned(),
                    index,
                    pattern: item.pattern.to_owned(),
                    message: e.to_string(),
                }
            })?;
            let captures = single.captures_len();
            let body = adjust_backreferences(item.pattern, next_group);
            if item.case_insensitive {
                alternatives.push(format!("((?i:{body}))"));
            } else {
                alternatives.push(format!("({body})"));
            }
            groups.push(RuleGroup {
                group: next_group,
                captures,
            });
            next_group += captures + 1;
        }

        let combined = alternatives.join("|");
        let regex = Regex::new(combined.as_str()).map_err(|e| Error::InvalidRegex {
            state: state.to_owned(),
            index: 0,
            pattern: combined.clone(),
            message: e.to_string(),
        })?;

        Ok(Self {
            groups,
            regex: Some(regex),
        })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of capture groups declared by the given rule
    pub fn rule_captures(&self, rule: usize) -> usize {
        self.groups.get(rule).map(|g| g.captures).unwrap_or(0)
    }

    pub fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regex = self.regex.as_ref()?;
        let captures = regex.find_at(text, pos)?;
        let (start, end) = captures.first().copied().flatten()?;

        let (rule, group) = self
            .groups
            .iter()
            .enumerate()
            .find(|(_, g)| captures.get(g.group).copied().flatten().is_some())?;

        let capture_pos = (group.group..=group.group + group.captures)
            .map(|i| captures.get(i).copied().flatten())
            .collect();

        Some(PatternSetMatch {
            rule,
            start,
            end,
            capture_pos,
        })
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.groups.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources<'a>(patterns: &[&'a str]) -> Vec<PatternSource<'a>> {
        patterns
            .iter()
            .map(|p| PatternSource {
                pattern: p,
                case_insensitive: false,
            })
            .collect()
    }

    #[test]
    fn first_declared_rule_wins_at_same_position() {
        let set = PatternSet::new("start", &sources(&["[a-z]+", "[a-z]+\\d"])).unwrap();
        let m = set.find_at("ab1", 0).unwrap();
        assert_eq!(m.rule, 0);
        assert_eq!((m.start, m.end), (0, 2));
    }

    #[test]
    fn earliest_position_wins_over_rule_order() {
        let set = PatternSet::new("start", &sources(&["\\d+", "[a-z]+"])).unwrap();
        let m = set.find_at("ab 12", 0).unwrap();
        assert_eq!(m.rule, 1);
    }

    #[test]
    fn capture_positions_are_relative_to_the_rule() {
        let set = PatternSet::new("start", &sources(&["(x)(y)", "(a)(b)(c)"])).unwrap();
        let m = set.find_at("--abc", 0).unwrap();
        assert_eq!(m.rule, 1);
        assert_eq!(
            m.capture_pos,
            vec![Some((2, 5)), Some((2, 3)), Some((3, 4)), Some((4, 5))]
        );
        assert_eq!(set.rule_captures(0), 2);
    }

    #[test]
    fn backreferences_still_work_once_combined() {
        let set = PatternSet::new("start", &sources(&["(\\d)", "(['\"]).*?\\1"])).unwrap();
        let m = set.find_at("'a\"b'", 0).unwrap();
        assert_eq!(m.rule, 1);
        assert_eq!((m.start, m.end), (0, 5));
    }

    #[test]
    fn invalid_rule_is_reported_with_its_index() {
        let err = PatternSet::new("string", &sources(&["ok", "(broken"])).unwrap_err();
        match err {
            Error::InvalidRegex { state, index, .. } => {
                assert_eq!(state, "string");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn case_insensitivity_is_per_rule() {
        let set = PatternSet::new(
            "start",
            &[
                PatternSource {
                    pattern: "select",
                    case_insensitive: true,
                },
                PatternSource {
                    pattern: "from",
                    case_insensitive: false,
                },
            ],
        )
        .unwrap();
        assert_eq!(set.find_at("SELECT", 0).unwrap().rule, 0);
        assert!(set.find_at("FROM", 0).is_none());
    }
}
