use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TesseraResult;
use crate::rules::{Rule, RuleEntry, RuleTable, TokenSpec, Transition};
use crate::tokenizer::TEXT_TOKEN;

/// The token type(s) of a rule
///
/// # Examples
/// ```json
/// "keyword.control"
/// ```
///
/// ```json
/// ["storage.type", "text", "entity.name.function"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawToken {
    Single(String),
    /// One type per capture group
    Groups(Vec<String>),
}

impl Default for RawToken {
    fn default() -> Self {
        RawToken::Single(TEXT_TOKEN.to_owned())
    }
}

/// The target of a `push`: either the name of a state or an inline list of rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPush {
    State(String),
    Rules(Vec<RawEntry>),
}

/// A single rule
///
/// # Examples
/// ```json
/// {
///   "token": "comment.start",
///   "regex": "/\\*",
///   "push": "comment"
/// }
/// ```
///
/// ```json
/// {
///   "token": "keyword",
///   "regex": "\\b(?:select|from|where)\\b",
///   "caseInsensitive": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    #[serde(default)]
    pub token: RawToken,
    pub regex: String,
    /// Name of the state to switch to. `"pop"` is understood as a pop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<RawPush>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pop: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub case_insensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
}

/// An entry in the rule list of a state
///
/// # Examples
/// ```json
/// { "include": "string" }
/// ```
///
/// ```json
/// { "defaultToken": "comment.block" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
    Include {
        include: String,
    },
    DefaultToken {
        #[serde(rename = "defaultToken")]
        default_token: String,
    },
    Rule(RawRule),
}

/// A rule table as found in a JSON file: a map from state name to rules.
///
/// # Examples
/// ```json
/// {
///   "start": [
///     { "token": "comment", "regex": "/\\*", "push": "comment" },
///     { "token": "number", "regex": "\\d+" }
///   ],
///   "comment": [
///     { "token": "comment", "regex": "\\*/", "pop": true },
///     { "defaultToken": "comment" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RawRuleTable {
    pub states: BTreeMap<String, Vec<RawEntry>>,
}

impl RawRuleTable {
    pub fn load_from_file(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let raw = serde_json::from_reader(reader)?;
        Ok(raw)
    }

    pub fn from_json(json: &str) -> TesseraResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> TesseraResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_rule_table(&self) -> RuleTable {
        RuleTable {
            states: self
                .states
                .iter()
                .map(|(name, entries)| (name.clone(), entries.iter().map(convert_entry).collect()))
                .collect(),
        }
    }
}

fn convert_entry(entry: &RawEntry) -> RuleEntry {
    match entry {
        RawEntry::Include { include } => RuleEntry::Include(include.clone()),
        RawEntry::DefaultToken { default_token } => RuleEntry::DefaultToken(default_token.clone()),
        RawEntry::Rule(raw) => RuleEntry::Rule(convert_rule(raw)),
    }
}

fn convert_rule(raw: &RawRule) -> Rule {
    let token = match &raw.token {
        RawToken::Single(t) => TokenSpec::Literal(t.clone()),
        RawToken::Groups(t) => TokenSpec::Groups(t.clone()),
    };
    let mut rule = Rule::new(token, raw.regex.clone());

    rule.transition = match (&raw.push, raw.pop, raw.next.as_deref()) {
        (Some(RawPush::State(s)), _, _) => Some(Transition::Push(s.clone())),
        (Some(RawPush::Rules(rules)), _, _) => Some(Transition::PushRules(
            rules.iter().map(convert_entry).collect(),
        )),
        (None, true, _) | (None, false, Some("pop")) => Some(Transition::Pop),
        (None, false, Some(next)) => Some(Transition::Next(next.to_owned())),
        (None, false, None) => None,
    };
    rule.case_insensitive = raw.case_insensitive;
    rule.merge = raw.merge.unwrap_or(true);
    rule
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{
        "start": [
            { "token": "comment", "regex": "/\\*", "push": "comment" },
            { "token": ["keyword", "text", "identifier"], "regex": "(let)(\\s+)(\\w+)" },
            { "token": "keyword", "regex": "\\bselect\\b", "caseInsensitive": true },
            { "token": "paren", "regex": "\\(", "push": [
                { "token": "paren", "regex": "\\)", "next": "pop" },
                { "include": "start" }
            ]},
            { "regex": "\\s+", "merge": false }
        ],
        "comment": [
            { "token": "comment", "regex": "\\*/", "pop": true },
            { "defaultToken": "comment" }
        ]
    }"#;

    #[test]
    fn can_parse_all_entry_kinds() {
        let raw = RawRuleTable::from_json(TABLE).unwrap();
        let start = &raw.states["start"];
        assert_eq!(start.len(), 5);
        assert!(matches!(&start[1], RawEntry::Rule(r) if matches!(&r.token, RawToken::Groups(g) if g.len() == 3)));
        assert!(matches!(&start[3], RawEntry::Rule(r) if matches!(&r.push, Some(RawPush::Rules(rules)) if rules.len() == 2)));
        assert!(matches!(&start[4], RawEntry::Rule(r) if r.token == RawToken::default() && r.merge == Some(false)));
        assert!(matches!(&raw.states["comment"][1], RawEntry::DefaultToken { default_token } if default_token == "comment"));
    }

    #[test]
    fn converts_to_rule_table() {
        let table = RawRuleTable::from_json(TABLE).unwrap().to_rule_table();
        let start = table.state("start").unwrap();

        let RuleEntry::Rule(comment) = &start[0] else {
            panic!("expected rule");
        };
        assert!(matches!(comment.transition(), Some(Transition::Push(s)) if s == "comment"));

        let RuleEntry::Rule(keyword) = &start[2] else {
            panic!("expected rule");
        };
        assert!(keyword.case_insensitive);

        let RuleEntry::Rule(ws) = &start[4] else {
            panic!("expected rule");
        };
        assert!(!ws.merge);

        let RuleEntry::Rule(close) = &table.state("comment").unwrap()[0] else {
            panic!("expected rule");
        };
        assert!(matches!(close.transition(), Some(Transition::Pop)));
    }

    #[test]
    fn serializes_back_to_equivalent_json() {
        let raw = RawRuleTable::from_json(TABLE).unwrap();
        let json = raw.to_json().unwrap();
        assert_eq!(RawRuleTable::from_json(&json).unwrap(), raw);
    }
}
