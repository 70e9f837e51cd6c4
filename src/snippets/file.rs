//! The `.snippets` text format.
//!
//! ```text
//! # comment
//! snippet fn function definition
//! 	fn ${1:name}() {
//! 		$0
//! 	}
//! regex /^\s*/#inc/\b/
//! 	#include <$1>
//! {"name": "log", "tabTrigger": "log", "content": "log::debug!(\"$1\");"}
//! ```
//!
//! A record collects `key value` lines until its tab-indented body, which ends it.
//! JSON objects on their own line are complete records.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TesseraResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnippetDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Literal text typed before pressing tab
    #[serde(default, alias = "prefix", skip_serializing_if = "Option::is_none")]
    pub tab_trigger: Option<String>,
    #[serde(default, alias = "body", deserialize_with = "string_or_lines")]
    pub content: String,
    /// Regex matched before the cursor, takes precedence over `tab_trigger`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Regex that must match right before the trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Regex matched after the cursor, removed with the trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_guard: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Any other `key value` line of the record
    #[serde(skip)]
    pub extra: BTreeMap<String, String>,
}

fn string_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Body {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(match Body::deserialize(deserializer)? {
        Body::Text(text) => text,
        Body::Lines(lines) => lines.join("\n"),
    })
}

impl SnippetDefinition {
    pub fn new(tab_trigger: &str, content: &str) -> Self {
        Self {
            name: Some(tab_trigger.to_owned()),
            tab_trigger: Some(tab_trigger.to_owned()),
            content: content.to_owned(),
            ..Default::default()
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> TesseraResult<Vec<Self>> {
        let text = fs::read_to_string(path)?;
        Ok(parse_snippet_file(&text))
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "snippet" => {
                let trigger = value.split_whitespace().next().unwrap_or_default();
                self.tab_trigger = Some(trigger.to_owned());
                if self.name.is_none() {
                    self.name = Some(value.to_owned());
                }
            }
            "regex" => {
                let mut parts = split_guards(value)
                    .into_iter()
                    .map(|p| Some(p).filter(|p| !p.is_empty()));
                self.guard = parts.next().flatten();
                self.trigger = parts.next().flatten();
                self.end_trigger = parts.next().flatten();
                self.end_guard = parts.next().flatten();
            }
            "name" => self.name = Some(value.to_owned()),
            "tabTrigger" => self.tab_trigger = Some(value.to_owned()),
            "trigger" => self.trigger = Some(value.to_owned()),
            "guard" => self.guard = Some(value.to_owned()),
            "endTrigger" => self.end_trigger = Some(value.to_owned()),
            "endGuard" => self.end_guard = Some(value.to_owned()),
            "scope" => self.scope = Some(value.to_owned()),
            _ => {
                self.extra.insert(key.to_owned(), value.to_owned());
            }
        }
    }
}

/// Splits `/guard/trigger/endTrigger/endGuard`, keeping escaped slashes inside the parts
fn split_guards(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let Some(rest) = value.trim_end().strip_prefix('/') else {
        return parts;
    };

    let mut current = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '/' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Parses a snippet file. Records that can't be read, such as invalid JSON lines, are
/// skipped.
pub fn parse_snippet_file(text: &str) -> Vec<SnippetDefinition> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
    let mut snippets = Vec::new();
    let mut current = SnippetDefinition::default();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with('\t') {
            // blank lines belong to the body only when more indented lines follow
            let mut end = i;
            let mut j = i;
            while j < lines.len() && (lines[j].starts_with('\t') || lines[j].is_empty()) {
                if lines[j].starts_with('\t') {
                    end = j;
                }
                j += 1;
            }
            let body: Vec<&str> = lines[i..=end]
                .iter()
                .map(|l| l.strip_prefix('\t').unwrap_or(*l))
                .collect();
            current.content = body.join("\n");
            snippets.push(std::mem::take(&mut current));
            i = end + 1;
            continue;
        }

        if line.starts_with('{') {
            match serde_json::from_str::<SnippetDefinition>(line.trim_end()) {
                Ok(snippet) => snippets.push(snippet),
                Err(_e) => {
                    #[cfg(feature = "debug")]
                    log::debug!("[parse_snippet_file] skipping line {}: {_e}", i + 1);
                }
            }
        } else if !line.starts_with('#')
            && let Some((key, value)) = line.split_once(' ')
            && !key.is_empty()
        {
            current.set(key, value);
        }
        i += 1;
    }

    snippets
}

/// Writes snippets in the text format. The output parses back to the same definitions.
pub fn to_snippet_file(snippets: &[SnippetDefinition]) -> String {
    let mut out = String::new();

    for snippet in snippets {
        if !out.is_empty() {
            out.push('\n');
        }
        let name = snippet.name.as_deref();
        match snippet.tab_trigger.as_deref() {
            Some(trigger) => {
                let name_starts_with_trigger = name.is_some_and(|n| {
                    n.split_whitespace().next() == Some(trigger) && !trigger.is_empty()
                });
                if name_starts_with_trigger && let Some(name) = name {
                    out.push_str(&format!("snippet {name}\n"));
                } else {
                    if let Some(name) = name {
                        out.push_str(&format!("name {name}\n"));
                    }
                    out.push_str(&format!("tabTrigger {trigger}\n"));
                }
            }
            None => {
                if let Some(name) = name {
                    out.push_str(&format!("name {name}\n"));
                }
            }
        }

        let guards = [
            &snippet.guard,
            &snippet.trigger,
            &snippet.end_trigger,
            &snippet.end_guard,
        ];
        if guards.iter().any(|g| g.is_some()) {
            out.push_str("regex ");
            for guard in guards {
                out.push('/');
                out.push_str(guard.as_deref().unwrap_or_default());
            }
            out.push_str("/\n");
        }
        if let Some(scope) = &snippet.scope {
            out.push_str(&format!("scope {scope}\n"));
        }
        for (key, value) in &snippet.extra {
            out.push_str(&format!("{key} {value}\n"));
        }
        for line in snippet.content.split('\n') {
            out.push('\t');
            out.push_str(line);
            out.push('\n');
        }
    }

    out
}
