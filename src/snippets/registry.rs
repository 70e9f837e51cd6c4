use std::collections::BTreeMap;

use crate::error::{Error, TesseraResult};
use crate::rules::Regex;
use crate::rules::regex::escape;
use crate::snippets::file::SnippetDefinition;

/// The scope of snippets available in every mode
pub const GLOBAL_SCOPE: &str = "_";

/// Wraps an alternation in a non-capturing group unless it's already a single group
fn wrap(src: &str) -> String {
    let inner = src.strip_prefix('^').unwrap_or(src);
    let inner = inner.strip_suffix('$').unwrap_or(inner);
    let is_group = inner.starts_with('(') && inner.ends_with(')');
    if src.is_empty() || src == r"\b" || is_group {
        src.to_owned()
    } else {
        format!("(?:{src})")
    }
}

/// `guard` then `re` at the end of the text before the cursor
fn opening_regex(re: &str, guard: &str) -> String {
    let mut out = format!("{}{}", wrap(guard), wrap(re));
    if !out.is_empty() && !out.ends_with('$') {
        out.push('$');
    }
    out
}

/// `re` then `guard` at the start of the text after the cursor
fn closing_regex(re: &str, guard: &str) -> String {
    let mut out = format!("{}{}", wrap(re), wrap(guard));
    if !out.is_empty() && !out.starts_with('^') {
        out.insert(0, '^');
    }
    out
}

/// A registered snippet with its trigger regexes compiled
#[derive(Debug, Clone)]
pub struct Snippet {
    pub definition: SnippetDefinition,
    /// Whole guard + trigger, matched against the text before the cursor
    start: Option<Regex>,
    /// The part of the text before the cursor replaced by the snippet
    trigger: Option<Regex>,
    end: Option<Regex>,
    end_trigger: Option<Regex>,
}

impl Snippet {
    pub fn new(mut definition: SnippetDefinition) -> TesseraResult<Self> {
        if definition.trigger.is_none()
            && let Some(tab_trigger) = definition.tab_trigger.as_deref()
            && !tab_trigger.is_empty()
        {
            if definition.guard.is_none()
                && tab_trigger.starts_with(|c: char| c.is_alphanumeric() || c == '_')
            {
                definition.guard = Some(r"\b".to_owned());
            }
            definition.trigger = Some(escape(tab_trigger));
        }

        let name = definition
            .name
            .clone()
            .or_else(|| definition.tab_trigger.clone())
            .unwrap_or_default();
        let compile = |pattern: String| -> TesseraResult<Option<Regex>> {
            if pattern.is_empty() {
                return Ok(None);
            }
            Regex::new(pattern)
                .map(Some)
                .map_err(|e| Error::InvalidTrigger {
                    snippet: name.clone(),
                    message: e.to_string(),
                })
        };

        let trigger = definition.trigger.as_deref().unwrap_or_default();
        let guard = definition.guard.as_deref().unwrap_or_default();
        let end_trigger = definition.end_trigger.as_deref().unwrap_or_default();
        let end_guard = definition.end_guard.as_deref().unwrap_or_default();

        Ok(Self {
            start: compile(opening_regex(trigger, guard))?,
            trigger: compile(opening_regex(trigger, ""))?,
            end: compile(closing_regex(end_trigger, end_guard))?,
            end_trigger: compile(closing_regex(end_trigger, ""))?,
            definition,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.definition.content
    }

    /// Whether the snippet can be expanded by a trigger at all
    pub fn has_trigger(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    fn match_around(&self, before: &str, after: &str) -> Option<TriggerMatch> {
        if !self.has_trigger() {
            return None;
        }
        let before_captures = match &self.start {
            Some(re) => re.captures(before)?,
            None => vec![String::new()],
        };
        let after_captures = match &self.end {
            Some(re) => re.captures(after)?,
            None => vec![String::new()],
        };
        let replace_before = self
            .trigger
            .as_ref()
            .and_then(|re| re.captures(before))
            .and_then(|c| c.into_iter().next())
            .unwrap_or_default();
        let replace_after = self
            .end_trigger
            .as_ref()
            .and_then(|re| re.captures(after))
            .and_then(|c| c.into_iter().next())
            .unwrap_or_default();

        Some(TriggerMatch {
            snippet: self.clone(),
            before_captures,
            after_captures,
            replace_before,
            replace_after,
        })
    }
}

/// A snippet whose trigger matched around the cursor
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub snippet: Snippet,
    /// Groups of the match before the cursor, exposed as `M0`, `M1`...
    pub before_captures: Vec<String>,
    /// Groups of the match after the cursor, exposed as `T0`, `T1`...
    pub after_captures: Vec<String>,
    /// Text right before the cursor to remove before inserting
    pub replace_before: String,
    /// Text right after the cursor to remove before inserting
    pub replace_after: String,
}

/// Snippets grouped by scope, usually the id of the mode they apply to
#[derive(Debug, Clone, Default)]
pub struct SnippetRegistry {
    scopes: BTreeMap<String, Vec<Snippet>>,
    includes: BTreeMap<String, Vec<String>>,
}

impl SnippetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers snippets. A definition without a scope takes the scope of the previous
    /// one, `scope` for the first one, or the global scope.
    /// A snippet replaces the one with the same name in its scope.
    pub fn register(
        &mut self,
        definitions: impl IntoIterator<Item = SnippetDefinition>,
        scope: Option<&str>,
    ) -> TesseraResult<()> {
        let mut scope = scope.unwrap_or(GLOBAL_SCOPE).to_owned();
        for mut definition in definitions {
            match &definition.scope {
                Some(s) => scope = s.clone(),
                None => definition.scope = Some(scope.clone()),
            }
            let snippet = Snippet::new(definition)?;
            let list = self.scopes.entry(scope.clone()).or_default();
            if let Some(name) = snippet.name() {
                list.retain(|s| s.name() != Some(name));
            }
            list.push(snippet);
        }
        Ok(())
    }

    pub fn unregister(&mut self, scope: &str, name: &str) {
        if let Some(list) = self.scopes.get_mut(scope) {
            list.retain(|s| s.name() != Some(name));
        }
    }

    /// Makes the snippets of `included` available in `scope`
    pub fn include_scopes(&mut self, scope: &str, included: &[&str]) {
        let list = self.includes.entry(scope.to_owned()).or_default();
        for name in included {
            if !list.iter().any(|s| s == name) {
                list.push((*name).to_owned());
            }
        }
    }

    pub fn snippets(&self, scope: &str) -> &[Snippet] {
        self.scopes.get(scope).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &SnippetDefinition> {
        self.scopes.values().flatten().map(|s| &s.definition)
    }

    /// The scopes to look snippets up in, most specific first
    pub fn active_scopes(&self, mode: &str) -> Vec<String> {
        let mut scopes = vec![mode.to_owned()];
        for scope in self.includes.get(mode).into_iter().flatten() {
            if !scopes.contains(scope) {
                scopes.push(scope.clone());
            }
        }
        if !scopes.iter().any(|s| s == GLOBAL_SCOPE) {
            scopes.push(GLOBAL_SCOPE.to_owned());
        }
        scopes
    }

    /// Finds the snippet triggered by the text around the cursor.
    /// Scopes are tried in order, and in each the last registered snippet wins.
    pub fn find_trigger(&self, scopes: &[String], before: &str, after: &str) -> Option<TriggerMatch> {
        scopes.iter().find_map(|scope| {
            self.snippets(scope)
                .iter()
                .rev()
                .find_map(|s| s.match_around(before, after))
        })
    }

    /// Finds a snippet by name in the given scopes
    pub fn find_by_name(&self, scopes: &[String], name: &str) -> Option<&Snippet> {
        scopes
            .iter()
            .find_map(|scope| self.snippets(scope).iter().find(|s| s.name() == Some(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(defs: Vec<SnippetDefinition>, scope: &str) -> SnippetRegistry {
        let mut registry = SnippetRegistry::new();
        registry.register(defs, Some(scope)).unwrap();
        registry
    }

    #[test]
    fn trigger_regexes() {
        assert_eq!(opening_regex("fn", r"\b"), r"\b(?:fn)$");
        assert_eq!(opening_regex("(a|b)", ""), "(a|b)$");
        assert_eq!(closing_regex("x", r"\s"), r"^(?:x)(?:\s)");
        assert_eq!(opening_regex("", ""), "");
    }

    #[test]
    fn tab_triggers_match_whole_words() {
        let registry = registry(vec![SnippetDefinition::new("fn", "fn $1() {}")], "rust");
        let scopes = registry.active_scopes("rust");
        let m = registry.find_trigger(&scopes, "let x = fn", "").unwrap();
        assert_eq!(m.replace_before, "fn");
        assert_eq!(m.snippet.content(), "fn $1() {}");
        assert!(registry.find_trigger(&scopes, "let x = afn", "").is_none());
        assert!(registry.find_trigger(&scopes, "fn ", "").is_none());
    }

    #[test]
    fn symbols_need_no_word_boundary() {
        let registry = registry(vec![SnippetDefinition::new("->", "=> $0")], GLOBAL_SCOPE);
        let scopes = registry.active_scopes("rust");
        let m = registry.find_trigger(&scopes, "a->", "").unwrap();
        assert_eq!(m.replace_before, "->");
    }

    #[test]
    fn regex_triggers_expose_captures() {
        let def = SnippetDefinition {
            name: Some("tag".to_owned()),
            content: "<$M1>$0</$M1>".to_owned(),
            trigger: Some(r"(\w+)>".to_owned()),
            guard: Some("<".to_owned()),
            end_trigger: Some(">?".to_owned()),
            ..Default::default()
        };
        let registry = registry(vec![def], "html");
        let m = registry
            .find_trigger(&registry.active_scopes("html"), "text <div>", ">rest")
            .unwrap();
        assert_eq!(m.before_captures, vec!["<div>".to_owned(), "div".to_owned()]);
        assert_eq!(m.replace_before, "div>");
        assert_eq!(m.replace_after, ">");
    }

    #[test]
    fn same_name_replaces_and_latest_wins() {
        let mut registry = SnippetRegistry::new();
        registry
            .register(vec![SnippetDefinition::new("log", "first")], Some("js"))
            .unwrap();
        registry
            .register(vec![SnippetDefinition::new("log", "second")], Some("js"))
            .unwrap();
        assert_eq!(registry.snippets("js").len(), 1);

        let mut other = SnippetDefinition::new("log", "third");
        other.name = Some("log2".to_owned());
        registry.register(vec![other], Some("js")).unwrap();
        let m = registry
            .find_trigger(&registry.active_scopes("js"), "log", "")
            .unwrap();
        assert_eq!(m.snippet.content(), "third");

        registry.unregister("js", "log2");
        let m = registry
            .find_trigger(&registry.active_scopes("js"), "log", "")
            .unwrap();
        assert_eq!(m.snippet.content(), "second");
    }

    #[test]
    fn scopes_are_sticky_and_included() {
        let mut defs = vec![
            SnippetDefinition::new("a", "A"),
            SnippetDefinition::new("b", "B"),
        ];
        defs[0].scope = Some("css".to_owned());
        let mut registry = SnippetRegistry::new();
        registry.register(defs, None).unwrap();
        assert_eq!(registry.snippets("css").len(), 2);

        registry.include_scopes("html", &["css"]);
        assert_eq!(registry.active_scopes("html"), vec!["html", "css", "_"]);
        assert!(
            registry
                .find_trigger(&registry.active_scopes("html"), "b", "")
                .is_some()
        );
        assert!(registry.find_by_name(&registry.active_scopes("html"), "a").is_some());
    }

    #[test]
    fn invalid_trigger() {
        let def = SnippetDefinition {
            name: Some("broken".to_owned()),
            trigger: Some("(".to_owned()),
            ..Default::default()
        };
        let err = SnippetRegistry::new().register(vec![def], None).unwrap_err();
        assert!(matches!(err, Error::InvalidTrigger { snippet, .. } if snippet == "broken"));
    }

    #[test]
    fn snippets_without_trigger_are_never_matched() {
        let def = SnippetDefinition {
            name: Some("manual".to_owned()),
            content: "x".to_owned(),
            ..Default::default()
        };
        let registry = registry(vec![def], "_");
        assert!(registry.find_trigger(&["_".to_owned()], "anything", "").is_none());
    }
}
