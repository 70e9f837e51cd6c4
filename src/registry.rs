use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "dump")]
use serde::{Deserialize, Serialize};

use crate::engine::SnippetEngine;
use crate::error::{Error, TesseraResult};
use crate::options::TokenizerOptions;
use crate::rules::{RawRuleTable, RuleTable};
use crate::snippets::{SnippetDefinition, parse_snippet_file};
use crate::tokenizer::{LineTokens, START_STATE, Tokenizer};

/// What gets written by [`Registry::dump_to_file`]. Tables and snippets are kept as JSON
/// so the dump doesn't depend on the in-memory layout of the rules.
#[cfg(feature = "dump")]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Dump {
    modes: Vec<(String, String)>,
    aliases: Vec<(String, String)>,
    snippets: Vec<(String, String)>,
}

/// The mode where nothing is highlighted
pub const PLAIN_MODE_NAME: &str = "plain";

#[inline]
pub(crate) fn normalize_string(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// The main struct in tessera.
///
/// Holds the rule table of every mode, compiled once when added, and the snippets available
/// for each of them.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    // Vector of compiled modes for ID-based access
    modes: Vec<Arc<Tokenizer>>,
    // the name each mode was added with
    names: Vec<String>,
    // the JSON tables modes were loaded from, if any. Modes built in code can't be dumped
    raw: Vec<Option<RawRuleTable>>,
    // mode name or alias -> mode ID
    mode_id_by_name: HashMap<String, usize>,
    // scope -> snippets, in registration order
    snippets: BTreeMap<String, Vec<SnippetDefinition>>,
    options: TokenizerOptions,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options used to compile the modes added afterwards
    pub fn with_options(options: TokenizerOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    fn insert_mode(&mut self, name: &str, tokenizer: Tokenizer, raw: Option<RawRuleTable>) {
        let tokenizer = Arc::new(tokenizer);
        match self.mode_id_by_name.get(name) {
            Some(&id) => {
                self.modes[id] = tokenizer;
                self.raw[id] = raw;
            }
            None => {
                self.mode_id_by_name.insert(name.to_owned(), self.modes.len());
                self.modes.push(tokenizer);
                self.names.push(name.to_owned());
                self.raw.push(raw);
            }
        }
    }

    /// Compiles and adds a mode, replacing any mode with the same name
    pub fn add_mode(&mut self, name: &str, table: &RuleTable) -> TesseraResult<()> {
        let tokenizer = Tokenizer::with_options(table, self.options)?;
        self.insert_mode(name, tokenizer, None);
        Ok(())
    }

    pub fn add_mode_from_raw(&mut self, name: &str, raw: RawRuleTable) -> TesseraResult<()> {
        let tokenizer = Tokenizer::with_options(&raw.to_rule_table(), self.options)?;
        self.insert_mode(name, tokenizer, Some(raw));
        Ok(())
    }

    /// Reads a JSON rule table and adds it as a mode.
    pub fn add_mode_from_path(&mut self, name: &str, path: impl AsRef<Path>) -> TesseraResult<()> {
        let raw = RawRuleTable::load_from_file(path)?;
        self.add_mode_from_raw(name, raw)
    }

    /// Adds a mode with no rule: every line is a single `text` token.
    /// Useful as a fallback if the mode is not found.
    ///
    /// It will get the `plain` mode name.
    pub fn add_plain_mode(&mut self, aliases: &[&str]) -> TesseraResult<()> {
        let raw = RawRuleTable {
            states: BTreeMap::from([(START_STATE.to_owned(), Vec::new())]),
        };
        self.add_mode_from_raw(PLAIN_MODE_NAME, raw)?;
        for alias in aliases {
            self.add_alias(PLAIN_MODE_NAME, alias);
        }
        Ok(())
    }

    /// Adds an alias for the given mode
    pub fn add_alias(&mut self, mode_name: &str, alias: &str) {
        if let Some(mode_id) = self.mode_id_by_name.get(mode_name) {
            self.mode_id_by_name.insert(alias.to_string(), *mode_id);
        }
    }

    /// Checks whether the given mode is available in the registry with its name or aliases
    pub fn contains_mode(&self, name: &str) -> bool {
        self.mode_id_by_name.contains_key(name)
    }

    pub fn tokenizer(&self, name: &str) -> TesseraResult<Arc<Tokenizer>> {
        self.mode_id_by_name
            .get(name)
            .map(|id| Arc::clone(&self.modes[*id]))
            .ok_or_else(|| Error::ModeNotFound(name.to_string()))
    }

    /// Tokenizes a whole text with the given mode, or with the plain mode if it's not
    /// found and `fallback_to_plain` is set.
    pub fn tokenize(
        &self,
        name: &str,
        content: &str,
        fallback_to_plain: bool,
    ) -> TesseraResult<Vec<LineTokens>> {
        let mode_id = *self
            .mode_id_by_name
            .get(name)
            .or_else(|| {
                if fallback_to_plain {
                    self.mode_id_by_name.get(PLAIN_MODE_NAME)
                } else {
                    None
                }
            })
            .ok_or_else(|| Error::ModeNotFound(name.to_string()))?;

        let normalized_content = normalize_string(content);
        Ok(self.modes[mode_id].tokenize_lines(&normalized_content))
    }

    /// Adds snippets for a scope, usually a mode name. `None` makes them available in all
    /// modes.
    pub fn add_snippets(
        &mut self,
        scope: Option<&str>,
        definitions: impl IntoIterator<Item = SnippetDefinition>,
    ) {
        let scope = scope.unwrap_or(crate::snippets::GLOBAL_SCOPE);
        self.snippets
            .entry(scope.to_owned())
            .or_default()
            .extend(definitions);
    }

    /// Reads a snippet file and adds its snippets to the scope
    pub fn add_snippets_from_path(
        &mut self,
        scope: Option<&str>,
        path: impl AsRef<Path>,
    ) -> TesseraResult<()> {
        let text = std::fs::read_to_string(path)?;
        self.add_snippets(scope, parse_snippet_file(&text));
        Ok(())
    }

    /// A snippet engine knowing about every snippet of the registry
    pub fn snippet_engine(&self) -> TesseraResult<SnippetEngine> {
        let mut engine = SnippetEngine::new()?;
        for (scope, definitions) in &self.snippets {
            engine.register_snippets(definitions.iter().cloned(), Some(scope))?;
        }
        Ok(engine)
    }

    #[cfg(feature = "dump")]
    /// Dump the modes loaded from JSON and the snippets to a compressed binary file
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> TesseraResult<()> {
        let mut dump = Dump::default();
        for (id, name) in self.names.iter().enumerate() {
            match &self.raw[id] {
                Some(raw) => dump.modes.push((name.clone(), raw.to_json()?)),
                None => {
                    #[cfg(feature = "debug")]
                    log::debug!("[Registry::dump_to_file] mode {name} was built in code, skipping");
                }
            }
        }
        for (alias, id) in &self.mode_id_by_name {
            if &self.names[*id] != alias && self.raw[*id].is_some() {
                dump.aliases.push((alias.clone(), self.names[*id].clone()));
            }
        }
        dump.aliases.sort();
        for (scope, definitions) in &self.snippets {
            dump.snippets
                .push((scope.clone(), serde_json::to_string(definitions)?));
        }

        let encoded = bitcode::serialize(&dump).map_err(Error::DumpEncode)?;
        let compressed = zstd::encode_all(encoded.as_slice(), 0)?;
        std::fs::write(path, compressed)?;
        Ok(())
    }

    #[cfg(feature = "dump")]
    fn load_from_bytes(compressed_data: &[u8]) -> TesseraResult<Self> {
        let encoded = zstd::decode_all(compressed_data)?;
        let dump: Dump = bitcode::deserialize(&encoded).map_err(Error::DumpDecode)?;

        let mut registry = Registry::default();
        for (name, json) in dump.modes {
            registry.add_mode_from_raw(&name, RawRuleTable::from_json(&json)?)?;
        }
        for (alias, name) in dump.aliases {
            registry.add_alias(&name, &alias);
        }
        for (scope, json) in dump.snippets {
            let definitions: Vec<SnippetDefinition> = serde_json::from_str(&json)?;
            registry.add_snippets(Some(&scope), definitions);
        }
        Ok(registry)
    }

    #[cfg(feature = "dump")]
    /// Read a binary dump written by [`Registry::dump_to_file`]
    pub fn load_from_file(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let compressed_data = std::fs::read(path)?;
        Self::load_from_bytes(&compressed_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;
    use crate::tokenizer::Token;

    const SIMPLE: &str = r#"{
        "start": [
            { "token": "number", "regex": "\\d+" },
            { "token": "text", "regex": "\\s+" },
            { "token": "word", "regex": "[a-z]+" }
        ]
    }"#;

    fn format_tokens(lines: &[LineTokens]) -> String {
        let mut out = String::new();
        for (line_idx, line) in lines.iter().enumerate() {
            for token in &line.tokens {
                out.push_str(&format!("{line_idx}: {} {:?}\n", token.kind, token.value));
            }
        }
        out
    }

    #[test]
    fn tokenizes_with_a_json_mode() {
        let mut registry = Registry::new();
        registry
            .add_mode_from_raw("simple", RawRuleTable::from_json(SIMPLE).unwrap())
            .unwrap();
        let lines = registry.tokenize("simple", "ab 12 cd", false).unwrap();
        assert_eq!(
            lines[0].tokens,
            vec![
                Token::new("word", "ab"),
                Token::new("text", " "),
                Token::new("number", "12"),
                Token::new("text", " "),
                Token::new("word", "cd"),
            ]
        );
        assert_eq!(lines[0].state.current(), START_STATE);
    }

    #[test]
    fn plain_mode_and_fallback() {
        let mut registry = Registry::new();
        registry.add_plain_mode(&["txt"]).unwrap();
        assert!(registry.contains_mode("txt"));

        let lines = registry.tokenize("unknown", "a b\r\nc", true).unwrap();
        insta::assert_snapshot!(format_tokens(&lines), @r#"
        0: text "a b"
        1: text "c"
        "#);
        assert!(matches!(
            registry.tokenize("unknown", "a", false),
            Err(Error::ModeNotFound(name)) if name == "unknown"
        ));
    }

    #[test]
    fn modes_are_compiled_once() {
        let mut registry = Registry::new();
        registry
            .add_mode(
                "words",
                &RuleTable::new().with_state("start", [Rule::new("word", r"\w+")]),
            )
            .unwrap();
        registry.add_alias("words", "w");
        let a = registry.tokenizer("words").unwrap();
        let b = registry.tokenizer("w").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn invalid_tables_are_rejected() {
        let mut registry = Registry::new();
        let raw = RawRuleTable::from_json(r#"{"start": [{"token": "x", "regex": "("}]}"#).unwrap();
        assert!(matches!(
            registry.add_mode_from_raw("broken", raw),
            Err(Error::InvalidRegex { .. })
        ));
        assert!(!registry.contains_mode("broken"));
    }

    #[test]
    fn snippet_engine_gets_the_snippets() {
        let mut registry = Registry::new();
        registry.add_snippets(Some("rust"), vec![SnippetDefinition::new("fn", "fn $1() {}")]);
        registry.add_snippets(None, vec![SnippetDefinition::new("todo", "TODO: $0")]);
        let engine = registry.snippet_engine().unwrap();
        assert_eq!(engine.snippets().snippets("rust").len(), 1);
        assert_eq!(engine.snippets().snippets("_").len(), 1);
    }

    #[cfg(feature = "dump")]
    #[test]
    fn dump_round_trip() {
        let mut registry = Registry::new();
        registry
            .add_mode_from_raw("simple", RawRuleTable::from_json(SIMPLE).unwrap())
            .unwrap();
        registry.add_alias("simple", "s");
        registry.add_snippets(Some("simple"), vec![SnippetDefinition::new("x", "$1")]);

        let path = std::env::temp_dir().join("tessera-dump-round-trip.zst");
        registry.dump_to_file(&path).unwrap();
        let loaded = Registry::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            loaded.tokenize("s", "ab 12", false).unwrap(),
            registry.tokenize("simple", "ab 12", false).unwrap()
        );
        assert_eq!(loaded.snippets, registry.snippets);
    }
}
