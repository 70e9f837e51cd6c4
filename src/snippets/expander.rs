use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::TesseraResult;
use crate::host::Position;
use crate::options::InsertOptions;
use crate::snippets::transform::Transform;
use crate::snippets::variables::{SnippetContext, VariableResolver};
use crate::snippets::{SnippetGrammar, SnippetToken, TabstopMarker, closing_index};

/// One occurrence of a tabstop in the expanded text, relative to the insertion point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabstopRange {
    pub start: Position,
    pub end: Position,
    /// Set on `${1/re/fmt/}` occurrences: their text is derived from the primary one
    pub transform: Option<Transform>,
}

/// All the occurrences of one tabstop id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabstopGroup {
    pub id: usize,
    /// In the order they appear in the text
    pub ranges: Vec<TabstopRange>,
    pub choices: Option<Vec<String>>,
    /// Ids of the tabstops this one is nested in
    pub parents: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedSnippet {
    pub text: String,
    /// Sorted in navigation order: ascending ids with `0` last
    pub tabstops: Vec<TabstopGroup>,
}

impl ExpandedSnippet {
    pub fn group(&self, id: usize) -> Option<&TabstopGroup> {
        self.tabstops.iter().find(|g| g.id == id)
    }

    pub fn navigation_order(&self) -> Vec<usize> {
        self.tabstops.iter().map(|g| g.id).collect()
    }

    /// Moves every range from snippet coordinates to buffer coordinates
    pub fn offset_by(mut self, origin: Position) -> Self {
        for group in &mut self.tabstops {
            for range in &mut group.ranges {
                range.start = range.start.offset_by(origin);
                range.end = range.end.offset_by(origin);
            }
        }
        self
    }
}

/// What a tabstop expands to wherever it's referenced
#[derive(Debug, Clone, Default)]
enum DefaultValue {
    #[default]
    Empty,
    Text(String),
    /// The default contains other tabstops
    Nested(Vec<SnippetToken>),
}

#[derive(Debug, Default)]
struct GroupInfo {
    value: DefaultValue,
    choices: Option<Vec<String>>,
    /// Markers of the occurrences, in the order they were instantiated
    occurrences: Vec<(usize, Option<Transform>)>,
    parents: BTreeSet<usize>,
}

fn text_of(tokens: &[SnippetToken]) -> String {
    tokens.iter().filter_map(|t| t.as_text()).collect()
}

/// Collects the default value and choices of every tabstop id
fn collect_defaults(tokens: &[SnippetToken]) -> BTreeMap<usize, GroupInfo> {
    let mut groups: BTreeMap<usize, GroupInfo> = BTreeMap::new();
    let mut seen = BTreeSet::new();

    for (index, token) in tokens.iter().enumerate() {
        let SnippetToken::Tabstop(t) = token else {
            continue;
        };
        let info = groups.entry(t.id).or_default();
        if !seen.insert(t.marker) {
            continue;
        }
        if info.choices.is_none() && t.choices.is_some() {
            info.choices = t.choices.clone();
        }
        let Some(end) = closing_index(tokens, index) else {
            continue;
        };
        let body = &tokens[index + 1..end];
        let nested = body.iter().any(|t| t.marker().is_some());
        if nested {
            if matches!(info.value, DefaultValue::Empty) {
                info.value = DefaultValue::Nested(body.to_vec());
            }
        } else if !body.is_empty() && !matches!(info.value, DefaultValue::Text(_)) {
            info.value = DefaultValue::Text(text_of(body));
        }
    }

    groups
}

/// Copies a nested default with fresh markers, leaving out the tabstops being expanded
fn copy_value(
    value: &[SnippetToken],
    expanding: &BTreeMap<usize, usize>,
    next_marker: &mut usize,
) -> Vec<SnippetToken> {
    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut copy = Vec::with_capacity(value.len());
    for token in value {
        match token {
            SnippetToken::Tabstop(t) => {
                if expanding.contains_key(&t.id) {
                    continue;
                }
                let marker = *remap.entry(t.marker).or_insert_with(|| {
                    *next_marker += 1;
                    *next_marker - 1
                });
                copy.push(SnippetToken::Tabstop(TabstopMarker {
                    marker,
                    id: t.id,
                    choices: None,
                    transform: None,
                }));
            }
            other => copy.push(other.clone()),
        }
    }
    copy
}

/// Expands snippet bodies into text and tabstop positions
#[derive(Debug, Clone)]
pub struct SnippetExpander {
    grammar: Arc<SnippetGrammar>,
    resolver: VariableResolver,
}

impl SnippetExpander {
    /// Compiles the snippet grammar
    pub fn new(resolver: VariableResolver) -> TesseraResult<Self> {
        Ok(Self::with_grammar(Arc::new(SnippetGrammar::new()?), resolver))
    }

    pub fn with_grammar(grammar: Arc<SnippetGrammar>, resolver: VariableResolver) -> Self {
        Self { grammar, resolver }
    }

    pub fn grammar(&self) -> &Arc<SnippetGrammar> {
        &self.grammar
    }

    pub fn resolver(&self) -> &VariableResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut VariableResolver {
        &mut self.resolver
    }

    /// Expands `template` as if inserted at the cursor of `ctx`.
    ///
    /// Positions in the result are relative to the insertion point: row 0 columns are
    /// counted from where the snippet starts.
    pub fn expand(
        &self,
        template: &str,
        ctx: &dyn SnippetContext,
        options: &InsertOptions,
    ) -> ExpandedSnippet {
        let template = template.replace('\r', "");
        let cursor = ctx.cursor();
        let indent: String = ctx
            .line(cursor.row)
            .unwrap_or_default()
            .chars()
            .take_while(|c| c.is_whitespace())
            .take(cursor.column)
            .collect();
        let tab = ctx.tab_string();

        let mut tokens = self.grammar.parse(&template);
        if !options.exclude_extra_indent && !indent.is_empty() {
            for token in &mut tokens {
                if let SnippetToken::Text(text) = token {
                    *text = text.replace('\n', &format!("\n{indent}"));
                }
            }
        }
        let mut tokens = self.resolver.resolve(&tokens, ctx);
        for token in &mut tokens {
            if let SnippetToken::Text(text) = token
                && text.contains('\t')
            {
                *text = text.replace('\t', &tab);
            }
        }

        let mut groups = collect_defaults(&tokens);
        let tokens = self.instantiate(tokens, &mut groups, ctx);
        layout(tokens, groups)
    }

    /// Replaces every occurrence of a tabstop by its default value so mirrors start with the
    /// same text as their placeholder.
    fn instantiate(
        &self,
        mut tokens: Vec<SnippetToken>,
        groups: &mut BTreeMap<usize, GroupInfo>,
        ctx: &dyn SnippetContext,
    ) -> Vec<SnippetToken> {
        let mut next_marker = tokens
            .iter()
            .filter_map(|t| t.marker())
            .max()
            .map(|m| m + 1)
            .unwrap_or(0);
        // id -> marker of the occurrence being expanded
        let mut expanding: BTreeMap<usize, usize> = BTreeMap::new();

        let mut i = 0;
        while i < tokens.len() {
            let SnippetToken::Tabstop(t) = &tokens[i] else {
                i += 1;
                continue;
            };
            let t = t.clone();

            if let Some(&open) = expanding.get(&t.id) {
                if open == t.marker {
                    expanding.remove(&t.id);
                    if let Some(info) = groups.get_mut(&t.id) {
                        info.parents.extend(expanding.keys().copied());
                    }
                } else {
                    #[cfg(feature = "debug")]
                    log::debug!("[instantiate] tabstop {} is nested in itself, skipping", t.id);
                }
                i += 1;
                continue;
            }

            let end = closing_index(&tokens, i).map(|c| c + 1).unwrap_or(i + 1);
            expanding.insert(t.id, t.marker);
            let Some(info) = groups.get_mut(&t.id) else {
                i += 1;
                continue;
            };

            let mut value = match &info.value {
                DefaultValue::Empty => Vec::new(),
                DefaultValue::Text(text) => {
                    let text = match &t.transform {
                        Some(transform) => self.resolver.apply_transform(transform, text, ctx),
                        None => text.clone(),
                    };
                    vec![SnippetToken::Text(text)]
                }
                DefaultValue::Nested(nested) => copy_value(nested, &expanding, &mut next_marker),
            };
            info.occurrences.push((t.marker, t.transform.clone()));

            value.push(SnippetToken::Tabstop(t));
            tokens.splice(i + 1..end, value);
            i += 1;
        }

        tokens
    }
}

/// Computes the final text and where each occurrence starts and ends
fn layout(tokens: Vec<SnippetToken>, groups: BTreeMap<usize, GroupInfo>) -> ExpandedSnippet {
    let mut text = String::new();
    let mut cursor = Position::default();
    let mut starts: HashMap<usize, Position> = HashMap::new();
    let mut ends: HashMap<usize, Position> = HashMap::new();

    for token in &tokens {
        match token {
            SnippetToken::Text(t) => {
                cursor = cursor.advance(t);
                text.push_str(t);
            }
            SnippetToken::Tabstop(t) => {
                if starts.contains_key(&t.marker) {
                    ends.insert(t.marker, cursor);
                } else {
                    starts.insert(t.marker, cursor);
                }
            }
            // resolved away before
            SnippetToken::Variable(_) => {}
        }
    }

    let mut tabstops: Vec<TabstopGroup> = groups
        .into_iter()
        .filter(|(_, info)| !info.occurrences.is_empty())
        .map(|(id, info)| TabstopGroup {
            id,
            ranges: info
                .occurrences
                .into_iter()
                .filter_map(|(marker, transform)| {
                    let start = *starts.get(&marker)?;
                    let end = ends.get(&marker).copied().unwrap_or(start);
                    Some(TabstopRange {
                        start,
                        end,
                        transform,
                    })
                })
                .collect(),
            choices: info.choices,
            parents: info.parents,
        })
        .collect();

    // the cursor always has somewhere to land once the other tabstops are done
    if !tabstops.iter().any(|g| g.id == 0) {
        tabstops.push(TabstopGroup {
            id: 0,
            ranges: vec![TabstopRange {
                start: cursor,
                end: cursor,
                transform: None,
            }],
            choices: None,
            parents: BTreeSet::new(),
        });
    }
    tabstops.sort_by_key(|g| (g.id == 0, g.id));

    ExpandedSnippet { text, tabstops }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferEditor;

    fn expander() -> SnippetExpander {
        SnippetExpander::new(VariableResolver::default()).unwrap()
    }

    fn expand(template: &str, buffer: &BufferEditor) -> ExpandedSnippet {
        expander().expand(template, buffer, &InsertOptions::default())
    }

    fn range(a: (usize, usize), b: (usize, usize)) -> (Position, Position) {
        (Position::new(a.0, a.1), Position::new(b.0, b.1))
    }

    fn ranges(group: &TabstopGroup) -> Vec<(Position, Position)> {
        group.ranges.iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn clones_share_the_grammar() {
        let first = expander();
        let second = first.clone();
        assert!(Arc::ptr_eq(first.grammar(), second.grammar()));

        let third = SnippetExpander::with_grammar(first.grammar().clone(), VariableResolver::default());
        let buffer = BufferEditor::new("");
        assert_eq!(
            third.expand("a${1:b}", &buffer, &InsertOptions::default()).text,
            "ab"
        );
        assert!(Arc::ptr_eq(first.grammar(), third.grammar()));
    }

    #[test]
    fn for_loop() {
        let buffer = BufferEditor::new("").with_tabs(false, 4);
        let res = expand("for (let ${1:i} = 0; $1 < ${2:n}; $1++) {\n\t$0\n}", &buffer);
        assert_eq!(res.text, "for (let i = 0; i < n; i++) {\n\t\n}");
        assert_eq!(res.navigation_order(), vec![1, 2, 0]);
        assert_eq!(
            ranges(res.group(1).unwrap()),
            vec![
                range((0, 9), (0, 10)),
                range((0, 16), (0, 17)),
                range((0, 23), (0, 24)),
            ]
        );
        assert_eq!(ranges(res.group(2).unwrap()), vec![range((0, 20), (0, 21))]);
        assert_eq!(ranges(res.group(0).unwrap()), vec![range((1, 1), (1, 1))]);
    }

    #[test]
    fn choices_expand_to_the_first_one() {
        let res = expand("${1|red,green,blue|}", &BufferEditor::default());
        assert_eq!(res.text, "red");
        let group = res.group(1).unwrap();
        assert_eq!(
            group.choices,
            Some(vec!["red".to_owned(), "green".to_owned(), "blue".to_owned()])
        );
        assert_eq!(ranges(group), vec![range((0, 0), (0, 3))]);
    }

    #[test]
    fn navigation_order_ignores_text_order() {
        let res = expand("$2 $1 $0", &BufferEditor::default());
        assert_eq!(res.navigation_order(), vec![1, 2, 0]);
    }

    #[test]
    fn a_final_tabstop_is_added() {
        let res = expand("abc\nde", &BufferEditor::default());
        assert_eq!(res.text, "abc\nde");
        assert_eq!(res.tabstops.len(), 1);
        assert_eq!(ranges(&res.tabstops[0]), vec![range((1, 2), (1, 2))]);
    }

    #[test]
    fn nested_placeholders_are_copied_into_mirrors() {
        let res = expand("${1:a ${2:b}} $1", &BufferEditor::default());
        assert_eq!(res.text, "a b a b");
        assert_eq!(
            ranges(res.group(1).unwrap()),
            vec![range((0, 0), (0, 3)), range((0, 4), (0, 7))]
        );
        let two = res.group(2).unwrap();
        assert_eq!(
            ranges(two),
            vec![range((0, 2), (0, 3)), range((0, 6), (0, 7))]
        );
        assert_eq!(two.parents, BTreeSet::from([1]));
    }

    #[test]
    fn self_reference_does_not_recurse() {
        let res = expand("${1:a $1}", &BufferEditor::default());
        assert_eq!(res.text, "a ");
        assert_eq!(ranges(res.group(1).unwrap()), vec![range((0, 0), (0, 2))]);
    }

    #[test]
    fn transformed_mirrors() {
        let res = expand("${1:foo} ${1/o/0/g}", &BufferEditor::default());
        assert_eq!(res.text, "foo f00");
        let group = res.group(1).unwrap();
        assert!(group.ranges[0].transform.is_none());
        assert!(group.ranges[1].transform.is_some());
        assert_eq!(ranges(group)[1], range((0, 4), (0, 7)));
    }

    #[test]
    fn newlines_repeat_the_indentation() {
        let mut buffer = BufferEditor::new("    foo").with_tabs(true, 2);
        buffer.set_cursor(Position::new(0, 4));
        let res = expand("if {\n\t$1\n}", &buffer);
        assert_eq!(res.text, "if {\n      \n    }");
        assert_eq!(ranges(res.group(1).unwrap()), vec![range((1, 6), (1, 6))]);

        let res = expander().expand(
            "if {\n\t$1\n}",
            &buffer,
            &InsertOptions::default().exclude_extra_indent(true),
        );
        assert_eq!(res.text, "if {\n  \n}");
    }

    #[test]
    fn indentation_stops_at_the_cursor() {
        let mut buffer = BufferEditor::new("        x").with_tabs(true, 4);
        buffer.set_cursor(Position::new(0, 2));
        let res = expand("a\nb", &buffer);
        assert_eq!(res.text, "a\n  b");
    }

    #[test]
    fn offset_to_buffer_coordinates() {
        let res = expand("ab$1\n$2", &BufferEditor::default()).offset_by(Position::new(3, 5));
        assert_eq!(ranges(res.group(1).unwrap()), vec![range((3, 7), (3, 7))]);
        assert_eq!(ranges(res.group(2).unwrap()), vec![range((4, 0), (4, 0))]);
    }
}
