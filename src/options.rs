/// Default number of matches after which the rest of a line is given up on
pub const DEFAULT_MAX_MATCHES_PER_LINE: usize = 2000;
/// Default size, in chars, of the tokens emitted once a line is given up on
pub const DEFAULT_OVERFLOW_CHUNK: usize = 500;

/// Options of a compiled [`Tokenizer`](crate::Tokenizer)
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TokenizerOptions {
    /// After that many matches on a single line, the rest of the line is emitted as
    /// `overflow` tokens and the state goes back to `start`.
    pub(crate) max_matches_per_line: usize,
    /// Size of each `overflow` token
    pub(crate) overflow_chunk: usize,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            max_matches_per_line: DEFAULT_MAX_MATCHES_PER_LINE,
            overflow_chunk: DEFAULT_OVERFLOW_CHUNK,
        }
    }
}

impl TokenizerOptions {
    pub fn max_matches_per_line(mut self, value: usize) -> Self {
        self.max_matches_per_line = value.max(1);
        self
    }

    pub fn overflow_chunk(mut self, value: usize) -> Self {
        self.overflow_chunk = value.max(1);
        self
    }
}

/// Options for inserting a snippet
#[derive(Default, Copy, Clone, Eq, PartialEq, Debug)]
pub struct InsertOptions {
    /// Compute the expansion without touching the buffer
    pub(crate) dry_run: bool,
    /// Do not repeat the indentation of the current line after each newline of the snippet
    pub(crate) exclude_extra_indent: bool,
}

impl InsertOptions {
    pub fn dry_run(mut self, value: bool) -> Self {
        self.dry_run = value;
        self
    }

    pub fn exclude_extra_indent(mut self, value: bool) -> Self {
        self.exclude_extra_indent = value;
        self
    }
}

/// Options of the [`TabstopManager`](crate::TabstopManager)
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TabstopOptions {
    /// When true, only the first occurrence of a tabstop is edited directly and the other
    /// occurrences are mirrors rewritten after each edit.
    /// When false, every occurrence without a transform gets its own selection.
    pub(crate) link_mirrors: bool,
}

impl Default for TabstopOptions {
    fn default() -> Self {
        Self { link_mirrors: true }
    }
}

impl TabstopOptions {
    pub fn link_mirrors(mut self, value: bool) -> Self {
        self.link_mirrors = value;
        self
    }
}
