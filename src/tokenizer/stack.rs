use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::StateName;
use crate::tokenizer::START_STATE;

/// Keeps track of nested states across a line and from one line to the next.
///
/// The last frame is the current state. There is always at least one frame: popping the
/// last one puts the stack back on `start` rather than leaving it empty.
/// `data` is free-form storage for `on_match` handlers that need to remember something
/// across lines, like the delimiter of a heredoc.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateStack {
    frames: Vec<StateName>,
    data: BTreeMap<String, String>,
}

impl Default for StateStack {
    fn default() -> Self {
        Self::new(START_STATE)
    }
}

impl From<&str> for StateStack {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StateStack {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl StateStack {
    pub fn new(state: impl Into<StateName>) -> Self {
        Self {
            frames: vec![state.into()],
            data: BTreeMap::new(),
        }
    }

    /// The state the next match will be looked up in
    pub fn current(&self) -> &str {
        self.frames.last().map(|s| s.as_str()).unwrap_or(START_STATE)
    }

    /// Frames from the outermost state to the current one
    pub fn frames(&self) -> &[StateName] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the stack is a single state without nesting or extra data
    pub fn is_flat(&self) -> bool {
        self.frames.len() == 1 && self.data.is_empty()
    }

    /// Replaces the current state without nesting
    pub fn next(&mut self, state: impl Into<StateName>) {
        let state = state.into();
        match self.frames.last_mut() {
            Some(top) => *top = state,
            None => self.frames.push(state),
        }
    }

    /// Called when entering a nested context
    pub fn push(&mut self, state: impl Into<StateName>) {
        self.frames.push(state.into());
    }

    /// Exits the current context, getting back to the parent.
    /// Popping the outermost frame falls back to `start`.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        } else {
            self.next(START_STATE);
        }
    }

    /// Drops everything and goes back to `start`
    pub fn reset(&mut self) {
        self.frames.clear();
        self.frames.push(START_STATE.to_owned());
        self.data.clear();
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(|s| s.as_str())
    }

    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove_data(&mut self, key: &str) -> Option<String> {
        self.data.remove(key)
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateStack[{}]", self.frames.join(" > "))?;
        if !self.data.is_empty() {
            write!(f, " {:?}", self.data)?;
        }
        Ok(())
    }
}
