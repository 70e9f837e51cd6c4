use std::fmt;
use std::io;

pub(crate) type TesseraResult<T> = Result<T, Error>;

/// Errors that can occur during tessera usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a rule table or a snippet file
    /// or a dump file if the `dump` feature is enabled
    Io(io::Error),

    /// JSON parsing failed when loading a rule table.
    Json(serde_json::Error),

    /// Encoding the registry dump failed.
    #[cfg(feature = "dump")]
    DumpEncode(bitcode::Error),

    /// Decoding the registry dump failed.
    #[cfg(feature = "dump")]
    DumpDecode(bitcode::Error),

    /// A rule regex did not compile.
    /// Rule tables are compiled once when registered so this is always reported
    /// before any line gets tokenized.
    #[allow(missing_docs)]
    InvalidRegex {
        state: String,
        index: usize,
        pattern: String,
        message: String,
    },

    /// A rule transitions to a state that doesn't exist in the rule table.
    #[allow(missing_docs)]
    UnknownState { from: String, target: String },

    /// An `include` entry refers to a state that doesn't exist in the rule table.
    #[allow(missing_docs)]
    UnknownInclude { from: String, target: String },

    /// Every rule table needs a `start` state.
    MissingStartState,

    /// A mode was not found in the registry.
    /// Only happens when asking to tokenize something with a mode we can't find
    ModeNotFound(String),

    /// The trigger or guard regexes of a snippet did not compile.
    #[allow(missing_docs)]
    InvalidTrigger { snippet: String, message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            #[cfg(feature = "dump")]
            Error::DumpEncode(err) => write!(f, "dump encoding error: {}", err),
            #[cfg(feature = "dump")]
            Error::DumpDecode(err) => write!(f, "dump decoding error: {}", err),
            Error::InvalidRegex {
                state,
                index,
                pattern,
                message,
            } => write!(
                f,
                "invalid regex for rule {} of state '{}' ({}): {}",
                index, state, pattern, message
            ),
            Error::UnknownState { from, target } => {
                write!(f, "state '{}' transitions to unknown state '{}'", from, target)
            }
            Error::UnknownInclude { from, target } => {
                write!(f, "state '{}' includes unknown state '{}'", from, target)
            }
            Error::MissingStartState => write!(f, "rule table has no 'start' state"),
            Error::ModeNotFound(name) => write!(f, "mode '{}' not found", name),
            Error::InvalidTrigger { snippet, message } => {
                write!(f, "invalid trigger for snippet '{}': {}", snippet, message)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            #[cfg(feature = "dump")]
            Error::DumpEncode(err) => Some(err),
            #[cfg(feature = "dump")]
            Error::DumpDecode(err) => Some(err),
            Error::InvalidRegex { .. }
            | Error::UnknownState { .. }
            | Error::UnknownInclude { .. }
            | Error::MissingStartState
            | Error::ModeNotFound(_)
            | Error::InvalidTrigger { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
