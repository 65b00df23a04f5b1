/// Error taxonomy for host calls and space operations
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Failure reported by the host browser.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// The host refused a tab mutation because the user is mid-interaction
    /// (typically dragging in the native tab strip). Worth retrying.
    #[error("host busy: {0}")]
    Contention(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("host rejected call: {0}")]
    Rejected(String),
    #[error("bridge error: {0}")]
    Bridge(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type HostResult<T> = Result<T, HostError>;

fn contention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)tabs cannot be edited right now|user may be dragging a tab")
            .expect("static pattern compiles")
    })
}

fn not_found_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^no (tab|group|bookmark|window)|can't find|not found")
            .expect("static pattern compiles")
    })
}

impl HostError {
    /// Classify raw error text coming back from the host.
    ///
    /// Hosts don't publish error codes for these cases, so the message text is
    /// the only signal available.
    pub fn classify(message: &str) -> HostError {
        if contention_pattern().is_match(message) {
            HostError::Contention(message.to_string())
        } else if not_found_pattern().is_match(message) {
            HostError::NotFound(message.to_string())
        } else {
            HostError::Rejected(message.to_string())
        }
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, HostError::Contention(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HostError::NotFound(_))
    }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        HostError::Serialization(e.to_string())
    }
}

/// Failure of a space-level operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpaceError {
    #[error("a space named \"{0}\" already exists")]
    DuplicateName(String),
    #[error("space name cannot be empty")]
    EmptyName,
    #[error("unknown space {0}")]
    UnknownSpace(String),
    #[error("unknown tab {0}")]
    UnknownTab(i32),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl SpaceError {
    /// Validation failures are shown to the user; everything else is logged.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, SpaceError::DuplicateName(_) | SpaceError::EmptyName)
    }
}

pub type SpaceResult<T> = Result<T, SpaceError>;
