//! Errors surfaced by the command line runner.

use std::fmt;

/// Runner failures, reported once at exit.
#[derive(Debug)]
pub enum RunnerError {
    /// Environment configuration could not be loaded.
    Config { details: String },
    /// A command line argument was malformed.
    Argument { details: String },
    /// The database could not be reached or migrated.
    Database { details: String },
    /// The workflow definition could not be loaded or is invalid.
    Workflow { details: String },
    /// The engine rejected or lost the execution.
    Engine { details: String },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {details}"),
            Self::Argument { details } => write!(f, "invalid argument: {details}"),
            Self::Database { details } => write!(f, "database error: {details}"),
            Self::Workflow { details } => write!(f, "workflow error: {details}"),
            Self::Engine { details } => write!(f, "execution error: {details}"),
        }
    }
}

impl std::error::Error for RunnerError {}
