use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A compile or runtime failure inside script code, with the source
/// location when the engine reports one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalFailure {
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl EvalFailure {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, line: Option<u32>, column: Option<u32>) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, " {}<{}>", line, column)?,
            (Some(line), None) => write!(f, " {}", line)?,
            _ => {}
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for EvalFailure {}

/// Failure to load, reload or configure a script
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unable to find a script engine for {path} ({reason})")]
    Resolution { path: PathBuf, reason: String },
    #[error("script error: {0}")]
    Evaluation(#[from] EvalFailure),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script {0} is already loaded")]
    AlreadyLoaded(PathBuf),
    #[error("script {0} does not exist")]
    NotFound(PathBuf),
    #[error("script {0} has been unloaded")]
    Unloaded(PathBuf),
    #[error("engine error: {0}")]
    Engine(String),
}

/// Failure to call into already evaluated script code
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The handler does not exist. Callers ignore this.
    #[error("no such callable: {0}")]
    NoSuchCallable(String),
    #[error("{0}")]
    Script(EvalFailure),
    /// The engine is already running further up the current call stack
    #[error("engine is busy")]
    Busy,
}

/// Failure of a host object method called from a script
#[derive(Debug, Error)]
pub enum HostCallError {
    #[error("{type_name} has no method {method}")]
    NoSuchMethod {
        type_name: &'static str,
        method: String,
    },
    #[error("{method}: argument {index} must be {expected}")]
    BadArgument {
        method: String,
        index: usize,
        expected: &'static str,
    },
    #[error("connection is closed")]
    SessionGone,
}
