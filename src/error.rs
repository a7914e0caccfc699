use std::path::PathBuf;

use rhai::{EvalAltResult, Position};
use thiserror::Error;

/// Failures raised while provisioning, loading or running mod scripts.
///
/// None of these ever reach the frame loop: loads and dispatches catch them, log them and hand them
/// to the host's failure queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("failed to compile '{}': {message}", path.display())]
    Compile { path: PathBuf, message: String },
    #[error("runtime error in {origin}: {message}")]
    Runtime { origin: String, message: String, stack: Vec<String> },
    #[error("interpreter setup failed: {0}")]
    Setup(String),
    #[error("script '{}' is already loaded in this session", path.display())]
    Duplicate { path: PathBuf },
}

impl ScriptError {
    pub fn compile(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ScriptError::Compile { path: path.into(), message: message.to_string() }
    }

    pub fn setup(message: impl Into<String>) -> Self {
        ScriptError::Setup(message.into())
    }

    /// Builds a runtime failure from a rhai error, keeping the nested call frames as a stack dump.
    pub fn runtime(origin: impl Into<String>, err: &EvalAltResult) -> Self {
        ScriptError::Runtime { origin: origin.into(), message: innermost(err).to_string(), stack: call_stack(err) }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScriptError::Compile { .. } => "compile",
            ScriptError::Runtime { .. } => "runtime",
            ScriptError::Setup(_) => "setup",
            ScriptError::Duplicate { .. } => "duplicate",
        }
    }

    pub fn stack(&self) -> &[String] {
        match self {
            ScriptError::Runtime { stack, .. } => stack,
            _ => &[],
        }
    }
}

fn innermost(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => innermost(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => innermost(inner),
        other => other,
    }
}

/// Flattens nested function-call errors into one line per frame, outermost first.
pub fn call_stack(err: &EvalAltResult) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current = err;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                frames.push(format_frame(&format!("fn {name}"), source, *pos));
                current = inner;
            }
            EvalAltResult::ErrorInModule(name, inner, pos) => {
                frames.push(format_frame(&format!("module {name}"), "", *pos));
                current = inner;
            }
            other => {
                frames.push(format_frame(&other.to_string(), "", other.position()));
                break;
            }
        }
    }
    frames
}

fn format_frame(what: &str, source: &str, pos: Position) -> String {
    match (source.is_empty(), pos.is_none()) {
        (true, true) => what.to_string(),
        (true, false) => format!("{what} @ {pos}"),
        (false, true) => format!("{what} [{source}]"),
        (false, false) => format!("{what} [{source}] @ {pos}"),
    }
}
