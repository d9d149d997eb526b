use std::fmt;
use std::rc::Rc;

pub const EXIT_OK: u8 = 0;
pub const EXIT_COMPILE_ERROR: u8 = 65;
pub const EXIT_RUNTIME_ERROR: u8 = 70;
pub const EXIT_IO_ERROR: u8 = 74;

/// Where in the source a compile error points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// At a token with this lexeme.
    Lexeme(String),
    /// At the end of input.
    End,
    /// Scanner errors carry no lexeme.
    None,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Lexeme(lexeme) => write!(f, " at '{}'", lexeme),
            Location::End => write!(f, " at end"),
            Location::None => Ok(()),
        }
    }
}

/// A static violation found before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub location: Location,
    pub message: String,
}

/// One active call frame at the point a runtime error was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: u32,
    /// `None` for top-level script code.
    pub function: Option<Rc<str>>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A dynamic violation raised while executing. `trace` lists frames
/// innermost first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceEntry>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into(), trace: Vec::new() }
    }

    /// Message followed by the stack trace, one frame per line.
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        for entry in &self.trace {
            out.push('\n');
            out.push_str(&entry.to_string());
        }
        out
    }
}

/// Corrupted bytecode or a broken VM invariant. Never user-facing Lox
/// semantics; the binary aborts on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    #[error("unknown opcode {op} at offset {offset}")]
    UnknownOpcode { op: u8, offset: usize },
    #[error("constant {index} has the wrong type for {op}")]
    BadConstant { op: &'static str, index: usize },
    #[error("value stack underflow")]
    StackUnderflow,
    #[error("{op} expected {expected} on the stack")]
    UnexpectedOperand { op: &'static str, expected: &'static str },
    #[error("no active call frame")]
    NoActiveFrame,
    #[error("instruction pointer {offset} is past the end of the chunk")]
    CodeOverrun { offset: usize },
    #[error("shape {shape} maps a field to slot {slot}, which the instance lacks")]
    MissingSlot { shape: usize, slot: usize },
    #[error("instance holds {slots} slots but shape {shape} has {fields} fields")]
    ShapeMismatch { shape: usize, slots: usize, fields: usize },
}

/// Lifecycle of one program run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loaded,
    Compiling,
    CompileFailed,
    Compiled,
    Running,
    RuntimeFailed,
    Completed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::CompileFailed | Phase::RuntimeFailed | Phase::Completed)
    }
}

/// Final result of compiling and running one source unit.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    CompileFailed(Vec<CompileError>),
    RuntimeFailed(RuntimeError),
    /// `print` output could not be written.
    OutputFailed(std::io::Error),
    Aborted(InternalError),
}

impl Outcome {
    pub fn phase(&self) -> Phase {
        match self {
            Outcome::Completed => Phase::Completed,
            Outcome::CompileFailed(_) => Phase::CompileFailed,
            Outcome::RuntimeFailed(_) | Outcome::OutputFailed(_) | Outcome::Aborted(_) => {
                Phase::RuntimeFailed
            }
        }
    }

    /// Process exit code. Internal errors have none: the caller aborts.
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            Outcome::Completed => Some(EXIT_OK),
            Outcome::CompileFailed(_) => Some(EXIT_COMPILE_ERROR),
            Outcome::RuntimeFailed(_) => Some(EXIT_RUNTIME_ERROR),
            Outcome::OutputFailed(_) => Some(EXIT_IO_ERROR),
            Outcome::Aborted(_) => None,
        }
    }

    /// Text written to stderr for this outcome, empty on success.
    pub fn render(&self) -> String {
        match self {
            Outcome::Completed => String::new(),
            Outcome::CompileFailed(errors) => {
                errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
            }
            Outcome::RuntimeFailed(error) => error.render(),
            Outcome::OutputFailed(error) => format!("Error writing output: {error}"),
            Outcome::Aborted(error) => format!("internal error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_at_lexeme() {
        let e = CompileError {
            line: 3,
            location: Location::Lexeme("oops".to_string()),
            message: "Too many local variables in function.".to_string(),
        };
        assert_eq!(e.to_string(), "[line 3] Error at 'oops': Too many local variables in function.");
    }

    #[test]
    fn compile_error_at_end_and_scanner() {
        let at_end = CompileError { line: 1, location: Location::End, message: "Expect expression.".into() };
        assert_eq!(at_end.to_string(), "[line 1] Error at end: Expect expression.");
        let scan = CompileError { line: 2, location: Location::None, message: "Unexpected character.".into() };
        assert_eq!(scan.to_string(), "[line 2] Error: Unexpected character.");
    }

    #[test]
    fn runtime_error_renders_trace_innermost_first() {
        let mut e = RuntimeError::new("Superclass must be a class.");
        e.trace.push(TraceEntry { line: 4, function: Some(Rc::from("inner")) });
        e.trace.push(TraceEntry { line: 9, function: None });
        assert_eq!(e.render(), "Superclass must be a class.\n[line 4] in inner()\n[line 9] in script");
    }

    #[test]
    fn exit_codes_follow_outcome() {
        assert_eq!(Outcome::Completed.exit_code(), Some(0));
        assert_eq!(Outcome::CompileFailed(Vec::new()).exit_code(), Some(65));
        assert_eq!(Outcome::RuntimeFailed(RuntimeError::new("x")).exit_code(), Some(70));
        assert_eq!(Outcome::Aborted(InternalError::StackUnderflow).exit_code(), None);
        let broken_pipe = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert_eq!(Outcome::OutputFailed(broken_pipe).exit_code(), Some(74));
    }

    #[test]
    fn outcome_phase_is_terminal() {
        for outcome in [
            Outcome::Completed,
            Outcome::CompileFailed(Vec::new()),
            Outcome::RuntimeFailed(RuntimeError::new("x")),
        ] {
            assert!(outcome.phase().is_terminal());
        }
        assert!(!Phase::Running.is_terminal());
        assert!(!Phase::Compiled.is_terminal());
    }

    #[test]
    fn multiple_compile_errors_render_one_per_line() {
        let errors = vec![
            CompileError { line: 1, location: Location::Lexeme("=".into()), message: "Invalid assignment target.".into() },
            CompileError { line: 2, location: Location::End, message: "Expect ';' after value.".into() },
        ];
        let text = Outcome::CompileFailed(errors).render();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("Expect ';' after value."));
    }
}
