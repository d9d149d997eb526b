//! loxic: a Lox scanner, single-pass bytecode compiler and stack VM whose
//! instances are laid out by shapes and whose property and call sites carry
//! single-entry inline caches.

pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod vm;

use std::io::Write;

use diagnostic::{CompileError, Location, Outcome, Phase};
use lexer::{Scanner, TokenKind};
use vm::inline_cache::{CacheStats, InlineCaches};
use vm::{Vm, VmError};

/// Result of [`interpret`]: how the run ended plus the inline-cache totals
/// gathered while it ran.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Outcome,
    pub cache_stats: CacheStats,
}

fn enter(phase: Phase) {
    if phase.is_terminal() {
        log::debug!("phase -> {phase:?}");
    } else {
        log::trace!("phase -> {phase:?}");
    }
}

fn outcome_of(result: Result<(), VmError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Completed,
        Err(VmError::Runtime(error)) => Outcome::RuntimeFailed(error),
        Err(VmError::Output(error)) => Outcome::OutputFailed(error),
        Err(VmError::Internal(error)) => Outcome::Aborted(error),
    }
}

/// Compile and run `source`, writing `print` output to `out`.
pub fn interpret(source: &str, out: &mut dyn Write) -> RunReport {
    enter(Phase::Loaded);
    enter(Phase::Compiling);
    let script = match compiler::compile(source) {
        Ok(script) => script,
        Err(errors) => {
            let outcome = Outcome::CompileFailed(errors);
            enter(outcome.phase());
            let cache_stats = CacheStats { enabled: InlineCaches::enabled(), ..CacheStats::default() };
            return RunReport { outcome, cache_stats };
        }
    };
    enter(Phase::Compiled);

    enter(Phase::Running);
    let mut vm = Vm::new(out);
    let result = vm.run(&script);
    // Flush before the heap is torn down.
    let flushed = vm.flush();
    let cache_stats = vm.cache_stats();
    log::debug!("run finished with {} shape(s)", vm.shape_count());
    drop(vm);

    let outcome = outcome_of(result.and(flushed));
    enter(outcome.phase());
    RunReport { outcome, cache_stats }
}

/// Interactive session: one VM whose globals and shapes outlive each line.
pub struct Session<'out> {
    vm: Vm<'out>,
}

impl<'out> Session<'out> {
    pub fn new(out: &'out mut dyn Write) -> Self {
        Session { vm: Vm::new(out) }
    }

    /// Compile and run one line. A bare expression has its value printed.
    /// Errors end the line, never the session.
    pub fn eval(&mut self, line: &str) -> Outcome {
        let script = match compiler::compile_line(line) {
            Ok(script) => script,
            Err(errors) => return Outcome::CompileFailed(errors),
        };
        let result = self.vm.run(&script);
        let flushed = self.vm.flush();
        outcome_of(result.and(flushed))
    }
}

/// Token dump for `--scan`: one formatted line per token, with error tokens
/// pulled out as diagnostics instead.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub lines: Vec<String>,
    pub errors: Vec<CompileError>,
}

pub fn scan_dump(source: &str) -> ScanReport {
    let mut report = ScanReport::default();
    for token in Scanner::new(source) {
        match token.kind {
            TokenKind::Error(error) => report.errors.push(CompileError {
                line: token.line,
                location: Location::None,
                message: error.to_string(),
            }),
            _ => report.lines.push(lexer::dump::format_token(&token)),
        }
    }
    report
}
