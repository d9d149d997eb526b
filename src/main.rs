use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::{self, ExitCode};

use clap::Parser as ClapParser;

use loxic::diagnostic::{EXIT_COMPILE_ERROR, EXIT_IO_ERROR, EXIT_OK, Outcome};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Lox script to compile and run; starts a REPL when omitted
    #[arg(help = "The .lox file to run (omit for an interactive prompt)")]
    script: Option<PathBuf>,

    /// Print the token stream instead of running
    #[arg(long, requires = "script", conflicts_with = "cache_stats", help = "Dump one line per token and exit")]
    scan: bool,

    /// Report inline-cache counters after the run
    #[arg(long, requires = "script", help = "Print a CACHE_STATS JSON line after the program output")]
    cache_stats: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let Some(path) = cli.script else {
        return run_repl();
    };
    let source = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            eprintln!("Error reading file '{}': {}", path.display(), err);
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };
    log::debug!("loaded {} ({} bytes)", path.display(), source.len());

    if cli.scan { scan(&source) } else { run(&source, cli.cache_stats) }
}

fn scan(source: &str) -> ExitCode {
    let report = loxic::scan_dump(source);

    let mut out = BufWriter::new(io::stdout().lock());
    let written = report.lines.iter().try_for_each(|line| writeln!(out, "{line}"));
    if let Err(err) = written.and_then(|()| out.flush()) {
        eprintln!("Error writing output: {err}");
        return ExitCode::from(EXIT_IO_ERROR);
    }

    for error in &report.errors {
        eprintln!("{error}");
    }
    if report.errors.is_empty() {
        ExitCode::from(EXIT_OK)
    } else {
        ExitCode::from(EXIT_COMPILE_ERROR)
    }
}

fn run(source: &str, cache_stats: bool) -> ExitCode {
    let mut out = BufWriter::new(io::stdout().lock());
    let report = loxic::interpret(source, &mut out);

    // Program output stays ahead of diagnostics.
    let mut flushed = Ok(());
    if cache_stats {
        flushed = writeln!(out, "{}", report.cache_stats.report_line());
    }
    if let Err(err) = flushed.and_then(|()| out.flush()) {
        eprintln!("Error writing output: {err}");
        return ExitCode::from(EXIT_IO_ERROR);
    }

    let diagnostics = report.outcome.render();
    if !diagnostics.is_empty() {
        eprintln!("{diagnostics}");
    }
    match report.outcome.exit_code() {
        Some(code) => ExitCode::from(code),
        None => process::abort(),
    }
}

fn run_repl() -> ExitCode {
    println!("loxic REPL");
    println!("Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut prompt = io::stdout();
    let mut out = io::stdout();
    let mut session = loxic::Session::new(&mut out);
    let mut input_buffer = String::new();

    loop {
        print!("> ");
        if let Err(err) = prompt.flush() {
            eprintln!("Error writing output: {err}");
            return ExitCode::from(EXIT_IO_ERROR);
        }

        input_buffer.clear();
        match stdin.read_line(&mut input_buffer) {
            Ok(0) => break,
            Ok(_) => {
                let input = input_buffer.trim();
                if input == "exit" {
                    break;
                }
                if input.is_empty() {
                    continue;
                }

                let outcome = session.eval(&input_buffer);
                let diagnostics = outcome.render();
                if !diagnostics.is_empty() {
                    eprintln!("{diagnostics}");
                }
                match outcome {
                    Outcome::OutputFailed(_) => return ExitCode::from(EXIT_IO_ERROR),
                    Outcome::Aborted(_) => process::abort(),
                    _ => {}
                }
            }
            Err(err) => {
                eprintln!("Error reading input: {err}");
                return ExitCode::from(EXIT_IO_ERROR);
            }
        }
    }
    println!();
    ExitCode::from(EXIT_OK)
}
