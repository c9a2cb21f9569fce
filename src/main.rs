use std::{path::PathBuf, process::ExitCode};

use brookc::{
    CompileOptions, Session,
    diagnostics::DiagnosticCollector,
    frontend::{SourceFile, SourceFileOrigin, lexer, parser::Parser},
    middle::lir::pretty_print::pretty_print_lir,
};
use clap::{CommandFactory, Parser as ClapParser, ValueEnum, error::ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The token stream of each file
    Tokens,
    /// The parsed syntax tree of each file
    Ast,
    /// The lowered LIR of each file
    Lir,
}

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    source_files: Vec<PathBuf>,

    /// Which stage's output to print
    #[arg(long, value_enum, default_value_t = Emit::Lir)]
    emit: Emit,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Number of files compiled in parallel
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Report warnings as errors
    #[arg(long)]
    deny_warnings: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BROOKC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    if args.no_color {
        colored::control::set_override(false);
    }

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.exists() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' does not exist!", source_file.display()),
                )
                .exit()
        }

        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    if let Some(jobs) = args.jobs {
        if let Err(error) = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
        {
            tracing::warn!(%error, "could not configure the thread pool");
        }
    }

    match args.emit {
        Emit::Tokens | Emit::Ast => dump_front(&args),
        Emit::Lir => compile(&args),
    }
}

/// Prints tokens or syntax trees. Files are handled one at a time.
fn dump_front(args: &Args) -> ExitCode {
    let mut failed = false;

    for path in &args.source_files {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                eprintln!("error: failed to read `{}`: {error}", path.display());
                failed = true;
                continue;
            }
        };

        let source = match SourceFile::from_bytes(bytes, SourceFileOrigin::File(path.clone())) {
            Ok(source) => source,
            Err((source, diagnostic)) => {
                eprint!("{}", diagnostic.render(&source));
                failed = true;
                continue;
            }
        };

        let mut diagnostics = DiagnosticCollector::new();

        if args.emit == Emit::Tokens {
            let (tokens, lexical) = lexer::tokenize(&source);

            for token in &tokens {
                println!(
                    "{}:{} {:?} {:?}",
                    token.span.line,
                    token.span.column,
                    token.kind,
                    source.value_of_span(token.span)
                );
            }

            diagnostics.extend(lexical);
        } else {
            let module = Parser::parse_module(&source, &mut diagnostics);
            println!("{module:#?}");
        }

        for diagnostic in diagnostics.iter() {
            eprint!("{}", diagnostic.render(&source));
        }

        failed |= diagnostics.has_errors();
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn compile(args: &Args) -> ExitCode {
    let session = Session::new(CompileOptions {
        warnings_as_errors: args.deny_warnings,
        ..CompileOptions::default()
    });

    let mut failed = false;

    for result in session.compile_all(&args.source_files) {
        match result {
            Ok(unit) => {
                eprint!("{}", unit.render_diagnostics());

                if let Some(module) = &unit.module {
                    pretty_print_lir(module);
                }

                failed |= unit.has_errors();
            }
            Err(error) => {
                eprintln!("error: {error}");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
