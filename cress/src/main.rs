use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::Context;
use clap::Parser;
use cress_foundation::errors::{error_count, Fatal};
use cress_lexer::{token::TokenKind, token_stream::TokenStream};
use cress_preprocessor::{input::SearchPaths, Options, Preprocessor};
use tracing::{error, metadata::LevelFilter};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
pub struct Args {
    /// The translation unit to preprocess.
    input: PathBuf,

    /// Define a macro, with an optional value (`-D NAME` defines it as 1).
    #[clap(short = 'D', value_name = "NAME[=VALUE]")]
    define: Vec<String>,

    /// Undefine a macro after the predefined set is installed.
    #[clap(short = 'U', value_name = "NAME")]
    undefine: Vec<String>,

    /// Add a directory to the user include search path.
    #[clap(short = 'I', value_name = "PATH")]
    include: Vec<PathBuf>,

    /// Add a directory to the system include search path.
    #[clap(long = "isystem", value_name = "PATH")]
    isystem: Vec<PathBuf>,

    /// Stop after preprocessing and print the token stream.
    #[clap(short = 'E')]
    preprocess_only: bool,

    /// Write output here instead of standard output.
    #[clap(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Suppress #warning diagnostics.
    #[clap(long)]
    no_warnings: bool,

    /// Dump each produced token to standard error.
    #[clap(long)]
    verbose: bool,
}

pub fn fallible_main(args: Args) -> anyhow::Result<bool> {
    let mut preprocessor = Preprocessor::with_search_paths(
        SearchPaths {
            user: args.include,
            system: args.isystem,
        },
        Options {
            preprocessed_output: args.preprocess_only,
            suppress_warning_directive: args.no_warnings,
        },
    );

    // Command-line definitions precede the primary file, so the file can
    // already see (and undefine) them.
    let mut fatal = false;
    for define in &args.define {
        fatal = fatal || preprocessor.define_from_command_line(define).is_err();
    }
    for undefine in &args.undefine {
        fatal = fatal || preprocessor.undefine_from_command_line(undefine).is_err();
    }

    if !fatal {
        preprocessor
            .push_file(&args.input)
            .with_context(|| format!("cannot open input file {:?}", args.input))?;

        fatal = if args.preprocess_only {
            write_preprocessed(&mut preprocessor, args.output.as_ref())?
        } else {
            drive_to_end(&mut preprocessor).is_err()
        };
    }

    for diagnostic in preprocessor.diagnostics() {
        diagnostic.emit_to_stderr();
    }
    Ok(fatal || error_count(preprocessor.diagnostics()) > 0)
}

fn write_preprocessed(
    preprocessor: &mut Preprocessor,
    output: Option<&PathBuf>,
) -> anyhow::Result<bool> {
    let result = match output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("cannot create output file {path:?}"))?;
            let mut writer = BufWriter::new(file);
            let result = preprocessor.preprocess(&mut writer);
            writer.flush()?;
            result
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            let result = preprocessor.preprocess(&mut writer);
            writer.flush()?;
            result
        }
    };
    match result {
        Ok(()) => Ok(false),
        Err(cress_preprocessor::PreprocessError::Fatal(_)) => Ok(true),
        Err(cress_preprocessor::PreprocessError::Io(error)) => {
            Err(anyhow::Error::new(error).context("cannot write preprocessed output"))
        }
    }
}

/// Without a parser attached, drain the token stream so every diagnostic the
/// translation unit would produce is surfaced.
fn drive_to_end(preprocessor: &mut Preprocessor) -> Result<(), Fatal> {
    loop {
        if preprocessor.next()?.kind == TokenKind::End {
            return Ok(());
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let subscriber = tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(io::stderr),
        );
    tracing::subscriber::set_global_default(subscriber)
        .expect("cannot set default tracing subscriber");

    match fallible_main(args) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error:?}");
            ExitCode::FAILURE
        }
    }
}
