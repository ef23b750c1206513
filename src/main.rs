mod repl;

use clap::{Parser, Subcommand};
use prox::error::{ProxError, RuntimeErrorKind};
use prox::pipeline::Pipeline;
use prox::trace::{Phase, TraceEvent, TraceSink};
use prox::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

/// The Prox compiler and runtime
#[derive(Parser, Debug)]
#[command(name = "prox")]
#[command(version = prox::config::VERSION)]
#[command(about = "A small dynamic programming language with an IR-based compiler and VM")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Add a module search path ahead of the defaults (can be repeated)
    #[arg(long = "module-path", value_name = "PATH", global = true, action = clap::ArgAction::Append)]
    module_paths: Vec<PathBuf>,

    /// Skip the IR optimiser
    #[arg(long = "no-optimize", global = true)]
    no_optimize: bool,

    /// GC threshold in bytes
    #[arg(long = "gc-threshold", value_name = "BYTES", global = true)]
    gc_threshold: Option<usize>,

    /// Print pipeline phase progress
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a .prox source file
    Run {
        /// Path to the .prox file
        file: PathBuf,
    },
    /// Compile a .prox source file to a textual IR artifact
    Build {
        /// Path to the .prox file
        file: PathBuf,
        /// Output file path (defaults to the source path with an .ir suffix)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // `prox myfile.prox` is a shortcut for `prox run myfile.prox`
    let mut args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1].ends_with(".prox") {
        let file = args.remove(1);
        args.insert(1, "run".to_string());
        args.insert(2, file);
    }
    let cli = Cli::parse_from(args);

    let config = build_config(&cli);
    let trace = cli.verbose.then(make_trace_printer);

    match cli.command {
        Some(Command::Run { file }) => {
            let mut pipeline = Pipeline::new(config);
            if let Some(trace) = trace {
                pipeline = pipeline.with_trace(trace);
            }
            match pipeline.run_file(&file) {
                Ok(_) => ExitCode::SUCCESS,
                Err(ProxError::Runtime(err)) => {
                    if let RuntimeErrorKind::Exit(code) = err.kind {
                        return ExitCode::from(code.clamp(0, 255) as u8);
                    }
                    eprintln!("{err}");
                    ExitCode::FAILURE
                }
                Err(err) => {
                    eprintln!("{err}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::Build { file, out }) => {
            let mut pipeline = Pipeline::new(config);
            if let Some(trace) = trace {
                pipeline = pipeline.with_trace(trace);
            }
            let out = out.unwrap_or_else(|| Pipeline::default_artifact_path(&file));
            match pipeline.build_file(&file, &out) {
                Ok(()) => {
                    println!("Wrote {}", out.display());
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("{err}");
                    ExitCode::FAILURE
                }
            }
        }
        None => repl::run(config),
    }
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::default().with_extra_module_paths(cli.module_paths.clone());
    if cli.no_optimize {
        config.optimize = false;
    }
    if let Some(threshold) = cli.gc_threshold {
        config.gc_threshold = threshold;
    }
    config
}

/// Phase banner printer, subscribed to the pipeline's trace hook.
fn make_trace_printer() -> TraceSink {
    const PHASES: [Phase; 7] = [
        Phase::Lex,
        Phase::Parse,
        Phase::Import,
        Phase::Resolve,
        Phase::Lower,
        Phase::Optimize,
        Phase::Execute,
    ];
    Rc::new(|event| match event {
        TraceEvent::PhaseStarted { phase } => {
            let step = PHASES.iter().position(|p| p == phase).unwrap_or(0) + 1;
            eprintln!("[{step}/{}] {}...", PHASES.len(), phase.label());
        }
        TraceEvent::PhaseFinished { detail, .. } => {
            eprintln!("      {detail}");
        }
        TraceEvent::GcCycle { freed, live } => {
            eprintln!("      [gc] freed {freed}, {live} live");
        }
    })
}
