//! Command line front end: deobfuscates a stack trace with a mapping file.
//!
//! Usage:
//!   retrace mapping.txt crash.txt
//!   adb logcat | retrace --verbose mapping.txt
//!   retrace mapping.txt crash.txt -o retraced.txt --warnings-json

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use retrace::{Mapper, Mapping, RetraceOptions, Retracer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "retrace")]
#[command(about = "Deobfuscates stack traces using a ProGuard or R8 mapping file", long_about = None)]
struct Args {
    /// The mapping file written by the obfuscator
    #[arg(value_name = "MAPPING")]
    mapping: PathBuf,

    /// The obfuscated stack trace, read from stdin if omitted
    #[arg(value_name = "STACKTRACE")]
    stacktrace: Option<PathBuf>,

    /// Write the retraced stack trace to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print full method signatures
    #[arg(short, long, env = "RETRACE_VERBOSE")]
    verbose: bool,

    /// Print the warning counts as JSON to stderr when done
    #[arg(long)]
    warnings_json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let source = fs::read_to_string(&args.mapping)
        .with_context(|| format!("failed to read mapping file {}", args.mapping.display()))?;
    if !Mapping::new(&source).is_valid() {
        warn!(
            "{} does not look like a mapping file",
            args.mapping.display()
        );
    }

    let mapper = Mapper::parse(&source)
        .with_context(|| format!("failed to parse mapping file {}", args.mapping.display()))?;
    info!(classes = mapper.model().class_count(), "loaded mapping");

    let options = RetraceOptions::default().verbose(args.verbose);
    let retracer = Retracer::new(&mapper, options);

    let input: Box<dyn io::BufRead> = match &args.stacktrace {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open stack trace {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin().lock()),
    };

    let warnings = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output file {}", path.display()))?;
            retracer.retrace_stream(input, BufWriter::new(file))
        }
        None => retracer.retrace_stream(input, io::stdout().lock()),
    }
    .context("failed to retrace stack trace")?;

    if warnings.unresolved > 0 {
        warn!(count = warnings.unresolved, "frames could not be resolved");
    }
    if warnings.ambiguous > 0 {
        warn!(count = warnings.ambiguous, "frames resolved ambiguously");
    }
    if args.warnings_json {
        eprintln!("{}", serde_json::to_string(&warnings)?);
    }

    Ok(())
}
