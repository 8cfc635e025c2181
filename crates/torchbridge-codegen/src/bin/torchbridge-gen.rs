//! torchbridge-gen: emit host-framework wrappers for a set of compiled kernels.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use torchbridge_codegen::{parse, GeneratorOptions, WrapperGenerator};
use torchbridge_core::Target;
use torchbridge_tracing::{debug, init_global_tracing, timed_block, TracingConfig};

#[derive(Parser)]
#[command(name = "torchbridge-gen")]
#[command(about = "Generate PyTorch wrapper entry points for compiled kernels")]
#[command(version)]
struct Cli {
    /// Signature document (JSON); use '-' for stdin
    #[arg(short, long, value_name = "FILE")]
    signatures: PathBuf,

    /// Target string, e.g. `host`, `host-cuda-user_context`, `host-metal`
    #[arg(short, long, default_value = "host")]
    target: String,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Flush the memoization cache after every kernel call
    /// (also enabled by FLUSH_MEMOIZE_CACHE=1)
    #[arg(long)]
    flush_cache: bool,

    /// Do not forward-declare the kernel entry points
    #[arg(long)]
    no_extern_decls: bool,

    /// Validate the signatures and target without writing any source
    #[arg(long)]
    check: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_global_tracing(&TracingConfig::from_env()) {
        eprintln!("warning: tracing disabled: {e}");
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn read_signatures(path: &PathBuf) -> Result<String> {
    if path.to_str() == Some("-") {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).context("reading signatures from stdin")?;
        Ok(text)
    } else {
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn run(cli: Cli) -> Result<()> {
    let target: Target = cli
        .target
        .parse()
        .with_context(|| format!("invalid target `{}`", cli.target))?;

    let env_options = GeneratorOptions::from_env();
    let options = GeneratorOptions::default()
        .with_flush_cache(cli.flush_cache || env_options.flush_cache)
        .with_extern_decls(!cli.no_extern_decls);

    let text = read_signatures(&cli.signatures)?;
    let (set, parse_us) = timed_block!("parse_signatures", { parse(&text) });
    let set = set.context("loading kernel signatures")?;
    debug!(functions = set.functions.len(), parse_us, "signatures loaded");
    let generator = WrapperGenerator::new(target, options);

    if cli.check {
        let plans = generator.plan(&set.functions)?;
        eprintln!("ok: {} wrapper(s) for {}", plans.len(), generator.target());
        return Ok(());
    }

    let source = generator.generate(&set.functions)?;
    match &cli.output {
        Some(path) => fs::write(path, &source).with_context(|| format!("writing {}", path.display()))?,
        None => io::stdout().write_all(source.as_bytes())?,
    }
    Ok(())
}
