use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use relc_core::config::CompileConfig;
use relc_core::engine::Compiler;
use relc_core::execution::provider::MemoryTableProvider;
use relc_core::relalg::description::QueryDescription;
use relc_error::{DbError, Result, ResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Table,
    Json,
}

#[derive(Parser)]
#[clap(name = "relc")]
struct Arguments {
    /// Query description to compile, '-' reads from stdin.
    #[clap(required_unless_present = "list_settings")]
    plan: Option<PathBuf>,
    /// Print the specialized program.
    #[clap(long)]
    explain: bool,
    /// Stop after compilation, don't execute the program.
    #[clap(long)]
    compile_only: bool,
    /// Override a compile setting, e.g. '--set enable_optimizations=false'.
    #[clap(long = "set", value_name = "NAME=VALUE")]
    settings: Vec<String>,
    /// Output format for query results.
    #[clap(long, value_enum, default_value_t = OutputMode::Table)]
    output: OutputMode,
    /// Print every compile setting and exit.
    #[clap(long)]
    list_settings: bool,
}

/// Compile and run query descriptions.
fn main() {
    let args = Arguments::parse();
    relc_logutil::configure_global_logger(
        tracing::Level::ERROR,
        relc_logutil::LogFormat::HumanReadable,
        io::stderr,
    );

    // Outer result for the panic, inner is the compile result.
    let result = std::panic::catch_unwind(|| inner(args));

    match result {
        Ok(Err(err)) => {
            println!("ERROR: {err}");
            std::process::exit(1);
        }
        Err(err) => {
            println!("PANIC: {err:?}");
            std::process::exit(2);
        }
        Ok(Ok(())) => (),
    }
}

fn inner(args: Arguments) -> Result<()> {
    let mut stdout = BufWriter::new(io::stdout());

    if args.list_settings {
        for (name, description) in CompileConfig::settings() {
            writeln!(stdout, "{name}\t{description}")?;
        }
        stdout.flush()?;
        return Ok(());
    }

    let mut config = CompileConfig::new();
    for setting in &args.settings {
        config.set_from_str(setting)?;
    }

    let path = args
        .plan
        .ok_or_else(|| DbError::new("Missing query description"))?;
    let content = read_plan(&path)?;
    let query = QueryDescription::from_json(&content)?;

    let compiled = Compiler::new(config).compile_description(&query)?;
    if args.explain {
        writeln!(stdout, "{}", compiled.explain())?;
    }
    if args.compile_only {
        stdout.flush()?;
        return Ok(());
    }

    let provider = MemoryTableProvider::from_descriptions(&query.tables)?;
    let result = compiled.execute(&provider)?;
    match args.output {
        OutputMode::Table => write!(stdout, "{result}")?,
        OutputMode::Json => {
            let json = serde_json::to_string(&result.to_json())
                .context("Failed to serialize query result")?;
            writeln!(stdout, "{json}")?;
        }
    }
    stdout.flush()?;

    Ok(())
}

fn read_plan(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut content = String::new();
        io::stdin().read_to_string(&mut content)?;
        return Ok(content);
    }
    std::fs::read_to_string(path).map_err(|e| {
        DbError::with_source("Failed to read query description", Box::new(e))
            .with_field("path", path.display())
    })
}
