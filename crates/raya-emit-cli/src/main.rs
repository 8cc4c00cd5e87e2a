//! raya-emit command-line driver
//!
//! Builds the demo modules, inspects persisted `.ryb`/`.rye` files and runs
//! them on the interpreter.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "raya-emit")]
#[command(about = "Runtime code generation toolkit for Raya bytecode", long_about = None)]
#[command(version)]
struct Cli {
    /// Colored output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header, types and functions of a module file
    Inspect {
        /// Module file (.ryb or .rye)
        file: PathBuf,
        /// Disassemble every function body
        #[arg(long)]
        disasm: bool,
        /// Print the embedded pseudo-source listing
        #[arg(long)]
        listing: bool,
    },

    /// Run a module file on the interpreter
    Run {
        /// Module file (.ryb or .rye)
        file: PathBuf,
        /// Static method to call as `Class.method` (defaults to the entry point)
        #[arg(short, long)]
        entry: Option<String>,
        /// Emit options file supplying the call-depth limit
        #[arg(long)]
        config: Option<PathBuf>,
        /// Arguments, converted to the declared parameter types
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Build the demo modules (Counter, Calc, Guard) and print their listing
    Demo {
        /// Directory the module is written to
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Module kind: library or executable
        #[arg(short, long)]
        kind: Option<String>,
        /// Emit options file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Enable with `RUST_LOG=raya_emit=debug`.
fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Inspect {
            file,
            disasm,
            listing,
        } => commands::inspect::execute(commands::inspect::InspectArgs {
            file,
            disasm,
            listing,
            color,
        }),

        Commands::Run {
            file,
            entry,
            config,
            args,
        } => commands::run::execute(commands::run::RunArgs {
            file,
            entry,
            config,
            args,
        }),

        Commands::Demo { out, kind, config } => {
            commands::demo::execute(commands::demo::DemoArgs { out, kind, config, color })
        }
    }
}
