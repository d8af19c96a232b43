use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sable::JitConfig;
use sable::config::Verbosity;
use sable::offline::{optimize_file, process_resolver};

#[derive(Parser, Debug)]
#[command(name = "sable", version, about = "Offline driver for the sable trace optimizer")]
struct Cli {
    /// TOML configuration file (needs the `toml-config` feature)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured verbosity (silent, stats, ir, interpreting)
    #[arg(long, global = true)]
    verbosity: Option<Verbosity>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the optimizer pipeline over one function of a JSON module
    Opt {
        /// IR module (.json)
        module: PathBuf,

        /// Function to optimize
        #[arg(long)]
        function: String,

        /// Print the result as JSON instead of text
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,

        /// Print the pass counters after the IR
        #[arg(long, action = clap::ArgAction::SetTrue)]
        stats: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => JitConfig::from_file(path)?.merge_with_env(),
        None => JitConfig::from_env(),
    };
    if let Some(verbosity) = cli.verbosity {
        config.verbosity = verbosity;
    }
    utils::init_logging(config.verbosity.log_filter());

    match cli.command {
        Command::Opt {
            module,
            function,
            json,
            stats,
        } => {
            let resolver = process_resolver();
            let optimized = optimize_file(&module, &function, &config, &resolver)?;
            if json {
                let text = serde_json::to_string_pretty(&optimized.function)
                    .context("failed to encode the optimized function")?;
                println!("{text}");
            } else {
                print!("{}", optimized.function);
            }
            if stats {
                println!(
                    "; {} -> {} instructions",
                    optimized.insts_before,
                    optimized.function.inst_count()
                );
                for (name, value) in optimized.counters.to_pairs() {
                    println!("; {name}: {value}");
                }
            }
        }
    }
    Ok(())
}
