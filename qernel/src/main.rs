#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use qernel::{QernelConfig, render_scenario, scenarios};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "qernel", version, about = "Kernel builder and lowering driver")]
struct Cli {
    /// Configuration file. Defaults to `./qernel.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset. Overrides `[log] level`.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the built-in scenarios.
    List,

    /// Build, lower and print a scenario.
    Demo {
        scenario: String,

        /// Skip the structural verifier.
        #[arg(long, default_value_t = false)]
        no_verify: bool,

        /// Merge structurally identical callees.
        #[arg(long, default_value_t = false)]
        dedup: bool,
    },

    /// Print the effective configuration.
    Config,
}

fn init_logging(default: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let mut config = QernelConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log {
        config.log.level = level;
    }
    init_logging(&config.log.level);
    debug!(?config, "loaded configuration");

    match cli.cmd {
        Cmd::List => {
            for s in scenarios::SCENARIOS {
                println!("{:<22} {}", s.name, s.summary);
            }
        }
        Cmd::Demo {
            scenario,
            no_verify,
            dedup,
        } => {
            let Some(scenario) = scenarios::find(&scenario) else {
                let known: Vec<&str> = scenarios::SCENARIOS.iter().map(|s| s.name).collect();
                return Err(miette::miette!(
                    help = format!("known scenarios: {}", known.join(", ")),
                    "unknown scenario `{scenario}`"
                ));
            };
            let mut lowering = config.lowering;
            if no_verify {
                lowering.verify = false;
            }
            if dedup {
                lowering.dedup_structural = true;
            }
            print!("{}", render_scenario(scenario, &lowering)?);
        }
        Cmd::Config => print!("{}", config.to_toml()?),
    }
    Ok(())
}
