//! Binary entry point. Parses CLI flags, loads configuration, and hands
//! off to [`cnet_agent::run`] on a multi-threaded Tokio runtime (mirrors
//! the teacher's `cloud-debugging-service/src/server.rs`).

use clap::Parser;

use cnet_agent::config::{AgentConfig, ConfigLoader};
use cnet_agent::telemetry;

#[derive(Debug, Parser)]
#[command(name = "cnet-agent", about = "Node-local workload agent")]
struct Args {
    /// Path to a TOML config file. Missing file is not an error; only
    /// environment variables and defaults apply in that case.
    #[arg(long, value_name = "PATH")]
    config_file: Option<std::path::PathBuf>,

    /// Print the effective configuration (defaults merged with file and
    /// environment overrides) as TOML and exit without starting the agent.
    #[arg(long)]
    dump_config: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let loader: ConfigLoader<AgentConfig> = ConfigLoader::new(args.config_file);
    let config = match loader.load_or_dump_config(args.dump_config)? {
        Some(config) => config,
        None => return Ok(()),
    };

    telemetry::init_tracing(&config.tracing);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(cnet_agent::run(config))?;
    Ok(())
}
