use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use edgegate::Config;
use edgegate_core::{telemetry, version};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Multi-tenant reverse proxy and edge gateway", long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Gateway configuration file (routes, certificates, security)
	#[arg(short, long, value_name = "file")]
	config: PathBuf,

	/// Process table configuration file
	#[arg(short, long, value_name = "file")]
	processes: Option<PathBuf>,

	/// Validate the configuration and exit
	#[arg(long)]
	validate_only: bool,

	/// Print version and exit
	#[arg(short = 'V', long = "version")]
	version: bool,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if args.version {
		println!("{}", version::BuildInfo::new());
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("failed to build runtime")
		.block_on(async move {
			let config = load(&args).await?;
			if args.validate_only {
				println!("Configuration is valid!");
				return Ok(());
			}

			let _log_flush = telemetry::setup_logging(
				Some(&config.log_level),
				config.log_file.as_deref(),
			);
			info!("{}", version::BuildInfo::new());
			serve(Arc::new(config)).await
		})
}

async fn load(args: &Args) -> anyhow::Result<Config> {
	edgegate::config::load(&args.config, args.processes.as_deref()).await
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
	edgegate::app::run(config).await?.wait_termination().await
}
