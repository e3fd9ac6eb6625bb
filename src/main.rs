use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chainboot::{
    AppState, Config, Error, FileBooter, PxeServer, Result, StaticInterfaceResolver,
};

#[derive(Parser)]
#[command(name = "chainboot")]
#[command(author, version, about = "A PXE boot server that chainloads clients onto HTTP", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting PXE boot server with config: {:?}", cli.config);

            let kernel = config.kernel.clone().ok_or_else(|| {
                Error::InvalidConfig("kernel must be set to run the server".to_string())
            })?;
            let bootloader = std::fs::read(&config.bootloader_file)?;

            let config = Arc::new(config);
            let resolver = Arc::new(StaticInterfaceResolver::new(config.server_ip));
            let pxe = PxeServer::new(Arc::clone(&config), resolver)?;

            let booter = Arc::new(FileBooter::new(
                PathBuf::from(kernel),
                config.initrds.iter().map(PathBuf::from).collect(),
                config.cmdline.clone(),
            ));
            let state = AppState::new(booter, bootloader)?;

            tokio::select! {
                result = pxe.run() => result,
                result = chainboot::http::serve(config.http_port, state) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
