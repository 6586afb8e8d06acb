use clap::{Parser, Subcommand};
use log::{error, info};
use snapdesk::backend::HeadlessContainer;
use snapdesk::config::default_config_path;
use snapdesk::ipc::{IpcClient, IpcServer};
use snapdesk::{Config, Result, WindowManager};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "snapdesk")]
#[command(about = "Snap-assist window grouping for desktop containers")]
struct Cli {
    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the window manager daemon")]
    Start,
    #[command(about = "Stop the window manager daemon")]
    Stop,
    #[command(about = "Reload configuration")]
    Reload,
    #[command(about = "Show window manager status")]
    Status,
    #[command(about = "Save the current layout")]
    Save { name: Option<String> },
    #[command(about = "Restore a saved layout")]
    Restore { name: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;
    let client = IpcClient::new(config.ipc.socket_path.clone());

    let response = match cli.command {
        Some(Commands::Start) | None => {
            if IpcClient::check_connection(&config.ipc.socket_path).await {
                error!("snapdesk is already running on {}", config.ipc.socket_path);
                std::process::exit(1);
            }

            info!("Starting snapdesk");
            let container = Arc::new(HeadlessContainer::new());
            let mut wm = WindowManager::new(container, config.clone()).with_config_path(&config_path);
            IpcServer::new(&config.ipc, wm.handle()).start().await?;
            wm.run().await?;
            return Ok(());
        }
        Some(Commands::Stop) => {
            info!("Stopping snapdesk");
            client.quit().await?
        }
        Some(Commands::Reload) => {
            info!("Reloading configuration");
            client.reload_config().await?
        }
        Some(Commands::Status) => client.get_status().await?,
        Some(Commands::Save { name }) => client.save_layout(name).await?,
        Some(Commands::Restore { name }) => client.restore_layout(name).await?,
    };

    if !response.success {
        eprintln!("✗ {}", response.message);
        std::process::exit(1);
    }
    println!("✓ {}", response.message);
    if let Some(data) = response.data {
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}
