use log::{error, info};
use snapdesk::backend::HeadlessContainer;
use snapdesk::config::default_config_path;
use snapdesk::ipc::IpcServer;
use snapdesk::{Command, Config, Result, WindowManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    info!("Starting snapdesk daemon");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let config = Config::load(&config_path)?;
    let container = Arc::new(HeadlessContainer::new());
    let mut wm = WindowManager::new(container.clone(), config.clone()).with_config_path(&config_path);
    let handle = wm.handle();

    IpcServer::new(&config.ipc, handle.clone()).start().await?;

    let mut run = tokio::spawn(async move { wm.run().await });

    tokio::select! {
        result = &mut run => {
            match result {
                Ok(Err(e)) => error!("Window manager error: {}", e),
                Err(e) => error!("Window manager task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            if let Err(e) = handle.execute(Command::Quit).await {
                error!("Failed to stop window manager: {}", e);
            }
            let _ = run.await;
        }
    }

    container.shutdown();
    if let Err(e) = std::fs::remove_file(&config.ipc.socket_path) {
        info!("Socket {} not removed: {}", config.ipc.socket_path, e);
    }

    Ok(())
}
