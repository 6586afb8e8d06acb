use snapdesk::config::{default_config_path, Config};
use snapdesk::ipc::IpcClient;

#[tokio::main]
async fn main() -> snapdesk::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: snapdesk-cli <command> [args...]");
        eprintln!("Commands: ping, help, list, groups, status, create, move, join, leave, close,");
        eprintln!("          ungroup-all, toggle-snap, save-layout, restore-layout, reload, quit");
        std::process::exit(1);
    }

    let command = &args[1];
    let command_args = args[2..].to_vec();

    let socket_path = std::env::var("SNAPDESK_SOCKET").unwrap_or_else(|_| {
        Config::load(default_config_path())
            .map(|config| config.ipc.socket_path)
            .unwrap_or_else(|_| "/tmp/snapdesk.sock".to_string())
    });

    match IpcClient::run_command(&socket_path, command, command_args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
