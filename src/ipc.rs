use crate::config::IpcConfig;
use crate::container::{WindowId, WindowOptions};
use crate::geometry::Rectangle;
use crate::window_manager::{Command, WindowManagerHandle};
use crate::Result;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};

#[derive(Debug, Serialize, Deserialize)]
pub struct IpcMessage {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

pub struct IpcServer {
    config: IpcConfig,
    handle: WindowManagerHandle,
}

impl IpcServer {
    pub fn new(config: &IpcConfig, handle: WindowManagerHandle) -> Self {
        Self {
            config: config.clone(),
            handle,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let socket_path = &self.config.socket_path;

        if Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!("📡 IPC server listening on {}", socket_path);

        let handle = self.handle.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("IPC client connected: {:?}", addr);
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_client(stream, handle).await {
                                error!("Error handling IPC client: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting IPC connection: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    async fn handle_client(stream: UnixStream, handle: WindowManagerHandle) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        let client_timeout = Duration::from_secs(30);

        while let Ok(Ok(bytes_read)) = timeout(client_timeout, reader.read_line(&mut line)).await {
            if bytes_read == 0 {
                debug!("IPC client disconnected");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            debug!("Received IPC message: {}", trimmed);

            let response = match serde_json::from_str::<IpcMessage>(trimmed) {
                Ok(message) => Self::process_message(message, &handle).await,
                Err(e) => IpcResponse::error(format!("Invalid JSON: {}", e)),
            };

            let response_json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize response: {}", e);
                    r#"{"success":false,"message":"Internal server error","data":null}"#.to_string()
                }
            };

            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            debug!("Sent response: {}", response_json);
            line.clear();
        }

        debug!("IPC client handler finished");
        Ok(())
    }

    pub async fn process_message(message: IpcMessage, handle: &WindowManagerHandle) -> IpcResponse {
        debug!("Processing command: {} with args: {:?}", message.command, message.args);

        match message.command.as_str() {
            "ping" => {
                return IpcResponse::ok(
                    "pong",
                    Some(json!({
                        "timestamp": chrono::Utc::now().to_rfc3339(),
                        "version": env!("CARGO_PKG_VERSION")
                    })),
                );
            }
            "help" => return IpcResponse::ok("Available commands", Some(help())),
            _ => {}
        }

        let command = match parse_command(&message.command, &message.args) {
            Ok(command) => command,
            Err(e) => return IpcResponse::error(e.to_string()),
        };

        match handle.execute(command).await {
            Ok(data) => IpcResponse::ok(format!("{} done", message.command), Some(data)),
            Err(e) => IpcResponse::error(format!("{} failed: {}", message.command, e)),
        }
    }
}

fn window_arg(args: &[String], index: usize, usage: &str) -> Result<WindowId> {
    args.get(index)
        .and_then(|arg| arg.parse::<u32>().ok())
        .map(WindowId)
        .ok_or_else(|| anyhow::anyhow!("usage: {}", usage))
}

fn bounds_args(args: &[String], usage: &str) -> Result<Rectangle> {
    let values: Vec<f64> = args
        .iter()
        .map(|arg| arg.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| anyhow::anyhow!("usage: {}", usage))?;

    match values.as_slice() {
        [x, y, width, height] => Ok(Rectangle::new(*x, *y, *width, *height)),
        _ => Err(anyhow::anyhow!("usage: {}", usage)),
    }
}

pub fn parse_command(command: &str, args: &[String]) -> Result<Command> {
    let optional_name = || args.first().cloned();

    let command = match command {
        "list" => Command::ListWindows,
        "groups" => Command::ListGroups,
        "status" => Command::GetStatus,
        "toggle-snap" => Command::ToggleSnapAssist,
        "ungroup-all" => Command::UngroupAll,
        "save-layout" => Command::SaveLayout(optional_name()),
        "restore-layout" => Command::RestoreLayout(optional_name()),
        "reload" => Command::ReloadConfig,
        "quit" | "stop" => Command::Quit,
        "create" => {
            const USAGE: &str = "create <name> <x> <y> <width> <height> [--no-grouping]";
            let (name, rest) = args
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("usage: {}", USAGE))?;
            let (rest, grouping) = match rest.split_last() {
                Some((flag, bounds)) if flag == "--no-grouping" => (bounds, false),
                _ => (rest, true),
            };
            let mut options = WindowOptions::new(name.clone(), bounds_args(rest, USAGE)?);
            options.allow_grouping = grouping;
            Command::CreateWindow(options)
        }
        "move" => {
            const USAGE: &str = "move <window_id> <x> <y> <width> <height>";
            let id = window_arg(args, 0, USAGE)?;
            Command::MoveWindow(id, bounds_args(&args[1..], USAGE)?)
        }
        "join" => {
            const USAGE: &str = "join <window_id> <target_id>";
            Command::JoinGroup(window_arg(args, 0, USAGE)?, window_arg(args, 1, USAGE)?)
        }
        "leave" => Command::LeaveGroup(window_arg(args, 0, "leave <window_id>")?),
        "close" => Command::CloseWindow(window_arg(args, 0, "close <window_id>")?),
        _ => anyhow::bail!(
            "Unknown command: '{}'. Use 'help' to see available commands.",
            command
        ),
    };

    Ok(command)
}

fn help() -> serde_json::Value {
    json!({
        "commands": [
            {"name": "list", "args": [], "description": "List tracked windows"},
            {"name": "groups", "args": [], "description": "List window groups"},
            {"name": "status", "args": [], "description": "Get window manager status"},
            {"name": "create", "args": ["name", "x", "y", "width", "height", "[--no-grouping]"], "description": "Create a window"},
            {"name": "move", "args": ["window_id", "x", "y", "width", "height"], "description": "Move and resize a window"},
            {"name": "join", "args": ["window_id", "target_id"], "description": "Join a window to another window's group"},
            {"name": "leave", "args": ["window_id"], "description": "Remove a window from its group"},
            {"name": "close", "args": ["window_id"], "description": "Close a window"},
            {"name": "ungroup-all", "args": [], "description": "Dissolve every group"},
            {"name": "toggle-snap", "args": [], "description": "Pause or resume snap assist"},
            {"name": "save-layout", "args": ["[name]"], "description": "Save the current layout"},
            {"name": "restore-layout", "args": ["[name]"], "description": "Restore a saved layout"},
            {"name": "reload", "args": [], "description": "Reload configuration"},
            {"name": "ping", "args": [], "description": "Test connection"},
            {"name": "quit", "args": [], "description": "Stop the window manager"},
            {"name": "help", "args": [], "description": "Show this help"}
        ]
    })
}

pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    pub async fn send_command(&self, command: &str, args: Vec<String>) -> Result<IpcResponse> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let message = IpcMessage {
            command: command.to_string(),
            args,
        };
        let message_json = serde_json::to_string(&message)?;

        writer.write_all(message_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();

        match timeout(Duration::from_secs(10), reader.read_line(&mut response_line)).await {
            Ok(Ok(_)) => Ok(serde_json::from_str(&response_line)?),
            Ok(Err(e)) => Err(anyhow::anyhow!("Failed to read response: {}", e)),
            Err(_) => Err(anyhow::anyhow!("Response timeout")),
        }
    }

    pub async fn ping(&self) -> Result<IpcResponse> {
        self.send_command("ping", vec![]).await
    }

    pub async fn get_status(&self) -> Result<IpcResponse> {
        self.send_command("status", vec![]).await
    }

    pub async fn reload_config(&self) -> Result<IpcResponse> {
        self.send_command("reload", vec![]).await
    }

    pub async fn quit(&self) -> Result<IpcResponse> {
        self.send_command("quit", vec![]).await
    }

    pub async fn save_layout(&self, name: Option<String>) -> Result<IpcResponse> {
        self.send_command("save-layout", name.into_iter().collect()).await
    }

    pub async fn restore_layout(&self, name: Option<String>) -> Result<IpcResponse> {
        self.send_command("restore-layout", name.into_iter().collect()).await
    }
}

// Helpers for the command line front ends
impl IpcClient {
    pub async fn run_command(socket_path: &str, command: &str, args: Vec<String>) -> Result<bool> {
        let client = IpcClient::new(socket_path.to_string());
        let response = client.send_command(command, args).await?;

        if response.success {
            println!("✓ {}", response.message);
            if let Some(data) = response.data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        } else {
            eprintln!("✗ {}", response.message);
        }

        Ok(response.success)
    }

    pub async fn check_connection(socket_path: &str) -> bool {
        let client = IpcClient::new(socket_path.to_string());
        client.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessContainer;
    use crate::config::Config;
    use crate::window_manager::WindowManager;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_window_commands() {
        assert_matches!(
            parse_command("move", &args(&["3", "10", "20", "300", "200"])),
            Ok(Command::MoveWindow(WindowId(3), bounds)) if bounds == Rectangle::new(10.0, 20.0, 300.0, 200.0)
        );
        assert_matches!(
            parse_command("join", &args(&["2", "1"])),
            Ok(Command::JoinGroup(WindowId(2), WindowId(1)))
        );
        assert_matches!(parse_command("leave", &args(&["4"])), Ok(Command::LeaveGroup(WindowId(4))));
        assert_matches!(parse_command("stop", &[]), Ok(Command::Quit));
    }

    #[test]
    fn parses_create_with_grouping_flag() {
        let command = parse_command("create", &args(&["chart", "0", "0", "400", "300", "--no-grouping"]));
        assert_matches!(command, Ok(Command::CreateWindow(options)) if options.name == "chart" && !options.allow_grouping);

        let command = parse_command("create", &args(&["blotter", "0", "0", "400", "300"]));
        assert_matches!(command, Ok(Command::CreateWindow(options)) if options.allow_grouping);
    }

    #[test]
    fn layout_names_are_optional() {
        assert_matches!(parse_command("save-layout", &[]), Ok(Command::SaveLayout(None)));
        assert_matches!(
            parse_command("restore-layout", &args(&["trading"])),
            Ok(Command::RestoreLayout(Some(name))) if name == "trading"
        );
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(parse_command("move", &args(&["x", "0", "0", "1", "1"])).is_err());
        assert!(parse_command("move", &args(&["1", "0", "0"])).is_err());
        assert!(parse_command("join", &args(&["1"])).is_err());
        assert!(parse_command("create", &[]).is_err());
        assert!(parse_command("focus", &args(&["1"])).is_err());
    }

    #[tokio::test]
    async fn messages_round_trip_through_window_manager() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.layout.directory = dir.path().to_string_lossy().into_owned();

        let container = Arc::new(HeadlessContainer::new());
        let mut wm = WindowManager::new(container, config);
        let handle = wm.handle();
        let task = tokio::spawn(async move { wm.run().await });

        let message = IpcMessage {
            command: "create".to_string(),
            args: args(&["notes", "0", "0", "200", "200"]),
        };
        let response = IpcServer::process_message(message, &handle).await;
        assert!(response.success);

        let message = IpcMessage {
            command: "close".to_string(),
            args: args(&["99"]),
        };
        let response = IpcServer::process_message(message, &handle).await;
        assert!(!response.success);
        assert!(response.message.contains("unknown window 99"));

        let ping = IpcMessage {
            command: "ping".to_string(),
            args: vec![],
        };
        assert_eq!(IpcServer::process_message(ping, &handle).await.message, "pong");

        handle.execute(Command::Quit).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_answers_over_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("snapdesk.sock").to_string_lossy().into_owned();
        let mut config = Config::default();
        config.layout.directory = dir.path().to_string_lossy().into_owned();
        config.ipc.socket_path = socket_path.clone();

        let container = Arc::new(HeadlessContainer::new());
        let mut wm = WindowManager::new(container, config.clone());
        let server = IpcServer::new(&config.ipc, wm.handle());
        server.start().await.unwrap();
        let task = tokio::spawn(async move { wm.run().await });

        assert!(IpcClient::check_connection(&socket_path).await);
        let client = IpcClient::new(socket_path.clone());
        let status = client.get_status().await.unwrap();
        assert!(status.success);
        assert_eq!(status.data.unwrap()["host"], "headless");

        let response = client.send_command("nonsense", vec![]).await.unwrap();
        assert!(!response.success);

        assert!(client.quit().await.unwrap().success);
        task.await.unwrap().unwrap();
    }
}
