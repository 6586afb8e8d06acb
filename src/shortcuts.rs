use crate::container::{ContainerError, ContainerResult};
use crate::window_manager::Command;
use crate::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tokio::sync::{broadcast, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModifierKey {
    Alt,   // Option key on macOS
    Ctrl,  // Control key
    Shift, // Shift key
    Cmd,   // Command / Super / Meta
}

impl ModifierKey {
    fn name(&self) -> &'static str {
        match self {
            Self::Alt => "Alt",
            Self::Ctrl => "Ctrl",
            Self::Shift => "Shift",
            Self::Cmd => "Cmd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombination {
    pub modifiers: BTreeSet<ModifierKey>,
    pub key: String,
}

impl KeyCombination {
    pub fn parse(accelerator: &str) -> ContainerResult<Self> {
        let invalid = || ContainerError::InvalidAccelerator(accelerator.to_string());

        let parts: Vec<&str> = accelerator.split('+').map(str::trim).collect();
        let (key_str, modifier_parts) = parts.split_last().ok_or_else(invalid)?;
        if key_str.is_empty() {
            return Err(invalid());
        }

        let mut modifiers = BTreeSet::new();
        for part in modifier_parts {
            let modifier = match part.to_lowercase().as_str() {
                "alt" | "option" => ModifierKey::Alt,
                "ctrl" | "control" => ModifierKey::Ctrl,
                "shift" => ModifierKey::Shift,
                "cmd" | "command" | "super" | "meta" => ModifierKey::Cmd,
                "commandorcontrol" | "cmdorctrl" => {
                    if cfg!(target_os = "macos") {
                        ModifierKey::Cmd
                    } else {
                        ModifierKey::Ctrl
                    }
                }
                _ => {
                    warn!("Unknown modifier key: {}", part);
                    return Err(invalid());
                }
            };
            modifiers.insert(modifier);
        }

        let key = match key_str.to_lowercase().as_str() {
            "return" | "enter" => "enter".to_string(),
            "esc" | "escape" => "escape".to_string(),
            "arrowleft" => "left".to_string(),
            "arrowright" => "right".to_string(),
            "arrowup" => "up".to_string(),
            "arrowdown" => "down".to_string(),
            other => other.to_string(),
        };

        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for KeyCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier.name())?;
        }
        write!(f, "{}", self.key)
    }
}

#[async_trait]
pub trait GlobalShortcutManager: Send + Sync {
    async fn register(&self, accelerator: &str) -> ContainerResult<()>;
    async fn unregister(&self, accelerator: &str) -> ContainerResult<()>;
    async fn is_registered(&self, accelerator: &str) -> ContainerResult<bool>;
    async fn unregister_all(&self) -> ContainerResult<()>;

    fn activations(&self) -> broadcast::Receiver<KeyCombination>;
}

pub struct ShortcutRegistry {
    registered: Mutex<HashSet<KeyCombination>>,
    sender: broadcast::Sender<KeyCombination>,
}

impl ShortcutRegistry {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            registered: Mutex::new(HashSet::new()),
            sender,
        }
    }

    pub async fn trigger(&self, accelerator: &str) -> ContainerResult<bool> {
        let combination = KeyCombination::parse(accelerator)?;
        if !self.registered.lock().await.contains(&combination) {
            debug!("Ignoring unregistered shortcut {}", combination);
            return Ok(false);
        }
        info!("Shortcut triggered: {}", combination);
        let _ = self.sender.send(combination);
        Ok(true)
    }
}

impl Default for ShortcutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GlobalShortcutManager for ShortcutRegistry {
    async fn register(&self, accelerator: &str) -> ContainerResult<()> {
        let combination = KeyCombination::parse(accelerator)?;
        let mut registered = self.registered.lock().await;
        if !registered.insert(combination) {
            return Err(ContainerError::ShortcutConflict(accelerator.to_string()));
        }
        debug!("Registered shortcut {}", accelerator);
        Ok(())
    }

    async fn unregister(&self, accelerator: &str) -> ContainerResult<()> {
        let combination = KeyCombination::parse(accelerator)?;
        self.registered.lock().await.remove(&combination);
        Ok(())
    }

    async fn is_registered(&self, accelerator: &str) -> ContainerResult<bool> {
        let combination = KeyCombination::parse(accelerator)?;
        Ok(self.registered.lock().await.contains(&combination))
    }

    async fn unregister_all(&self) -> ContainerResult<()> {
        self.registered.lock().await.clear();
        Ok(())
    }

    fn activations(&self) -> broadcast::Receiver<KeyCombination> {
        self.sender.subscribe()
    }
}

pub fn parse_bindings(config_bindings: &HashMap<String, String>) -> HashMap<KeyCombination, Command> {
    let mut bindings = HashMap::new();

    for (accelerator, action) in config_bindings {
        let combination = match KeyCombination::parse(accelerator) {
            Ok(combination) => combination,
            Err(e) => {
                warn!("Failed to parse key combination: {}", e);
                continue;
            }
        };
        match parse_action(action) {
            Ok(command) => {
                bindings.insert(combination, command);
            }
            Err(e) => warn!("Ignoring binding {}: {}", accelerator, e),
        }
    }

    bindings
}

pub fn parse_action(action: &str) -> Result<Command> {
    let (command, argument) = match action.split_once(':') {
        Some((command, argument)) => (command, Some(argument.to_string())),
        None => (action, None),
    };

    match command {
        "save_layout" => Ok(Command::SaveLayout(argument)),
        "restore_layout" => Ok(Command::RestoreLayout(argument)),
        "ungroup_all" => Ok(Command::UngroupAll),
        "toggle_snap" => Ok(Command::ToggleSnapAssist),
        "status" => Ok(Command::GetStatus),
        _ => Err(anyhow::anyhow!("Unknown action: {}", action)),
    }
}
