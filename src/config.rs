use crate::snap::WindowStateTracking;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub snap: SnapConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub shortcuts: ShortcutConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapTrigger {
    #[default]
    DragEnd,
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_quiescence_ms")]
    pub quiescence_ms: u64,
    #[serde(default)]
    pub trigger: SnapTrigger,
    #[serde(default)]
    pub window_state_tracking: WindowStateTracking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_layout_dir")]
    pub directory: String,
    #[serde(default = "default_layout_name")]
    pub default_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutConfig {
    #[serde(default = "default_bindings")]
    pub bindings: HashMap<String, String>,
}

fn default_threshold() -> f64 {
    20.0
}
fn default_quiescence_ms() -> u64 {
    250
}
fn default_layout_dir() -> String {
    format!(
        "{}/.config/snapdesk/layouts",
        std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
    )
}
fn default_layout_name() -> String {
    "default".to_string()
}
fn default_socket_path() -> String {
    "/tmp/snapdesk.sock".to_string()
}

fn default_bindings() -> HashMap<String, String> {
    let mut bindings = HashMap::new();
    bindings.insert("CommandOrControl+Alt+S".to_string(), "save_layout".to_string());
    bindings.insert("CommandOrControl+Alt+R".to_string(), "restore_layout".to_string());
    bindings.insert("CommandOrControl+Alt+U".to_string(), "ungroup_all".to_string());
    bindings.insert("CommandOrControl+Alt+G".to_string(), "toggle_snap".to_string());
    bindings
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            quiescence_ms: default_quiescence_ms(),
            trigger: SnapTrigger::default(),
            window_state_tracking: WindowStateTracking::default(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            directory: default_layout_dir(),
            default_name: default_layout_name(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            bindings: default_bindings(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snap: SnapConfig::default(),
            layout: LayoutConfig::default(),
            ipc: IpcConfig::default(),
            shortcuts: ShortcutConfig::default(),
        }
    }
}

impl SnapConfig {
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

impl LayoutConfig {
    pub fn directory(&self) -> PathBuf {
        PathBuf::from(&self.directory)
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config/snapdesk/config.toml")
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };

        if !config.snap.threshold.is_finite() || config.snap.threshold < 0.0 {
            anyhow::bail!("snap.threshold must be a non-negative number");
        }
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn reload<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        *self = Self::load(path)?;
        Ok(())
    }
}
