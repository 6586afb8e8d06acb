pub mod backend;
pub mod config;
pub mod container;
pub mod events;
pub mod geometry;
pub mod group;
pub mod ipc;
pub mod layout;
pub mod message_bus;
pub mod shortcuts;
pub mod snap;
pub mod tracking;
pub mod window_manager;

pub use config::Config;
pub use container::{Container, ContainerError, ContainerWindow, WindowHandle, WindowId, WindowOptions};
pub use geometry::{Display, Point, Rectangle};
pub use snap::WindowStateTracking;
pub use window_manager::{Command, WindowManager, WindowManagerHandle};

pub type Result<T> = anyhow::Result<T>;
