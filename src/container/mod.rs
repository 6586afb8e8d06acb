mod error;
mod event;

pub use error::{ContainerError, ContainerResult};
pub use event::{ContainerEvent, WindowEvent, WindowEventKind};

use crate::events::EventHub;
use crate::geometry::{Display, Rectangle};
use crate::message_bus::MessageBus;
use crate::shortcuts::GlobalShortcutManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type WindowHandle = Arc<dyn ContainerWindow>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowOptions {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    pub bounds: Rectangle,
    #[serde(default = "default_allow_grouping")]
    pub allow_grouping: bool,
    #[serde(default = "default_show")]
    pub show: bool,
}

fn default_allow_grouping() -> bool {
    true
}

fn default_show() -> bool {
    true
}

impl WindowOptions {
    pub fn new(name: impl Into<String>, bounds: Rectangle) -> Self {
        Self {
            name: name.into(),
            url: None,
            bounds,
            allow_grouping: default_allow_grouping(),
            show: default_show(),
        }
    }

    pub fn without_grouping(mut self) -> Self {
        self.allow_grouping = false;
        self
    }
}

#[async_trait]
pub trait ContainerWindow: Send + Sync {
    fn id(&self) -> WindowId;
    fn name(&self) -> String;
    fn allow_grouping(&self) -> bool;

    async fn get_bounds(&self) -> ContainerResult<Rectangle>;
    async fn set_bounds(&self, bounds: Rectangle) -> ContainerResult<()>;

    /// Joins `target`'s group, forming a new group when `target` is ungrouped.
    ///
    /// Fails with `GroupingUnsupported` if either window disallows grouping and
    /// with `AlreadyGrouped` if this window belongs to a group other than the
    /// target's.
    async fn join_group(&self, target: &dyn ContainerWindow) -> ContainerResult<()>;

    /// No-op when the window is not grouped.
    async fn leave_group(&self) -> ContainerResult<()>;

    async fn get_group(&self) -> ContainerResult<Vec<WindowId>>;

    async fn focus(&self) -> ContainerResult<()>;
    async fn show(&self) -> ContainerResult<()>;
    async fn hide(&self) -> ContainerResult<()>;
    async fn is_showing(&self) -> ContainerResult<bool>;
    async fn close(&self) -> ContainerResult<()>;

    /// Application-supplied state captured into layouts. `None` when the
    /// application provides none.
    async fn get_state(&self) -> ContainerResult<Option<serde_json::Value>>;
    async fn set_state(&self, state: serde_json::Value) -> ContainerResult<()>;
}

#[async_trait]
pub trait Container: Send + Sync {
    fn host_type(&self) -> &str;

    fn events(&self) -> &EventHub;
    fn message_bus(&self) -> Arc<dyn MessageBus>;

    /// `None` when the backend cannot register global shortcuts.
    fn global_shortcuts(&self) -> Option<Arc<dyn GlobalShortcutManager>>;

    async fn create_window(&self, options: WindowOptions) -> ContainerResult<WindowHandle>;
    async fn get_window_by_id(&self, id: WindowId) -> ContainerResult<Option<WindowHandle>>;
    async fn get_window_by_name(&self, name: &str) -> ContainerResult<Option<WindowHandle>>;
    async fn get_all_windows(&self) -> ContainerResult<Vec<WindowHandle>>;

    async fn get_all_displays(&self) -> ContainerResult<Vec<Display>>;

    async fn get_primary_display(&self) -> ContainerResult<Display> {
        self.get_all_displays()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ContainerError::BackendOperationFailed {
                operation: "get_primary_display",
                message: "no displays reported".to_string(),
            })
    }
}
