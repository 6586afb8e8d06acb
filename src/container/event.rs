use super::WindowId;
use crate::geometry::Rectangle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventKind {
    #[serde(rename = "window-created")]
    Created,
    #[serde(rename = "window-closed")]
    Closed,
    #[serde(rename = "window-moved")]
    Moved,
    #[serde(rename = "window-resized")]
    Resized,
    #[serde(rename = "window-move-ended")]
    MoveEnded,
    #[serde(rename = "window-joinGroup")]
    JoinedGroup,
    #[serde(rename = "window-leaveGroup")]
    LeftGroup,
}

impl WindowEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "window-created",
            Self::Closed => "window-closed",
            Self::Moved => "window-moved",
            Self::Resized => "window-resized",
            Self::MoveEnded => "window-move-ended",
            Self::JoinedGroup => "window-joinGroup",
            Self::LeftGroup => "window-leaveGroup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEvent {
    pub kind: WindowEventKind,
    pub window_id: WindowId,
    pub window_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rectangle>,
}

impl WindowEvent {
    pub fn new(kind: WindowEventKind, window_id: WindowId, window_name: impl Into<String>) -> Self {
        Self {
            kind,
            window_id,
            window_name: window_name.into(),
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Rectangle) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContainerEvent {
    Window(WindowEvent),
    LayoutSaved { name: String },
    LayoutLoaded { name: String },
}

impl From<WindowEvent> for ContainerEvent {
    fn from(event: WindowEvent) -> Self {
        ContainerEvent::Window(event)
    }
}
