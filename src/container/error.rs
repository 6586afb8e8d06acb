use super::WindowId;
use crate::geometry::Rectangle;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContainerError {
    #[error("window {0} does not allow grouping")]
    GroupingUnsupported(WindowId),

    #[error("window {window} is grouped apart from window {target}")]
    AlreadyGrouped { window: WindowId, target: WindowId },

    #[error("unknown window {0}")]
    UnknownWindow(WindowId),

    #[error("invalid window bounds {0}")]
    InvalidBounds(Rectangle),

    #[error("invalid accelerator '{0}'")]
    InvalidAccelerator(String),

    #[error("shortcut '{0}' is already registered")]
    ShortcutConflict(String),

    #[error("backend operation `{operation}` failed: {message}")]
    BackendOperationFailed {
        operation: &'static str,
        message: String,
    },
}

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;
