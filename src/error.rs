//! Errors raised by session, window and pane operations.

use thiserror::Error;

use crate::core::process::ProcessError;

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no session named {0:?}")]
    SessionNameNotFound(String),

    #[error("window index {index} out of range (session has {len} windows)")]
    WindowIndexOutOfRange { index: usize, len: usize },

    #[error("pane index {index} out of range (window has {len} panes)")]
    PaneIndexOutOfRange { index: usize, len: usize },

    #[error("duplicate session name: {0}")]
    NameConflict(String),

    #[error("duplicate window name in session: {0}")]
    WindowNameConflict(String),

    #[error("name must not be empty")]
    EmptyName,

    #[error("cannot close the last window of a session")]
    LastWindow,

    #[error("invalid session snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("not attached to a session")]
    NotAttached,

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl MuxError {
    /// Whether the error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MuxError::SessionNotFound(_) | MuxError::SessionNameNotFound(_)
        )
    }

    /// Whether the error is an index outside the current bounds.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            MuxError::WindowIndexOutOfRange { .. } | MuxError::PaneIndexOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
