//! Pane - A single process slot within a window

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::layout::Rect;
use crate::core::process::{PaneProcess, ProcessError};

/// Unique identifier for a pane
pub type PaneId = String;

/// A pane occupying one rectangle of its window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pane {
    /// Unique identifier
    pub id: PaneId,
    /// Position within the window's pane list
    pub index: usize,
    /// Geometry, derived from the window layout
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Command the pane was started with
    pub command: String,
    pub working_dir: PathBuf,
    /// Whether this pane is the window's active pane
    pub active: bool,
    /// Attached process (not persisted)
    #[serde(skip)]
    pub process: Option<Arc<PaneProcess>>,
}

impl Pane {
    /// Create a new pane with no geometry and no process
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            index: 0,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            command: command.into(),
            working_dir: working_dir.into(),
            active: false,
            process: None,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Move and resize the pane
    pub fn apply_geometry(&mut self, rect: Rect) {
        self.x = rect.x;
        self.y = rect.y;
        self.width = rect.width;
        self.height = rect.height;
    }

    /// Detach and terminate the pane's process, if any
    pub fn release(&mut self) -> Result<(), ProcessError> {
        match self.process.take() {
            Some(process) => process.terminate(),
            None => Ok(()),
        }
    }
}
