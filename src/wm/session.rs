//! Session - A detachable, ordered collection of windows
//!
//! Structural operations here only touch data. Spawning and releasing pane
//! processes is left to the manager, which sees the panes a call created or
//! removed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::layout::LayoutKind;
use super::pane::Pane;
use super::window::Window;
use crate::error::{MuxError, Result};

/// Unique identifier for a session
pub type SessionId = String;

/// Name given to the window every session starts with
pub const DEFAULT_WINDOW_NAME: &str = "main";

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Detached,
    Destroyed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Detached => "detached",
            SessionStatus::Destroyed => "destroyed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Human-readable name (unique among live sessions)
    pub name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub windows: Vec<Window>,
    /// Index of the current window
    pub active_window: usize,
    /// Terminal size shared by every window
    pub width: u16,
    pub height: u16,
}

impl Session {
    /// Create a session with a default window holding `pane`
    pub fn new(name: String, width: u16, height: u16, layout: LayoutKind, pane: Pane) -> Self {
        let now = Utc::now();
        let window = Window::new(DEFAULT_WINDOW_NAME.to_string(), 0, width, height, layout, pane);
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            status: SessionStatus::Active,
            created_at: now,
            last_active: now,
            windows: vec![window],
            active_window: 0,
            width,
            height,
        }
    }

    /// Update the last-active timestamp
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn window(&self, index: usize) -> Result<&Window> {
        let len = self.windows.len();
        self.windows
            .get(index)
            .ok_or(MuxError::WindowIndexOutOfRange { index, len })
    }

    pub fn window_mut(&mut self, index: usize) -> Result<&mut Window> {
        let len = self.windows.len();
        self.windows
            .get_mut(index)
            .ok_or(MuxError::WindowIndexOutOfRange { index, len })
    }

    /// Get the current window
    pub fn active_window(&self) -> Option<&Window> {
        self.windows.get(self.active_window)
    }

    /// Get the focused pane of the current window
    pub fn active_pane(&self) -> Option<&Pane> {
        self.active_window().and_then(Window::active_pane)
    }

    /// All panes across all windows
    pub fn panes(&self) -> impl Iterator<Item = &Pane> {
        self.windows.iter().flat_map(|w| w.panes.iter())
    }

    pub fn panes_mut(&mut self) -> impl Iterator<Item = &mut Pane> {
        self.windows.iter_mut().flat_map(|w| w.panes.iter_mut())
    }

    /// First free `window-<n>` name
    fn generate_window_name(&self) -> String {
        (self.windows.len()..)
            .map(|n| format!("window-{}", n))
            .find(|candidate| !self.has_window_named(candidate, None))
            .unwrap_or_else(|| format!("window-{}", Uuid::new_v4()))
    }

    fn has_window_named(&self, name: &str, except: Option<usize>) -> bool {
        self.windows
            .iter()
            .any(|w| w.name == name && Some(w.index) != except)
    }

    /// Append a new window holding `pane` and switch to it
    pub fn create_window(&mut self, name: &str, layout: LayoutKind, pane: Pane) -> Result<&mut Window> {
        let name = if name.is_empty() {
            self.generate_window_name()
        } else if self.has_window_named(name, None) {
            return Err(MuxError::WindowNameConflict(name.to_string()));
        } else {
            name.to_string()
        };

        let index = self.windows.len();
        self.windows
            .push(Window::new(name, index, self.width, self.height, layout, pane));
        self.active_window = index;
        Ok(&mut self.windows[index])
    }

    /// Remove a window and return it with its panes still attached.
    ///
    /// The last window of a session cannot be closed.
    pub fn close_window(&mut self, index: usize) -> Result<Window> {
        self.window(index)?;
        if self.windows.len() == 1 {
            return Err(MuxError::LastWindow);
        }

        let removed = self.windows.remove(index);
        if index < self.active_window {
            self.active_window -= 1;
        } else if self.active_window >= self.windows.len() {
            self.active_window = self.windows.len().saturating_sub(1);
        }
        for (i, window) in self.windows.iter_mut().enumerate() {
            window.index = i;
        }
        Ok(removed)
    }

    /// Append a pane to a window, focusing it
    pub fn split_pane(&mut self, window_index: usize, pane: Pane) -> Result<&mut Pane> {
        Ok(self.window_mut(window_index)?.split(pane))
    }

    /// Remove a pane. When it is the window's only pane the window is closed
    /// too. Returns every removed pane.
    pub fn close_pane(&mut self, window_index: usize, pane_index: usize) -> Result<Vec<Pane>> {
        let window = self.window_mut(window_index)?;
        window.pane(pane_index)?;

        if window.panes.len() == 1 {
            let closed = self.close_window(window_index)?;
            return Ok(closed.panes);
        }
        Ok(vec![window.remove_pane(pane_index)?])
    }

    pub fn switch_window(&mut self, index: usize) -> Result<()> {
        self.window(index)?;
        self.active_window = index;
        Ok(())
    }

    pub fn switch_pane(&mut self, window_index: usize, pane_index: usize) -> Result<()> {
        self.window_mut(window_index)?.focus_pane(pane_index)
    }

    /// Rename a window; names must stay unique within the session
    pub fn rename_window(&mut self, index: usize, new_name: &str) -> Result<()> {
        self.window(index)?;
        if self.has_window_named(new_name, Some(index)) {
            return Err(MuxError::WindowNameConflict(new_name.to_string()));
        }
        self.window_mut(index)?.name = new_name.to_string();
        Ok(())
    }

    pub fn select_layout(&mut self, window_index: usize, layout: LayoutKind) -> Result<()> {
        self.window_mut(window_index)?.set_layout(layout);
        Ok(())
    }

    /// Resize every window
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        for window in &mut self.windows {
            window.resize(width, height);
        }
    }

    /// Remove every pane, leaving the session empty. Used for teardown.
    pub fn drain_panes(&mut self) -> Vec<Pane> {
        let panes = self
            .windows
            .drain(..)
            .flat_map(|w| w.panes.into_iter())
            .collect();
        self.active_window = 0;
        panes
    }

    /// Check a snapshot loaded from disk, then rebuild derived state
    /// (indices, flags, geometry).
    ///
    /// Rejects snapshots that would break the tree's invariants: a session
    /// without windows, a window without panes or duplicate window names.
    pub(crate) fn normalize(&mut self) -> Result<()> {
        let invalid = |reason: String| Err(MuxError::InvalidSnapshot(reason));
        if self.name.is_empty() {
            return invalid("session has no name".to_string());
        }
        if self.windows.is_empty() {
            return invalid(format!("session {} has no windows", self.name));
        }
        let mut names = HashSet::new();
        for window in &self.windows {
            if window.panes.is_empty() {
                return invalid(format!("window {:?} has no panes", window.name));
            }
            if !names.insert(window.name.as_str()) {
                return invalid(format!("duplicate window name {:?}", window.name));
            }
        }

        if self.active_window >= self.windows.len() {
            self.active_window = self.windows.len().saturating_sub(1);
        }
        let (width, height) = (self.width, self.height);
        for (i, window) in self.windows.iter_mut().enumerate() {
            window.index = i;
            window.width = width;
            window.height = height;
            window.normalize();
        }
        Ok(())
    }
}
