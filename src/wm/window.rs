//! Window - An ordered container of panes with a layout

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::layout::{self, LayoutKind};
use super::pane::Pane;
use crate::error::{MuxError, Result};

/// Unique identifier for a window
pub type WindowId = String;

/// A window containing one or more panes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    /// Unique identifier
    pub id: WindowId,
    /// Window name (unique within its session)
    pub name: String,
    /// Position within the session's window list
    pub index: usize,
    pub panes: Vec<Pane>,
    /// Index of the focused pane
    pub active_pane: usize,
    pub layout: LayoutKind,
    /// Window dimensions
    pub width: u16,
    pub height: u16,
    pub created_at: DateTime<Utc>,
}

impl Window {
    /// Create a new window with a single pane
    pub fn new(name: String, index: usize, width: u16, height: u16, layout: LayoutKind, pane: Pane) -> Self {
        let mut window = Self {
            id: Uuid::new_v4().to_string(),
            name,
            index,
            panes: vec![pane],
            active_pane: 0,
            layout,
            width,
            height,
            created_at: Utc::now(),
        };
        window.reflow();
        window
    }

    pub fn pane(&self, index: usize) -> Result<&Pane> {
        let len = self.panes.len();
        self.panes
            .get(index)
            .ok_or(MuxError::PaneIndexOutOfRange { index, len })
    }

    /// Get the focused pane
    pub fn active_pane(&self) -> Option<&Pane> {
        self.panes.get(self.active_pane)
    }

    /// Append a pane, focus it and recompute geometry
    pub fn split(&mut self, pane: Pane) -> &mut Pane {
        self.panes.push(pane);
        let index = self.panes.len() - 1;
        self.reindex();
        self.active_pane = index;
        self.sync_active_flags();
        self.reflow();
        &mut self.panes[index]
    }

    /// Remove a pane, re-index the rest and recompute geometry
    pub fn remove_pane(&mut self, index: usize) -> Result<Pane> {
        self.pane(index)?;
        let removed = self.panes.remove(index);

        if self.panes.is_empty() {
            self.active_pane = 0;
        } else if index < self.active_pane {
            self.active_pane -= 1;
        } else if self.active_pane >= self.panes.len() {
            self.active_pane = self.panes.len() - 1;
        }

        self.reindex();
        self.sync_active_flags();
        self.reflow();
        Ok(removed)
    }

    /// Focus a specific pane
    pub fn focus_pane(&mut self, index: usize) -> Result<()> {
        self.pane(index)?;
        self.active_pane = index;
        self.sync_active_flags();
        Ok(())
    }

    /// Switch layout preset and recompute geometry
    pub fn set_layout(&mut self, layout: LayoutKind) {
        self.layout = layout;
        self.reflow();
    }

    /// Resize the window
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.reflow();
    }

    /// Apply the layout to all panes.
    /// This is the ONLY place that should modify pane geometry.
    fn reflow(&mut self) {
        let rects = layout::compute(self.panes.len(), self.layout, self.width, self.height);
        for (pane, rect) in self.panes.iter_mut().zip(rects) {
            pane.apply_geometry(rect);
        }
    }

    fn reindex(&mut self) {
        for (i, pane) in self.panes.iter_mut().enumerate() {
            pane.index = i;
        }
    }

    /// Exactly one pane carries the active flag
    fn sync_active_flags(&mut self) {
        let active = self.active_pane;
        for pane in &mut self.panes {
            pane.active = pane.index == active;
        }
    }

    /// Restore derived state after loading from disk
    pub(crate) fn normalize(&mut self) {
        if self.active_pane >= self.panes.len() {
            self.active_pane = self.panes.len().saturating_sub(1);
        }
        self.reindex();
        self.sync_active_flags();
        self.reflow();
    }
}
