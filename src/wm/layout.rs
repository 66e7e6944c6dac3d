//! Layout - Computes pane geometry within a window
//!
//! Layouts are pure: given a pane count, a preset and the window area they
//! return one rectangle per pane in pane-index order. Nothing here holds
//! state, so callers decide when geometry is recomputed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction of split
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    Horizontal, // Split left/right (vertical line)
    Vertical,   // Split top/bottom (horizontal line)
}

impl SplitDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SplitDirection::Horizontal => "horizontal",
            SplitDirection::Vertical => "vertical",
        }
    }
}

/// Layout preset types
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    /// All panes side by side in equal columns
    #[default]
    Even,
    /// Main pane on the left, rest stacked on the right
    MainVertical,
    /// Main pane on top, rest in a row below
    MainHorizontal,
    /// Grid
    Tiled,
}

impl LayoutKind {
    pub const ALL: [LayoutKind; 4] = [
        LayoutKind::Even,
        LayoutKind::MainVertical,
        LayoutKind::MainHorizontal,
        LayoutKind::Tiled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LayoutKind::Even => "even",
            LayoutKind::MainVertical => "main-vertical",
            LayoutKind::MainHorizontal => "main-horizontal",
            LayoutKind::Tiled => "tiled",
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayoutKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown layout: {}", s))
    }
}

/// Position and size of a pane, in terminal cells
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }
}

/// Calculate positions and sizes for `count` panes.
///
/// A single pane always fills the whole area regardless of `kind`.
pub fn compute(count: usize, kind: LayoutKind, width: u16, height: u16) -> Vec<Rect> {
    match count {
        0 => Vec::new(),
        1 => vec![Rect::new(0, 0, width, height)],
        _ => match kind {
            LayoutKind::Even => even(count, width, height),
            LayoutKind::MainVertical => main_vertical(count, width, height),
            LayoutKind::MainHorizontal => main_horizontal(count, width, height),
            LayoutKind::Tiled => tiled(count, width, height),
        },
    }
}

/// Equal columns spanning the full height
fn even(count: usize, width: u16, height: u16) -> Vec<Rect> {
    spans(width, count)
        .into_iter()
        .map(|(x, w)| Rect::new(x, 0, w, height))
        .collect()
}

/// Main pane takes the left 2/3, the rest stack in the right third
fn main_vertical(count: usize, width: u16, height: u16) -> Vec<Rect> {
    let main_width = two_thirds(width);
    let side_width = width - main_width;

    let mut rects = Vec::with_capacity(count);
    rects.push(Rect::new(0, 0, main_width, height));
    rects.extend(
        spans(height, count - 1)
            .into_iter()
            .map(|(y, h)| Rect::new(main_width, y, side_width, h)),
    );
    rects
}

/// Main pane takes the top 2/3, the rest tile along the bottom third
fn main_horizontal(count: usize, width: u16, height: u16) -> Vec<Rect> {
    let main_height = two_thirds(height);
    let side_height = height - main_height;

    let mut rects = Vec::with_capacity(count);
    rects.push(Rect::new(0, 0, width, main_height));
    rects.extend(
        spans(width, count - 1)
            .into_iter()
            .map(|(x, w)| Rect::new(x, main_height, w, side_height)),
    );
    rects
}

/// Row-major grid with `ceil(sqrt(n))` columns.
///
/// A short last row shares the full width among the panes it holds.
fn tiled(count: usize, width: u16, height: u16) -> Vec<Rect> {
    let cols = ceil_sqrt(count);
    let rows = (count + cols - 1) / cols;

    let mut rects = Vec::with_capacity(count);
    for (row, (y, h)) in spans(height, rows).into_iter().enumerate() {
        let in_row = cols.min(count - row * cols);
        rects.extend(
            spans(width, in_row)
                .into_iter()
                .map(|(x, w)| Rect::new(x, y, w, h)),
        );
    }
    rects
}

/// Divide `total` into `parts` equal spans; the last span absorbs the remainder
fn spans(total: u16, parts: usize) -> Vec<(u16, u16)> {
    if parts == 0 {
        return Vec::new();
    }
    let total = u32::from(total);
    let base = total / parts as u32;

    (0..parts)
        .map(|i| {
            let start = base * i as u32;
            let len = if i + 1 == parts { total - start } else { base };
            (start as u16, len as u16)
        })
        .collect()
}

fn two_thirds(len: u16) -> u16 {
    (u32::from(len) * 2 / 3) as u16
}

fn ceil_sqrt(n: usize) -> usize {
    let mut root = 1;
    while root * root < n {
        root += 1;
    }
    root
}
