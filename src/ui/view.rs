//! Text views of sessions for the command line client.
//!
//! Everything writes to an `io::Write` so output can be captured in tests.
//! Color is applied only when `styled` is set (stdout is a terminal).

use std::io::{self, Write};

use crossterm::queue;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::wm::{Pane, Session, SessionStatus, Window};

/// Widest a single table cell may get
const MAX_CELL_WIDTH: usize = 40;

/// Cut a string to at most `max` display columns, marking the cut with `…`
pub fn truncate(text: &str, max: usize) -> String {
    if UnicodeWidthStr::width(text) <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if width + w + 1 > max {
            break;
        }
        out.push(ch);
        width += w;
    }
    out.push('…');
    out
}

/// Pad to `width` display columns
fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    format!("{}{:pad$}", text, "", pad = width.saturating_sub(used))
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Active => Color::Green,
        SessionStatus::Detached => Color::Yellow,
        SessionStatus::Destroyed => Color::DarkGrey,
    }
}

fn write_colored<W: Write>(out: &mut W, text: &str, color: Option<Color>, styled: bool) -> io::Result<()> {
    match color {
        Some(color) if styled => queue!(out, SetForegroundColor(color), Print(text), ResetColor),
        _ => queue!(out, Print(text)),
    }
}

/// A column-aligned table
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<(String, Option<Color>)>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<(String, Option<Color>)>) {
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| UnicodeWidthStr::width(h.as_str())).collect();
        for row in &self.rows {
            for (i, (cell, _)) in row.iter().enumerate() {
                let w = UnicodeWidthStr::width(cell.as_str()).min(MAX_CELL_WIDTH);
                if let Some(slot) = widths.get_mut(i) {
                    *slot = (*slot).max(w);
                }
            }
        }
        widths
    }

    pub fn render<W: Write>(&self, out: &mut W, styled: bool) -> io::Result<()> {
        let widths = self.widths();
        let last = widths.len().saturating_sub(1);

        if styled {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        for (i, header) in self.headers.iter().enumerate() {
            let cell = if i == last { header.clone() } else { pad(header, widths[i] + 2) };
            queue!(out, Print(cell))?;
        }
        if styled {
            queue!(out, SetAttribute(Attribute::Reset))?;
        }
        queue!(out, Print("\n"))?;

        for row in &self.rows {
            for (i, (text, color)) in row.iter().enumerate().take(widths.len()) {
                let text = truncate(text, MAX_CELL_WIDTH);
                let cell = if i == last { text } else { pad(&text, widths[i] + 2) };
                write_colored(out, &cell, *color, styled)?;
            }
            queue!(out, Print("\n"))?;
        }
        out.flush()
    }
}

/// `ls` output
pub fn write_session_list<W: Write>(out: &mut W, sessions: &[Session], styled: bool) -> io::Result<()> {
    if sessions.is_empty() {
        return queue!(out, Print("no sessions\n")).and_then(|_| out.flush());
    }

    let mut table = Table::new(&["NAME", "ID", "STATUS", "WINDOWS", "PANES", "SIZE", "CREATED"]);
    for session in sessions {
        table.push(vec![
            (session.name.clone(), None),
            (short_id(&session.id).to_string(), Some(Color::DarkGrey)),
            (session.status.as_str().to_string(), Some(status_color(session.status))),
            (session.windows.len().to_string(), None),
            (session.panes().count().to_string(), None),
            (format!("{}x{}", session.width, session.height), None),
            (session.created_at.format("%Y-%m-%d %H:%M:%S").to_string(), None),
        ]);
    }
    table.render(out, styled)
}

fn window_label(window: &Window, current: bool) -> String {
    format!(
        "{}: {} [{}]{}",
        window.index,
        window.name,
        window.layout,
        if current { " *" } else { "" }
    )
}

fn pane_label(pane: &Pane) -> String {
    format!(
        "{}: {} {}x{}+{}+{}{}",
        pane.index,
        truncate(&pane.command, MAX_CELL_WIDTH),
        pane.width,
        pane.height,
        pane.x,
        pane.y,
        if pane.active { " *" } else { "" }
    )
}

/// `tree` output: the session with its windows and panes
pub fn write_session_tree<W: Write>(out: &mut W, session: &Session, styled: bool) -> io::Result<()> {
    if styled {
        queue!(out, SetAttribute(Attribute::Bold))?;
    }
    queue!(out, Print(&session.name))?;
    if styled {
        queue!(out, SetAttribute(Attribute::Reset))?;
    }
    queue!(out, Print(format!(" ({}) ", short_id(&session.id))))?;
    write_colored(out, session.status.as_str(), Some(status_color(session.status)), styled)?;
    queue!(out, Print(format!(" {}x{}\n", session.width, session.height)))?;

    let window_count = session.windows.len();
    for (wi, window) in session.windows.iter().enumerate() {
        let last_window = wi + 1 == window_count;
        let current = wi == session.active_window;
        queue!(out, Print(if last_window { "└── " } else { "├── " }))?;
        write_colored(out, &window_label(window, current), current.then_some(Color::Cyan), styled)?;
        queue!(out, Print("\n"))?;

        let stem = if last_window { "    " } else { "│   " };
        let pane_count = window.panes.len();
        for (pi, pane) in window.panes.iter().enumerate() {
            let branch = if pi + 1 == pane_count { "└── " } else { "├── " };
            queue!(out, Print(stem), Print(branch))?;
            write_colored(out, &pane_label(pane), pane.active.then_some(Color::Green), styled)?;
            queue!(out, Print("\n"))?;
        }
    }
    out.flush()
}

/// `capture-pane` output
pub fn write_lines<W: Write>(out: &mut W, lines: &[String]) -> io::Result<()> {
    for line in lines {
        queue!(out, Print(line), Print("\n"))?;
    }
    out.flush()
}
