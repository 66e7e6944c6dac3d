//! Process boundary components.
//!
//! This module contains the pieces that touch processes outside the
//! multiplexer:
//!
//! - **process**: spawner/handle traits and the per-pane process wrapper
//! - **scrollback**: bounded line buffer fed from a pane's output stream
//!
//! # Architecture
//!
//! ```text
//! PaneProcess
//! ├── ProcessHandle (terminate, pid)
//! ├── input stream  (send_keys)
//! └── reader thread → Scrollback
//! ```

pub mod process;
pub mod scrollback;
