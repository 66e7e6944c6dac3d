//! Window Manager - tmux-like session, window and pane management.
//!
//! - **manager**: `SessionManager`, the single owner of all sessions
//! - **session**: a detachable collection of windows
//! - **window**: an ordered list of panes sharing one layout
//! - **pane**: one process slot and its geometry
//! - **layout**: pure layout algorithms (even, main, tiled)
//!
//! # Module Hierarchy
//!
//! ```text
//! wm/
//! ├── mod.rs      - Module exports
//! ├── manager.rs  - SessionManager (locking, process attachment)
//! ├── session.rs  - Session (container for windows)
//! ├── window.rs   - Window (container for panes)
//! ├── pane.rs     - Pane (geometry + process)
//! └── layout.rs   - Layout algorithms
//! ```

pub mod layout;
pub mod manager;
pub mod pane;
pub mod session;
pub mod window;

pub use layout::{LayoutKind, SplitDirection};
pub use manager::{SessionDefaults, SessionManager};
pub use pane::Pane;
pub use session::{Session, SessionId, SessionStatus};
pub use window::Window;
