//! Client-side presentation.
//!
//! - **view**: session tables and window/pane trees for the terminal
//! - **keys**: tmux-style key names to input byte sequences for `send-keys`

pub mod keys;
pub mod view;

pub use keys::encode_keys;
pub use view::{write_lines, write_session_list, write_session_tree};
