//! Client/server plumbing.
//!
//! - **protocol**: request/response types and their JSON shapes
//! - **codec**: newline-delimited framing over a byte stream
//! - **server**: `TerminalServer` (socket, connections, auto-save)
//! - **client**: `Client` with one typed method per command
//! - **persist**: per-session snapshot files

pub mod client;
pub mod codec;
pub mod persist;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use server::{ServerOptions, TerminalServer};
