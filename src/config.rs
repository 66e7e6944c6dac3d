//! Configuration for tmx.
//!
//! Settings live in `<state-dir>/config.toml`. Every section is optional:
//!
//! ```toml
//! app_name = "tmx"
//!
//! [server]
//! auto_save = true
//! auto_save_interval_secs = 30
//! max_frame_bytes = 1048576
//! restore_on_start = true
//!
//! [session]
//! default_width = 80
//! default_height = 24
//! default_layout = "even"   # even, main-vertical, main-horizontal, tiled
//!
//! [pane]
//! shell = "/bin/bash"
//! working_dir = "/home/me"
//! spawn_processes = true
//! scrollback_lines = 2000
//! ```
//!
//! The state directory is `--state-dir`, else `$TMX_STATE_DIR`, else
//! `~/.tmx`. Runtime files go under `<state-dir>/terminal/`.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::scrollback::SCROLLBACK_LIMIT;
use crate::wm::{LayoutKind, SessionDefaults};

/// Environment variable overriding the state directory
pub const STATE_DIR_ENV: &str = "TMX_STATE_DIR";

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "TMX_LOG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base name of the socket and log files
    pub app_name: String,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub pane: PaneConfig,
    /// Resolved state directory (not read from the file)
    #[serde(skip)]
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "tmx".to_string(),
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            pane: PaneConfig::default(),
            state_dir: PathBuf::from(".tmx"),
        }
    }
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub auto_save: bool,
    pub auto_save_interval_secs: u64,
    /// Longest accepted request line
    pub max_frame_bytes: usize,
    pub restore_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_interval_secs: 30,
            max_frame_bytes: 1024 * 1024,
            restore_on_start: true,
        }
    }
}

impl ServerConfig {
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval_secs.max(1))
    }
}

/// Defaults for new sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_width: u16,
    pub default_height: u16,
    pub default_layout: LayoutKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_width: 80,
            default_height: 24,
            default_layout: LayoutKind::Even,
        }
    }
}

/// Pane process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaneConfig {
    pub shell: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// Start a process for every pane
    pub spawn_processes: bool,
    pub scrollback_lines: usize,
}

impl Default for PaneConfig {
    fn default() -> Self {
        Self {
            shell: None,
            working_dir: None,
            spawn_processes: true,
            scrollback_lines: SCROLLBACK_LIMIT,
        }
    }
}

impl Config {
    /// Load `<state_dir>/config.toml`, falling back to defaults.
    ///
    /// A missing file yields defaults silently. An unreadable or invalid one
    /// also yields defaults, and the error is handed back so the caller can
    /// report it once logging is up.
    pub fn load(state_dir: &Path) -> (Self, Option<ConfigError>) {
        let path = state_dir.join("config.toml");
        let (mut config, error) = if path.exists() {
            match Self::load_from(&path) {
                Ok(config) => (config, None),
                Err(e) => (Self::default(), Some(e)),
            }
        } else {
            (Self::default(), None)
        };
        config.state_dir = state_dir.to_path_buf();
        (config, error)
    }

    /// Log a load error and continue with what `load` returned
    pub fn report(error: Option<ConfigError>) {
        if let Some(e) = error {
            warn!(error = %e, "using default configuration");
        }
    }

    /// Parse a config file strictly
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Directory holding the socket, log and snapshots
    pub fn terminal_dir(&self) -> PathBuf {
        self.state_dir.join("terminal")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.terminal_dir().join(format!("{}.sock", self.app_name))
    }

    pub fn log_path(&self) -> PathBuf {
        self.terminal_dir().join(format!("{}.log", self.app_name))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.terminal_dir().join("sessions")
    }

    /// Settings handed to the session manager
    pub fn session_defaults(&self) -> SessionDefaults {
        let shell = self
            .pane
            .shell
            .clone()
            .or_else(|| env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string());
        let working_dir = self
            .pane
            .working_dir
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));

        SessionDefaults {
            width: self.session.default_width.max(1),
            height: self.session.default_height.max(1),
            layout: self.session.default_layout,
            shell,
            working_dir,
            scrollback_lines: self.pane.scrollback_lines,
        }
    }
}

/// Resolve the state directory: CLI flag, then environment, then home
pub fn resolve_state_dir(cli: Option<PathBuf>) -> PathBuf {
    pick_state_dir(cli, env::var_os(STATE_DIR_ENV).map(PathBuf::from), home_dir())
}

fn pick_state_dir(cli: Option<PathBuf>, env_dir: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    cli.or(env_dir)
        .or_else(|| home.map(|h| h.join(".tmx")))
        .unwrap_or_else(|| PathBuf::from(".tmx"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}
