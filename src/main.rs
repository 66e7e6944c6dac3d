//! tmx - A tmux-like terminal session multiplexer
//!
//! One binary acts as both the server, which owns every session, and the
//! command line client, which talks to it over a Unix socket.
//!
//! # Quick Start
//!
//! ```text
//! tmx server &                   # start the server
//! tmx new-session -s work        # create a session
//! tmx split-window -t work -h    # add a pane
//! tmx send-keys -t work ls Enter # type into the focused pane
//! tmx capture-pane -t work       # read what it printed
//! tmx tree -t work               # show windows and panes
//! ```
//!
//! # Files
//!
//! | Path | Purpose |
//! |------|---------|
//! | `<state-dir>/config.toml` | Configuration |
//! | `<state-dir>/terminal/tmx.sock` | Server socket |
//! | `<state-dir>/terminal/tmx.log` | Server log |
//! | `<state-dir>/terminal/sessions/` | Session snapshots |

mod config;
mod core;
mod error;
mod ipc;
mod ui;
mod wm;

use std::env;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, LOG_ENV};
use crate::core::process::CommandSpawner;
use crate::ipc::{Client, ServerOptions, TerminalServer};
use crate::wm::{LayoutKind, SessionManager, SplitDirection};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("tmx {}", VERSION);
}

fn print_help() {
    eprintln!("tmx {} - A tmux-like terminal session multiplexer", VERSION);
    eprintln!();
    eprintln!("Usage: tmx [--state-dir DIR] <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Server:");
    eprintln!("  server [--foreground]             Run the server (log to stderr with --foreground)");
    eprintln!();
    eprintln!("Sessions:");
    eprintln!("  new-session [-s NAME]             Create a session");
    eprintln!("  ls                                List sessions");
    eprintln!("  tree -t TARGET                    Show windows and panes of a session");
    eprintln!("  kill-session -t TARGET            Destroy a session and its panes");
    eprintln!("  rename-session -t TARGET NEW      Rename a session");
    eprintln!("  resize -t TARGET -x W -y H        Change the session's terminal size");
    eprintln!();
    eprintln!("Windows:");
    eprintln!("  new-window -t TARGET [-n NAME]    Create a window");
    eprintln!("  kill-window -t TARGET -w N        Close a window");
    eprintln!("  select-window -t TARGET -w N      Switch to a window");
    eprintln!("  rename-window -t TARGET -w N NEW  Rename a window");
    eprintln!("  select-layout -t TARGET [-w N] KIND");
    eprintln!("                                    even, main-vertical, main-horizontal, tiled");
    eprintln!();
    eprintln!("Panes:");
    eprintln!("  split-window -t TARGET [-w N] [-h|-v]");
    eprintln!("                                    Add a pane (-h side by side, -v stacked)");
    eprintln!("  kill-pane -t TARGET -w N -p N     Close a pane");
    eprintln!("  select-pane -t TARGET -w N -p N   Focus a pane");
    eprintln!("  send-keys -t TARGET [-l] KEYS...  Type into the focused pane");
    eprintln!("                                    (Enter, C-c, M-x, Up, F1.. unless -l)");
    eprintln!("  capture-pane -t TARGET [-w N] [-p N] [-n LINES]");
    eprintln!("                                    Print a pane's recent output");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --state-dir DIR                   State directory (default: $TMX_STATE_DIR or ~/.tmx)");
    eprintln!("  -V, --version                     Show version");
    eprintln!("  -h, --help                        Show this help");
    eprintln!();
    eprintln!("TARGET is a session name or id. Log verbosity: TMX_LOG (e.g. TMX_LOG=debug).");
}

/// A parsed subcommand
#[derive(Debug, PartialEq)]
enum Command {
    Help,
    Version,
    Server { foreground: bool },
    NewSession { name: String },
    List,
    Tree { target: String },
    KillSession { target: String },
    NewWindow { target: String, name: String },
    KillWindow { target: String, window: usize },
    SplitWindow { target: String, window: Option<usize>, direction: SplitDirection },
    KillPane { target: String, window: usize, pane: usize },
    SelectWindow { target: String, window: usize },
    SelectPane { target: String, window: usize, pane: usize },
    RenameSession { target: String, new_name: String },
    RenameWindow { target: String, window: usize, new_name: String },
    SendKeys { target: String, keys: Vec<String>, literal: bool },
    SelectLayout { target: String, window: Option<usize>, layout: LayoutKind },
    Resize { target: String, width: u16, height: u16 },
    CapturePane { target: String, window: Option<usize>, pane: Option<usize>, lines: Option<usize> },
}

impl Command {
    /// Session named by `-t`, if the command takes one
    fn target(&self) -> Option<&str> {
        match self {
            Command::Tree { target }
            | Command::KillSession { target }
            | Command::NewWindow { target, .. }
            | Command::KillWindow { target, .. }
            | Command::SplitWindow { target, .. }
            | Command::KillPane { target, .. }
            | Command::SelectWindow { target, .. }
            | Command::SelectPane { target, .. }
            | Command::RenameSession { target, .. }
            | Command::RenameWindow { target, .. }
            | Command::SendKeys { target, .. }
            | Command::SelectLayout { target, .. }
            | Command::Resize { target, .. }
            | Command::CapturePane { target, .. } => Some(target),
            Command::Help
            | Command::Version
            | Command::Server { .. }
            | Command::NewSession { .. }
            | Command::List => None,
        }
    }
}

#[derive(Debug, PartialEq)]
struct Args {
    state_dir: Option<PathBuf>,
    command: Command,
}

/// Flags shared by the subcommands
#[derive(Default)]
struct Flags {
    target: Option<String>,
    name: Option<String>,
    window: Option<usize>,
    pane: Option<usize>,
    lines: Option<usize>,
    width: Option<u16>,
    height: Option<u16>,
    horizontal: bool,
    vertical: bool,
    literal: bool,
    foreground: bool,
    positional: Vec<String>,
}

fn number<T: FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid number for {}: {}", flag, value))
}

impl Flags {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut flags = Flags::default();
        let mut i = 0;

        while i < args.len() {
            let arg = args[i].as_str();
            // Once positional arguments start, everything is positional
            if !flags.positional.is_empty() || !arg.starts_with('-') || arg == "-" {
                flags.positional.push(args[i].clone());
                i += 1;
                continue;
            }

            let mut value = || {
                i += 1;
                args.get(i)
                    .cloned()
                    .ok_or_else(|| format!("Missing value for {}", arg))
            };
            match arg {
                "-t" => flags.target = Some(value()?),
                "-s" | "-n" => {
                    let v = value()?;
                    if arg == "-n" {
                        if let Ok(n) = v.parse() {
                            flags.lines = Some(n);
                        }
                    }
                    flags.name = Some(v);
                }
                "-w" => flags.window = Some(number(arg, &value()?)?),
                "-p" => flags.pane = Some(number(arg, &value()?)?),
                "-x" => flags.width = Some(number(arg, &value()?)?),
                "-y" => flags.height = Some(number(arg, &value()?)?),
                "-h" => flags.horizontal = true,
                "-v" => flags.vertical = true,
                "-l" => flags.literal = true,
                "--foreground" | "-f" => flags.foreground = true,
                _ => return Err(format!("Unknown option: {}. Use -h for help.", arg)),
            }
            i += 1;
        }

        Ok(flags)
    }

    fn target(&mut self) -> Result<String, String> {
        self.target
            .take()
            .ok_or_else(|| "Missing target session (-t NAME|ID)".to_string())
    }

    fn window(&self) -> Result<usize, String> {
        self.window.ok_or_else(|| "Missing window index (-w N)".to_string())
    }

    fn pane(&self) -> Result<usize, String> {
        self.pane.ok_or_else(|| "Missing pane index (-p N)".to_string())
    }

    fn new_name(&mut self) -> Result<String, String> {
        match self.positional.len() {
            1 => Ok(self.positional.remove(0)),
            0 => Err("Missing new name".to_string()),
            _ => Err("Too many arguments".to_string()),
        }
    }

    fn no_positional(&self) -> Result<(), String> {
        match self.positional.first() {
            Some(extra) => Err(format!("Unexpected argument: {}", extra)),
            None => Ok(()),
        }
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut state_dir = None;
    let mut i = 0;

    // Global options come before the subcommand
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                return Ok(Args {
                    state_dir,
                    command: Command::Help,
                })
            }
            "-V" | "--version" => {
                return Ok(Args {
                    state_dir,
                    command: Command::Version,
                })
            }
            "--state-dir" => {
                i += 1;
                let dir = args.get(i).ok_or("Missing state directory argument")?;
                state_dir = Some(PathBuf::from(dir));
            }
            _ => break,
        }
        i += 1;
    }

    let Some(name) = args.get(i) else {
        return Ok(Args {
            state_dir,
            command: Command::Help,
        });
    };
    let mut flags = Flags::parse(&args[i + 1..])?;

    let command = match name.as_str() {
        "help" => Command::Help,
        "server" => {
            flags.no_positional()?;
            Command::Server {
                foreground: flags.foreground,
            }
        }
        "new-session" | "new" => {
            flags.no_positional()?;
            Command::NewSession {
                name: flags.name.unwrap_or_default(),
            }
        }
        "ls" | "list-sessions" => {
            flags.no_positional()?;
            Command::List
        }
        "tree" => Command::Tree {
            target: flags.target()?,
        },
        "kill-session" => Command::KillSession {
            target: flags.target()?,
        },
        "new-window" => Command::NewWindow {
            target: flags.target()?,
            name: flags.name.take().unwrap_or_default(),
        },
        "kill-window" => Command::KillWindow {
            target: flags.target()?,
            window: flags.window()?,
        },
        "split-window" => {
            if flags.horizontal && flags.vertical {
                return Err("Choose one of -h and -v".to_string());
            }
            Command::SplitWindow {
                target: flags.target()?,
                window: flags.window,
                direction: if flags.horizontal {
                    SplitDirection::Horizontal
                } else {
                    SplitDirection::Vertical
                },
            }
        }
        "kill-pane" => Command::KillPane {
            target: flags.target()?,
            window: flags.window()?,
            pane: flags.pane()?,
        },
        "select-window" => Command::SelectWindow {
            target: flags.target()?,
            window: flags.window()?,
        },
        "select-pane" => Command::SelectPane {
            target: flags.target()?,
            window: flags.window()?,
            pane: flags.pane()?,
        },
        "rename-session" => Command::RenameSession {
            target: flags.target()?,
            new_name: flags.new_name()?,
        },
        "rename-window" => Command::RenameWindow {
            target: flags.target()?,
            window: flags.window()?,
            new_name: flags.new_name()?,
        },
        "send-keys" => {
            if flags.positional.is_empty() {
                return Err("Missing keys".to_string());
            }
            Command::SendKeys {
                target: flags.target()?,
                keys: std::mem::take(&mut flags.positional),
                literal: flags.literal,
            }
        }
        "select-layout" => {
            let kind = flags.new_name().map_err(|_| "Missing layout kind".to_string())?;
            Command::SelectLayout {
                target: flags.target()?,
                window: flags.window,
                layout: kind.parse()?,
            }
        }
        "resize" => Command::Resize {
            target: flags.target()?,
            width: flags.width.ok_or("Missing width (-x W)")?,
            height: flags.height.ok_or("Missing height (-y H)")?,
        },
        "capture-pane" => Command::CapturePane {
            target: flags.target()?,
            window: flags.window,
            pane: flags.pane,
            lines: flags.lines,
        },
        other => return Err(format!("Unknown command: {}. Use -h for help.", other)),
    };

    Ok(Args { state_dir, command })
}

/// Log to a file in server mode, otherwise to stderr
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

async fn run_server(config: Config, foreground: bool) -> anyhow::Result<()> {
    let mut manager = SessionManager::new(config.session_defaults());
    if config.pane.spawn_processes {
        manager = manager.with_spawner(Arc::new(CommandSpawner));
    }
    let manager = Arc::new(manager);

    let server = TerminalServer::new(ServerOptions::from_config(&config), manager.clone());
    server.start().await.context("failed to start server")?;
    info!(version = VERSION, "tmx server running");
    if !foreground {
        eprintln!(
            "tmx server listening on {} (log: {})",
            server.socket_path().display(),
            config.log_path().display()
        );
    }

    shutdown_signal().await?;
    info!("shutdown requested");

    server.stop().await?;
    let report = manager.shutdown();
    for failure in &report.failures {
        warn!(pane = %failure.pane_id, error = %failure.error, "pane process did not terminate");
    }
    Ok(())
}

async fn run_client(command: Command, config: &Config) -> anyhow::Result<()> {
    let socket = config.socket_path();
    let mut client = Client::connect(&socket).await.with_context(|| {
        format!(
            "no server at {} (start one with `tmx server`)",
            socket.display()
        )
    })?;
    let styled = io::stdout().is_terminal();
    let mut stdout = io::stdout();

    // Every command aimed at a session attaches to it first
    let session = match command.target() {
        Some(target) => Some(client.attach(target).await?),
        None => None,
    };
    let active_window = session.as_ref().map(|s| s.active_window).unwrap_or_default();

    match command {
        Command::NewSession { name } => {
            let session = client.create_session(&name).await?;
            println!("{} ({})", session.name, session.id);
        }
        Command::List => {
            let sessions = client.list_sessions().await?;
            ui::write_session_list(&mut stdout, &sessions, styled)?;
        }
        Command::Tree { .. } => {
            if let Some(session) = &session {
                ui::write_session_tree(&mut stdout, session, styled)?;
            }
        }
        Command::KillSession { .. } => client.kill_session(None).await?,
        Command::NewWindow { name, .. } => {
            let window = client.create_window(&name).await?;
            println!("{}: {}", window.index, window.name);
        }
        Command::KillWindow { window, .. } => client.close_window(window).await?,
        Command::SplitWindow { window, direction, .. } => {
            let window = window.unwrap_or(active_window);
            let pane = client.split_pane(window, direction).await?;
            println!("{}.{}", window, pane.index);
        }
        Command::KillPane { window, pane, .. } => client.close_pane(window, pane).await?,
        Command::SelectWindow { window, .. } => client.switch_window(window).await?,
        Command::SelectPane { window, pane, .. } => client.switch_pane(window, pane).await?,
        Command::RenameSession { new_name, .. } => client.rename_session(&new_name).await?,
        Command::RenameWindow { window, new_name, .. } => {
            client.rename_window(window, &new_name).await?
        }
        Command::SendKeys { keys, literal, .. } => {
            client.send_keys(&ui::encode_keys(&keys, literal)).await?
        }
        Command::SelectLayout { window, layout, .. } => {
            client.select_layout(window.unwrap_or(active_window), layout).await?
        }
        Command::Resize { width, height, .. } => client.resize(width, height).await?,
        Command::CapturePane { window, pane, lines, .. } => {
            let window = window.unwrap_or(active_window);
            let pane = pane.unwrap_or_else(|| {
                session
                    .as_ref()
                    .and_then(|s| s.windows.get(window))
                    .map(|w| w.active_pane)
                    .unwrap_or_default()
            });
            let output = client.capture_pane(window, pane, lines).await?;
            ui::write_lines(&mut stdout, &output)?;
        }
        Command::Help | Command::Version | Command::Server { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let state_dir = config::resolve_state_dir(args.state_dir);
    let (config, config_error) = Config::load(&state_dir);

    match args.command {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
        Command::Server { foreground } => {
            let log_file = config.log_path();
            init_logging((!foreground).then_some(log_file.as_path()))?;
            Config::report(config_error);
            info!(state_dir = %state_dir.display(), "tmx {} starting", VERSION);
            run_server(config, foreground).await
        }
        command => {
            init_logging(None)?;
            Config::report(config_error);
            run_client(command, &config).await
        }
    }
}
