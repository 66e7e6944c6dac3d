//! Pane processes
//!
//! The multiplexer does not allocate PTYs itself. A [`ProcessSpawner`] starts
//! the program behind a pane and hands back a handle plus its byte streams.
//! [`PaneProcess`] pumps the output stream into a bounded scrollback on a
//! reader thread and keeps the input stream for `send_keys`.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::debug;

use super::scrollback::Scrollback;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to terminate process: {0}")]
    Terminate(#[source] io::Error),

    #[error("Failed to write to process: {0}")]
    Write(#[source] io::Error),

    #[error("No process attached to pane")]
    NoProcess,
}

/// Handle to an externally managed process
pub trait ProcessHandle: Send {
    /// OS process id, if there is one
    fn pid(&self) -> Option<u32>;

    /// Send a termination signal. Must tolerate an already exited process.
    fn terminate(&mut self) -> Result<(), ProcessError>;
}

/// A freshly started process and its byte streams
pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub input: Box<dyn Write + Send>,
    pub output: Box<dyn Read + Send>,
}

/// Starts the program behind a pane
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &str, working_dir: &Path) -> Result<SpawnedProcess, ProcessError>;
}

/// Spawns commands through `/bin/sh` with piped stdio.
///
/// This is a plain pipe pair, not a PTY: interactive programs that check for
/// a terminal will behave as if run from a script.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandSpawner;

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, command: &str, working_dir: &Path) -> Result<SpawnedProcess, ProcessError> {
        let spawn_err = |source| ProcessError::Spawn {
            command: command.to_string(),
            source,
        };

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("exec {} 2>&1", command))
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;

        let missing = |what: &str| io::Error::new(io::ErrorKind::BrokenPipe, format!("missing {}", what));
        let input = child.stdin.take().ok_or_else(|| spawn_err(missing("stdin")))?;
        let output = child.stdout.take().ok_or_else(|| spawn_err(missing("stdout")))?;

        debug!(pid = child.id(), command, "spawned pane process");

        Ok(SpawnedProcess {
            handle: Box::new(ChildHandle(child)),
            input: Box::new(input),
            output: Box::new(output),
        })
    }
}

struct ChildHandle(Child);

impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.0.id())
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        if let Ok(Some(_)) = self.0.try_wait() {
            return Ok(());
        }
        self.0.kill().map_err(ProcessError::Terminate)?;
        // Reap to avoid leaving a zombie behind
        let _ = self.0.wait();
        Ok(())
    }
}

/// A running process attached to a pane
pub struct PaneProcess {
    handle: Mutex<Box<dyn ProcessHandle>>,
    input: Mutex<Box<dyn Write + Send>>,
    scrollback: Arc<Mutex<Scrollback>>,
    /// Cleared when the output stream closes or the process is terminated
    running: Arc<AtomicBool>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PaneProcess {
    /// Take ownership of a spawned process and start pumping its output
    pub fn start(spawned: SpawnedProcess, scrollback_lines: usize) -> Self {
        let SpawnedProcess {
            handle,
            input,
            mut output,
        } = spawned;

        let scrollback = Arc::new(Mutex::new(Scrollback::new(scrollback_lines)));
        let running = Arc::new(AtomicBool::new(true));

        let reader_scrollback = scrollback.clone();
        let reader_running = running.clone();
        let reader_thread = thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match output.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => lock(&reader_scrollback).push_bytes(&buffer[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            reader_running.store(false, Ordering::SeqCst);
        });

        Self {
            handle: Mutex::new(handle),
            input: Mutex::new(input),
            scrollback,
            running,
            reader_thread: Mutex::new(Some(reader_thread)),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.handle).pid()
    }

    /// Check if the output stream is still open
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Write input to the process
    pub fn write(&self, data: &[u8]) -> Result<(), ProcessError> {
        let mut input = lock(&self.input);
        input.write_all(data).map_err(ProcessError::Write)?;
        input.flush().map_err(ProcessError::Write)
    }

    /// Last `lines` lines of output, oldest first
    pub fn capture(&self, lines: Option<usize>) -> Vec<String> {
        lock(&self.scrollback).tail(lines)
    }

    /// Best-effort termination. The reader thread is detached and exits on EOF.
    pub fn terminate(&self) -> Result<(), ProcessError> {
        self.running.store(false, Ordering::SeqCst);
        let result = lock(&self.handle).terminate();
        drop(lock(&self.reader_thread).take());
        result
    }
}

impl fmt::Debug for PaneProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaneProcess")
            .field("pid", &self.pid())
            .field("running", &self.is_running())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSpawner;
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_output_reaches_scrollback() {
        let spawner = FakeSpawner {
            output: b"hello\nworld\n".to_vec(),
            ..Default::default()
        };
        let spawned = spawner.spawn("sh", Path::new("/")).unwrap();
        let process = PaneProcess::start(spawned, 100);

        assert!(wait_for(|| !process.is_running()));
        assert_eq!(process.capture(None), vec!["hello", "world"]);
    }

    #[test]
    fn test_write_and_terminate() {
        let spawner = FakeSpawner::default();
        let process = PaneProcess::start(spawner.spawn("sh", Path::new("/")).unwrap(), 100);

        process.write(b"ls\n").unwrap();
        assert_eq!(&*spawner.written.lock().unwrap(), b"ls\n");

        process.terminate().unwrap();
        assert_eq!(spawner.terminated.load(Ordering::SeqCst), 1);
        assert!(!process.is_running());
    }

    #[test]
    #[cfg(unix)]
    fn test_command_spawner_echo() {
        let spawned = CommandSpawner.spawn("echo spawned-ok", Path::new("/")).unwrap();
        let process = PaneProcess::start(spawned, 100);

        assert!(wait_for(|| process.capture(None).iter().any(|l| l == "spawned-ok")));
        assert!(process.pid().is_some());
        process.terminate().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_command_spawner_terminate_long_running() {
        let spawned = CommandSpawner.spawn("sleep 30", Path::new("/")).unwrap();
        let process = PaneProcess::start(spawned, 100);

        process.terminate().unwrap();
        assert!(wait_for(|| !process.is_running()));
    }
}
