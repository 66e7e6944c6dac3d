//! Terminal Server
//!
//! Owns the Unix socket. Every accepted connection runs in its own task and
//! is serviced strictly request-then-response. All shared state lives in the
//! [`SessionManager`]; the server only remembers which session each
//! connection is attached to.
//!
//! ```text
//! Stopped ──start()──▶ Starting ──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::Connection;
use super::persist::{PersistError, SnapshotStore};
use super::protocol::{
    CaptureResponse, CreateSessionResponse, PaneResponse, ProtocolError, RenameTarget, Request,
    Response, SessionResponse, SessionsResponse, WindowResponse,
};
use crate::config::Config;
use crate::error::MuxError;
use crate::wm::{Session, SessionId, SessionManager};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("server is not running")]
    NotRunning,

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Runtime settings for a server instance
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub socket_path: PathBuf,
    pub sessions_dir: PathBuf,
    pub auto_save: bool,
    pub auto_save_interval: Duration,
    pub max_frame_bytes: usize,
    pub restore_on_start: bool,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path(),
            sessions_dir: config.sessions_dir(),
            auto_save: config.server.auto_save,
            auto_save_interval: config.server.auto_save_interval(),
            max_frame_bytes: config.server.max_frame_bytes,
            restore_on_start: config.server.restore_on_start,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Attachments = HashMap<u64, Option<SessionId>>;

/// Which session each live connection is attached to.
///
/// Session status changes caused by attaching and detaching happen while the
/// registry lock is held, so the status always agrees with the registry. Lock
/// order is registry, then manager.
#[derive(Default)]
struct ConnectionRegistry {
    next_id: AtomicU64,
    attached: Mutex<Attachments>,
}

impl ConnectionRegistry {
    fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.attached).insert(id, None);
        id
    }

    fn attached(&self, conn: u64) -> Option<SessionId> {
        lock(&self.attached).get(&conn).cloned().flatten()
    }

    /// Attach a connection to a session, releasing the one it held before
    fn attach(&self, manager: &SessionManager, conn: u64, session_id: &str) -> Result<Session, MuxError> {
        let mut attached = lock(&self.attached);
        let session = manager.attach_session(session_id)?;
        let previous = attached.insert(conn, Some(session_id.to_string())).flatten();
        if let Some(previous) = previous.filter(|p| p != session_id) {
            Self::release(&attached, manager, &previous);
        }
        Ok(session)
    }

    /// Detach a connection. Fails when it was not attached.
    fn detach(&self, manager: &SessionManager, conn: u64) -> Result<(), MuxError> {
        let mut attached = lock(&self.attached);
        let previous = attached
            .get_mut(&conn)
            .and_then(Option::take)
            .ok_or(MuxError::NotAttached)?;
        Self::release(&attached, manager, &previous);
        Ok(())
    }

    fn unregister(&self, manager: &SessionManager, conn: u64) {
        let mut attached = lock(&self.attached);
        if let Some(Some(previous)) = attached.remove(&conn) {
            Self::release(&attached, manager, &previous);
        }
    }

    /// Mark a session detached once no connection is attached to it
    fn release(attached: &Attachments, manager: &SessionManager, session_id: &str) {
        if attached.values().any(|s| s.as_deref() == Some(session_id)) {
            return;
        }
        if let Err(e) = manager.detach_session(session_id) {
            debug!(session = %session_id, error = %e, "detach skipped");
        }
    }

    /// Drop every attachment to a destroyed session
    fn forget_session(&self, session_id: &str) {
        for slot in lock(&self.attached).values_mut() {
            if slot.as_deref() == Some(session_id) {
                *slot = None;
            }
        }
    }

    /// Remove every connection, returning the sessions they were attached to
    fn clear(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.attached).drain().filter_map(|(_, s)| s).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn len(&self) -> usize {
        lock(&self.attached).len()
    }
}

/// State shared by the accept loop, connection tasks and the auto-saver
struct Shared {
    manager: Arc<SessionManager>,
    store: SnapshotStore,
    registry: ConnectionRegistry,
    max_frame_bytes: usize,
}

struct RunningTasks {
    cancel: CancellationToken,
    accept: JoinHandle<()>,
    auto_save: Option<JoinHandle<()>>,
}

/// Terminal Server - socket front end of a [`SessionManager`]
pub struct TerminalServer {
    options: ServerOptions,
    shared: Arc<Shared>,
    state: Mutex<ServerState>,
    tasks: tokio::sync::Mutex<Option<RunningTasks>>,
}

impl TerminalServer {
    pub fn new(options: ServerOptions, manager: Arc<SessionManager>) -> Self {
        let shared = Arc::new(Shared {
            manager,
            store: SnapshotStore::new(options.sessions_dir.clone()),
            registry: ConnectionRegistry::default(),
            max_frame_bytes: options.max_frame_bytes,
        });
        Self {
            options,
            shared,
            state: Mutex::new(ServerState::Stopped),
            tasks: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.shared.manager
    }

    pub fn socket_path(&self) -> &Path {
        &self.options.socket_path
    }

    /// Number of open client connections
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        let mut state = lock(&self.state);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    fn set_state(&self, to: ServerState) {
        *lock(&self.state) = to;
    }

    /// Bind the socket and start the accept and auto-save loops
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut tasks = self.tasks.lock().await;
        if !self.transition(ServerState::Stopped, ServerState::Starting) {
            return Err(ServerError::AlreadyRunning);
        }

        match self.launch().await {
            Ok(running) => {
                *tasks = Some(running);
                self.set_state(ServerState::Running);
                info!(path = %self.options.socket_path.display(), "server started");
                Ok(())
            }
            Err(e) => {
                self.set_state(ServerState::Stopped);
                error!(error = %e, "server failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<RunningTasks, ServerError> {
        // Restore only once the socket is ours, so a failed start leaves the
        // manager untouched
        let listener = bind_socket(&self.options.socket_path).await?;
        if self.options.restore_on_start {
            if let Err(e) = restore_sessions(&self.shared) {
                drop(listener);
                let _ = std::fs::remove_file(&self.options.socket_path);
                return Err(e);
            }
        }

        let cancel = CancellationToken::new();

        let accept = tokio::spawn(accept_loop(listener, self.shared.clone(), cancel.clone()));
        let auto_save = self.options.auto_save.then(|| {
            tokio::spawn(auto_save_loop(
                self.shared.clone(),
                self.options.auto_save_interval,
                cancel.clone(),
            ))
        });

        Ok(RunningTasks {
            cancel,
            accept,
            auto_save,
        })
    }

    /// Cancel both loops, drop every connection and remove the socket.
    ///
    /// In-flight requests are abandoned, not drained.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut tasks = self.tasks.lock().await;
        if !self.transition(ServerState::Running, ServerState::Stopping) {
            return Err(ServerError::NotRunning);
        }

        if let Some(running) = tasks.take() {
            running.cancel.cancel();
            if let Err(e) = running.accept.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
            if let Some(handle) = running.auto_save {
                if let Err(e) = handle.await {
                    warn!(error = %e, "auto-save loop ended abnormally");
                }
            }
        }

        for session_id in self.shared.registry.clear() {
            let _ = self.shared.manager.detach_session(&session_id);
        }

        if self.options.auto_save {
            save_all(&self.shared);
        }

        match std::fs::remove_file(&self.options.socket_path) {
            Ok(()) => debug!(path = %self.options.socket_path.display(), "removed socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to remove socket file"),
        }

        self.set_state(ServerState::Stopped);
        info!("server stopped");
        Ok(())
    }
}

impl Drop for TerminalServer {
    fn drop(&mut self) {
        if let Some(running) = self.tasks.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Load every snapshot into the manager as a detached session
fn restore_sessions(shared: &Shared) -> Result<(), ServerError> {
    let sessions = shared.store.load_all()?;
    let mut restored = 0;
    for session in sessions {
        let id = session.id.clone();
        match shared.manager.restore_session(session) {
            Ok(_) => restored += 1,
            Err(e) => warn!(session = %id, error = %e, "snapshot not restored"),
        }
    }
    if restored > 0 {
        info!(count = restored, "restored sessions");
    }
    Ok(())
}

/// Remove a stale socket file and listen with owner-only permissions
async fn bind_socket(path: &Path) -> Result<UnixListener, ServerError> {
    if path.exists() {
        let live = tokio::time::timeout(Duration::from_secs(3), UnixStream::connect(path)).await;
        if let Ok(Ok(_)) = live {
            return Err(ServerError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("another server is listening on {}", path.display()),
            )));
        }
        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "removed stale socket");
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

async fn accept_loop(listener: UnixListener, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("accept loop cancelled");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let shared = shared.clone();
                        connections.spawn(handle_connection(stream, shared));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        // Back off so a persistent error does not spin
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
}

async fn handle_connection(stream: UnixStream, shared: Arc<Shared>) {
    let conn_id = shared.registry.register();
    debug!(conn = conn_id, "client connected");

    let mut conn = Connection::new(stream, shared.max_frame_bytes);
    match serve_connection(&mut conn, &shared, conn_id).await {
        Err(ProtocolError::Disconnected) => debug!(conn = conn_id, "client disconnected"),
        Err(e) => debug!(conn = conn_id, error = %e, "connection closed"),
        Ok(()) => {}
    }

    shared.registry.unregister(&shared.manager, conn_id);
}

/// One request, one response, until the peer leaves or sends garbage
async fn serve_connection(
    conn: &mut Connection<UnixStream>,
    shared: &Shared,
    conn_id: u64,
) -> Result<(), ProtocolError> {
    loop {
        let frame = conn.recv().await?;
        let response = match Request::decode(&frame) {
            Ok(request) => dispatch(shared, conn_id, request),
            Err(e @ ProtocolError::Malformed(_)) => return Err(e),
            Err(e) => {
                debug!(conn = conn_id, error = %e, "rejected request");
                Response::error(e)
            }
        };
        conn.send(&response).await?;
    }
}

/// Run one request against the manager. Never fails: errors become
/// `{error}` responses.
fn dispatch(shared: &Shared, conn_id: u64, request: Request) -> Response {
    let kind = request.kind();
    match execute(shared, conn_id, request) {
        Ok(response) => response,
        Err(e) => {
            debug!(conn = conn_id, command = kind, error = %e, "request failed");
            Response::error(e)
        }
    }
}

fn execute(shared: &Shared, conn_id: u64, request: Request) -> Result<Response, MuxError> {
    let manager = &shared.manager;
    let attached = || shared.registry.attached(conn_id).ok_or(MuxError::NotAttached);

    let response = match request {
        Request::CreateSession(p) => {
            let created = manager.create_session(&p.name)?;
            let session = shared.registry.attach(manager, conn_id, &created.id)?;
            Response::CreateSession(CreateSessionResponse {
                success: true,
                session_id: session.id.clone(),
                session,
            })
        }
        Request::AttachSession(p) => {
            let id = if p.session_id.is_empty() {
                manager.get_session_by_name(&p.session_name)?.id
            } else {
                p.session_id
            };
            let session = shared.registry.attach(manager, conn_id, &id)?;
            Response::Session(SessionResponse {
                success: true,
                session,
            })
        }
        Request::DetachSession => {
            shared.registry.detach(manager, conn_id)?;
            Response::ok()
        }
        Request::ListSessions => Response::Sessions(SessionsResponse {
            success: true,
            sessions: manager.list_sessions(),
        }),
        Request::GetSession => Response::Session(SessionResponse {
            success: true,
            session: manager.get_session(&attached()?)?,
        }),
        Request::CreateWindow(p) => Response::Window(WindowResponse {
            success: true,
            window: manager.create_window(&attached()?, &p.name)?,
        }),
        Request::CloseWindow(p) => {
            manager.close_window(&attached()?, p.window_index)?;
            Response::ok()
        }
        Request::SplitPane(p) => Response::Pane(PaneResponse {
            success: true,
            pane: manager.split_pane(&attached()?, p.window_index, p.direction)?,
        }),
        Request::ClosePane(p) => {
            manager.close_pane(&attached()?, p.window_index, p.pane_index)?;
            Response::ok()
        }
        Request::SwitchWindow(p) => {
            manager.switch_window(&attached()?, p.window_index)?;
            Response::ok()
        }
        Request::SwitchPane(p) => {
            manager.switch_pane(&attached()?, p.window_index, p.pane_index)?;
            Response::ok()
        }
        Request::SendKeys(p) => {
            manager.send_keys(&attached()?, p.keys.as_bytes())?;
            Response::ok()
        }
        Request::Rename(p) => {
            let id = attached()?;
            match p.target {
                RenameTarget::Session => manager.rename_session(&id, &p.new_name)?,
                RenameTarget::Window => {
                    let index = match p.window_index {
                        Some(index) => index,
                        None => manager.get_session(&id)?.active_window,
                    };
                    manager.rename_window(&id, index, &p.new_name)?
                }
            }
            Response::ok()
        }
        Request::KillSession(p) => {
            let id = if p.session_id.is_empty() {
                attached()?
            } else {
                p.session_id
            };
            manager.kill_session(&id)?;
            shared.registry.forget_session(&id);
            if let Err(e) = shared.store.remove(&id) {
                warn!(session = %id, error = %e, "failed to delete snapshot");
            }
            Response::ok()
        }
        Request::SelectLayout(p) => {
            manager.select_layout(&attached()?, p.window_index, p.layout)?;
            Response::ok()
        }
        Request::Resize(p) => {
            manager.resize_session(&attached()?, p.width, p.height)?;
            Response::ok()
        }
        Request::CapturePane(p) => Response::Capture(CaptureResponse {
            success: true,
            lines: manager.capture_pane(&attached()?, p.window_index, p.pane_index, p.lines)?,
        }),
    };
    Ok(response)
}

/// Snapshot every session. Failures are logged per session. Returns the
/// number of sessions written.
fn save_all(shared: &Shared) -> usize {
    let mut saved = 0;
    for session in shared.manager.list_sessions() {
        match shared.store.save(&session) {
            Ok(()) => saved += 1,
            Err(e) => warn!(session = %session.id, error = %e, "auto-save failed"),
        }
        // A kill may have removed the snapshot while this pass was writing it
        if shared.manager.get_session(&session.id).is_err() {
            let _ = shared.store.remove(&session.id);
        }
    }
    saved
}

async fn auto_save_loop(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let shared = shared.clone();
                match tokio::task::spawn_blocking(move || save_all(&shared)).await {
                    Ok(saved) => debug!(saved, "auto-save pass"),
                    Err(e) => warn!(error = %e, "auto-save pass aborted"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::testing::FakeSpawner;
    use crate::ipc::client::{Client, ClientError};
    use crate::wm::{SessionDefaults, SessionStatus, SplitDirection};
    use std::time::Instant;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> ServerOptions {
        ServerOptions {
            socket_path: dir.path().join("terminal").join("tmx.sock"),
            sessions_dir: dir.path().join("terminal").join("sessions"),
            auto_save: false,
            auto_save_interval: Duration::from_millis(50),
            max_frame_bytes: 64 * 1024,
            restore_on_start: false,
        }
    }

    async fn started(options: ServerOptions) -> TerminalServer {
        let manager = Arc::new(SessionManager::new(SessionDefaults::default()));
        let server = TerminalServer::new(options, manager);
        server.start().await.unwrap();
        server
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        assert_eq!(server.state(), ServerState::Running);
        assert!(server.socket_path().exists());
        assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.socket_path().exists());
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));

        server.start().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_socket_permissions_and_stale_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let opts = options(&dir);
        std::fs::create_dir_all(opts.socket_path.parent().unwrap()).unwrap();
        std::fs::write(&opts.socket_path, "stale").unwrap();

        let server = started(opts).await;
        let mode = std::fs::metadata(server.socket_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_refuses_live_socket() {
        let dir = TempDir::new().unwrap();
        let first = started(options(&dir)).await;
        let second = TerminalServer::new(options(&dir), first.manager().clone());
        assert!(matches!(second.start().await, Err(ServerError::Io(_))));
        assert_eq!(second.state(), ServerState::Stopped);
        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_restores_nothing() {
        let dir = TempDir::new().unwrap();
        let first = started(options(&dir)).await;
        let saved = first.manager().create_session("saved").unwrap();
        SnapshotStore::new(options(&dir).sessions_dir).save(&saved).unwrap();

        let mut opts = options(&dir);
        opts.restore_on_start = true;
        let manager = Arc::new(SessionManager::new(SessionDefaults::default()));
        let second = TerminalServer::new(opts, manager.clone());
        assert!(matches!(second.start().await, Err(ServerError::Io(_))));
        assert_eq!(manager.session_count(), 0);
        assert!(first.socket_path().exists());

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_skips_broken_snapshots() {
        let dir = TempDir::new().unwrap();
        let source = SessionManager::new(SessionDefaults::default());
        let good = source.create_session("good").unwrap();
        let mut hollow = source.create_session("hollow").unwrap();
        hollow.windows.clear();
        let store = SnapshotStore::new(options(&dir).sessions_dir);
        store.save(&good).unwrap();
        store.save(&hollow).unwrap();

        let mut opts = options(&dir);
        opts.restore_on_start = true;
        let server = started(opts).await;
        let names: Vec<String> = server
            .manager()
            .list_sessions()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["good"]);
        server.stop().await.unwrap();
    }

    #[test]
    fn test_attach_wins_over_concurrent_release() {
        let manager = SessionManager::new(SessionDefaults::default());
        let session = manager.create_session("contended").unwrap();
        let registry = ConnectionRegistry::default();

        for _ in 0..300 {
            let a = registry.register();
            let b = registry.register();
            registry.attach(&manager, a, &session.id).unwrap();
            std::thread::scope(|scope| {
                scope.spawn(|| registry.unregister(&manager, a));
                scope.spawn(|| registry.attach(&manager, b, &session.id).unwrap());
            });
            assert_eq!(
                manager.get_session(&session.id).unwrap().status,
                SessionStatus::Active
            );

            registry.detach(&manager, b).unwrap();
            assert_eq!(
                manager.get_session(&session.id).unwrap().status,
                SessionStatus::Detached
            );
            assert!(matches!(registry.detach(&manager, b), Err(MuxError::NotAttached)));
            registry.unregister(&manager, b);
        }
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_snapshot_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.auto_save = true;
        let sessions_dir = opts.sessions_dir.clone();
        let server = started(opts).await;

        // A directory in the way of the temp file makes that one write fail
        let source = SessionManager::new(SessionDefaults::default());
        let broken = source.create_session("broken").unwrap();
        std::fs::create_dir_all(sessions_dir.join(format!("{}.json.tmp", broken.id))).unwrap();
        server.manager().restore_session(broken.clone()).unwrap();
        let healthy = server.manager().create_session("healthy").unwrap();

        let store = &server.shared.store;
        assert!(wait_until(|| store.path_for(&healthy.id).exists()).await);
        assert_eq!(save_all(&server.shared), 1);
        assert!(!store.path_for(&broken.id).exists());

        server.stop().await.unwrap();
        assert!(store.path_for(&healthy.id).exists());
    }

    #[tokio::test]
    async fn test_concrete_scenario_over_socket() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let mut client = Client::connect(server.socket_path()).await.unwrap();

        let s1 = client.create_session("work").await.unwrap();
        let err = client.create_session("work").await.unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m.contains("duplicate session name")));

        let pane = client.split_pane(0, SplitDirection::Horizontal).await.unwrap();
        assert_eq!(pane.index, 1);
        let session = client.get_session().await.unwrap();
        assert_eq!(session.windows[0].panes.len(), 2);
        assert!(session.windows[0].panes[1].active);

        client.close_pane(0, 0).await.unwrap();
        let session = client.get_session().await.unwrap();
        assert_eq!(session.windows[0].panes.len(), 1);
        assert_eq!(session.windows[0].panes[0].index, 0);
        assert!(session.windows[0].panes[0].active);

        client.kill_session(Some(&s1.id)).await.unwrap();
        assert!(client.list_sessions().await.unwrap().is_empty());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let mut conn = Connection::new(stream, 1024);

        conn.send_line(r#"{"type":"explode","payload":{}}"#.to_string()).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), r#"{"error":"unknown command: explode"}"#);

        conn.send_line(r#"{"type":"close_pane","payload":{"window_index":"x"}}"#.to_string())
            .await
            .unwrap();
        assert!(conn.recv().await.unwrap().contains("invalid payload for close_pane"));

        conn.send_line(r#"{"type":"list_sessions","payload":{}}"#.to_string()).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), r#"{"success":true,"sessions":[]}"#);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_drops_only_that_connection() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;

        let mut good = Client::connect(server.socket_path()).await.unwrap();
        good.create_session("keep").await.unwrap();

        let stream = UnixStream::connect(server.socket_path()).await.unwrap();
        let mut bad = Connection::new(stream, 1024);
        bad.send_line("this is not json".to_string()).await.unwrap();
        assert!(matches!(bad.recv().await, Err(ProtocolError::Disconnected)));

        assert_eq!(good.list_sessions().await.unwrap().len(), 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_requires_attachment() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let mut client = Client::connect(server.socket_path()).await.unwrap();

        let err = client.create_window("w").await.unwrap_err();
        assert!(matches!(err, ClientError::Server(ref m) if m == "not attached to a session"));
        let err = client.detach().await.unwrap_err();
        assert!(matches!(err, ClientError::Server(_)));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_by_name_and_detach() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let mut a = Client::connect(server.socket_path()).await.unwrap();
        let created = a.create_session("named").await.unwrap();
        a.detach().await.unwrap();
        assert_eq!(
            server.manager().get_session(&created.id).unwrap().status,
            SessionStatus::Detached
        );

        let mut b = Client::connect(server.socket_path()).await.unwrap();
        let session = b.attach("named").await.unwrap();
        assert_eq!(session.id, created.id);
        assert_eq!(session.status, SessionStatus::Active);
        let session = b.attach(&created.id).await.unwrap();
        assert_eq!(session.name, "named");
        assert!(b.attach("missing").await.is_err());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_detaches_when_last() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let mut a = Client::connect(server.socket_path()).await.unwrap();
        let mut b = Client::connect(server.socket_path()).await.unwrap();
        let session = a.create_session("shared").await.unwrap();
        b.attach(&session.id).await.unwrap();

        drop(a);
        assert!(wait_until(|| server.connection_count() == 1).await);
        let manager = server.manager();
        assert_eq!(manager.get_session(&session.id).unwrap().status, SessionStatus::Active);

        drop(b);
        assert!(
            wait_until(|| manager.get_session(&session.id).unwrap().status == SessionStatus::Detached)
                .await
        );
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_attach() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let mut owner = Client::connect(server.socket_path()).await.unwrap();
        let session = owner.create_session("hot").await.unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let path = server.socket_path().to_path_buf();
            let id = session.id.clone();
            tasks.spawn(async move {
                let mut client = Client::connect(&path).await.unwrap();
                for _ in 0..10 {
                    let attached = client.attach(&id).await.unwrap();
                    assert_eq!(attached.id, id);
                    client.split_pane(0, SplitDirection::Vertical).await.unwrap();
                    let _ = client.close_pane(0, 0).await;
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        let snap = server.manager().get_session(&session.id).unwrap();
        let window = &snap.windows[0];
        assert!(window.active_pane < window.panes.len());
        assert_eq!(window.panes.iter().filter(|p| p.active).count(), 1);
        for (i, pane) in window.panes.iter().enumerate() {
            assert_eq!(pane.index, i);
        }
        assert_eq!(server.manager().session_count(), 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir);
        opts.auto_save = true;
        let server = started(opts.clone()).await;

        let mut client = Client::connect(server.socket_path()).await.unwrap();
        let session = client.create_session("persisted").await.unwrap();
        client.create_window("logs").await.unwrap();
        let snapshot = server.shared.store.path_for(&session.id);
        assert!(wait_until(|| snapshot.exists()).await);
        drop(client);
        server.stop().await.unwrap();

        opts.restore_on_start = true;
        opts.auto_save = false;
        let restored = started(opts).await;
        let loaded = restored.manager().get_session(&session.id).unwrap();
        assert_eq!(loaded.name, "persisted");
        assert_eq!(loaded.status, SessionStatus::Detached);
        assert_eq!(loaded.windows.len(), 2);

        let mut client = Client::connect(restored.socket_path()).await.unwrap();
        client.attach("persisted").await.unwrap();
        client.kill_session(None).await.unwrap();
        assert!(!snapshot.exists());
        restored.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_keys_and_capture_over_socket() {
        let dir = TempDir::new().unwrap();
        let spawner = Arc::new(FakeSpawner {
            output: b"hello\n".to_vec(),
            ..Default::default()
        });
        let manager = Arc::new(SessionManager::new(SessionDefaults::default()).with_spawner(spawner.clone()));
        let server = TerminalServer::new(options(&dir), manager);
        server.start().await.unwrap();

        let mut client = Client::connect(server.socket_path()).await.unwrap();
        client.create_session("io").await.unwrap();
        client.send_keys(b"ls\n").await.unwrap();
        client.send_keys(&[0x1b, 0xff]).await.unwrap();
        assert_eq!(&*spawner.written.lock().unwrap(), b"ls\n\x1b\xff");

        let mut lines = Vec::new();
        for _ in 0..100 {
            lines = client.capture_pane(0, 0, None).await.unwrap();
            if !lines.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lines, vec!["hello"]);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_connections() {
        let dir = TempDir::new().unwrap();
        let server = started(options(&dir)).await;
        let mut client = Client::connect(server.socket_path()).await.unwrap();
        client.create_session("s").await.unwrap();

        server.stop().await.unwrap();
        assert_eq!(server.connection_count(), 0);
        assert!(client.list_sessions().await.is_err());
    }
}
