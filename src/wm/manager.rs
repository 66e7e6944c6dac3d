//! Session Manager - Sole owner of the session map
//!
//! Every structural change goes through one `RwLock`, so concurrent clients
//! observe either the state before a mutation or the state after it. Readers
//! get cloned snapshots. Process work (spawning, writes, termination) happens
//! with the lock released: new panes are inserted first and their processes
//! are installed once started.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::layout::{LayoutKind, SplitDirection};
use super::pane::{Pane, PaneId};
use super::session::{Session, SessionId, SessionStatus};
use super::window::Window;
use crate::core::process::{PaneProcess, ProcessError, ProcessSpawner};
use crate::error::{MuxError, Result};

/// Settings applied to newly created sessions and panes
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub width: u16,
    pub height: u16,
    pub layout: LayoutKind,
    pub shell: String,
    pub working_dir: PathBuf,
    pub scrollback_lines: usize,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            layout: LayoutKind::Even,
            shell: "/bin/sh".to_string(),
            working_dir: PathBuf::from("/"),
            scrollback_lines: crate::core::scrollback::SCROLLBACK_LIMIT,
        }
    }
}

/// A pane whose process could not be terminated
#[derive(Debug)]
pub struct ReleaseFailure {
    pub pane_id: PaneId,
    pub error: ProcessError,
}

/// Outcome of a best-effort teardown
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Panes removed by the operation
    pub panes_closed: usize,
    pub failures: Vec<ReleaseFailure>,
}

/// A new pane whose process has not been started yet
struct PendingPane {
    id: PaneId,
    command: String,
    working_dir: PathBuf,
}

impl From<&Pane> for PendingPane {
    fn from(pane: &Pane) -> Self {
        Self {
            id: pane.id.clone(),
            command: pane.command.clone(),
            working_dir: pane.working_dir.clone(),
        }
    }
}

#[derive(Default)]
struct ManagerState {
    sessions: HashMap<SessionId, Session>,
    /// Counter for generated `session-<n>` names
    next_name: u64,
}

impl ManagerState {
    fn session(&self, id: &str) -> Result<&Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| MuxError::SessionNotFound(id.to_string()))
    }

    fn session_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| MuxError::SessionNotFound(id.to_string()))
    }

    fn name_in_use(&self, name: &str, except: Option<&str>) -> bool {
        self.sessions.values().any(|s| {
            s.name == name && s.status != SessionStatus::Destroyed && Some(s.id.as_str()) != except
        })
    }

    fn generate_name(&mut self) -> String {
        loop {
            let candidate = format!("session-{}", self.next_name);
            self.next_name += 1;
            if !self.name_in_use(&candidate, None) {
                return candidate;
            }
        }
    }
}

/// Session Manager - handles sessions and their windows and panes
pub struct SessionManager {
    state: RwLock<ManagerState>,
    spawner: Option<Arc<dyn ProcessSpawner>>,
    defaults: SessionDefaults,
}

impl SessionManager {
    /// Create a manager whose panes have no processes attached
    pub fn new(defaults: SessionDefaults) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            spawner: None,
            defaults,
        }
    }

    /// Attach a process to every pane created from now on
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_pane(&self) -> Pane {
        Pane::new(self.defaults.shell.clone(), self.defaults.working_dir.clone())
    }

    /// Start the processes behind freshly inserted panes. Must be called
    /// without the lock held.
    ///
    /// Spawn failures leave the pane without a process rather than failing
    /// the structural operation. A pane closed while its process was starting
    /// gets that process terminated.
    fn start_processes(&self, session_id: &str, panes: Vec<PendingPane>) {
        let Some(spawner) = &self.spawner else {
            return;
        };

        let mut started = Vec::new();
        for pane in panes {
            match spawner.spawn(&pane.command, &pane.working_dir) {
                Ok(spawned) => {
                    let process = PaneProcess::start(spawned, self.defaults.scrollback_lines);
                    started.push((pane.id, Arc::new(process)));
                }
                Err(e) => warn!(pane = %pane.id, error = %e, "failed to start pane process"),
            }
        }
        if started.is_empty() {
            return;
        }

        let mut orphans = Vec::new();
        {
            let mut state = self.write();
            let mut session = state.sessions.get_mut(session_id);
            for (pane_id, process) in started {
                let slot = session
                    .as_mut()
                    .and_then(|s| s.panes_mut().find(|p| p.id == pane_id));
                match slot {
                    Some(pane) if pane.process.is_none() => pane.process = Some(process),
                    _ => orphans.push((pane_id, process)),
                }
            }
        }

        for (pane_id, process) in orphans {
            debug!(pane = %pane_id, "pane closed before its process started");
            if let Err(e) = process.terminate() {
                warn!(pane = %pane_id, error = %e, "failed to release pane process");
            }
        }
    }

    /// Terminate processes of removed panes, collecting failures
    fn release_panes(panes: Vec<Pane>) -> ReleaseReport {
        let mut report = ReleaseReport {
            panes_closed: panes.len(),
            failures: Vec::new(),
        };
        for mut pane in panes {
            if let Err(error) = pane.release() {
                warn!(pane = %pane.id, error = %error, "failed to release pane process");
                report.failures.push(ReleaseFailure {
                    pane_id: pane.id,
                    error,
                });
            }
        }
        report
    }

    /// Create a session. An empty name gets a generated `session-<n>` name.
    pub fn create_session(&self, name: &str) -> Result<Session> {
        let snapshot = {
            let mut state = self.write();

            let name = if name.is_empty() {
                state.generate_name()
            } else if state.name_in_use(name, None) {
                return Err(MuxError::NameConflict(name.to_string()));
            } else {
                name.to_string()
            };

            let session = Session::new(
                name,
                self.defaults.width,
                self.defaults.height,
                self.defaults.layout,
                self.new_pane(),
            );
            info!(session = %session.id, name = %session.name, "created session");
            let snapshot = session.clone();
            state.sessions.insert(session.id.clone(), session);
            snapshot
        };

        self.start_processes(&snapshot.id, snapshot.panes().map(PendingPane::from).collect());
        Ok(snapshot)
    }

    /// Insert a previously persisted session. It comes back detached and
    /// gets fresh processes when a spawner is configured.
    ///
    /// Snapshots without windows, with an empty window or with duplicate
    /// window names are rejected with `InvalidSnapshot`.
    pub fn restore_session(&self, mut session: Session) -> Result<Session> {
        session.normalize()?;
        session.status = SessionStatus::Detached;
        for pane in session.panes_mut() {
            pane.process = None;
        }

        let snapshot = {
            let mut state = self.write();
            if state.sessions.contains_key(&session.id) || state.name_in_use(&session.name, None) {
                return Err(MuxError::NameConflict(session.name));
            }
            info!(session = %session.id, name = %session.name, "restored session");
            let snapshot = session.clone();
            state.sessions.insert(session.id.clone(), session);
            snapshot
        };

        self.start_processes(&snapshot.id, snapshot.panes().map(PendingPane::from).collect());
        Ok(snapshot)
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.read().session(id).cloned()
    }

    pub fn get_session_by_name(&self, name: &str) -> Result<Session> {
        self.read()
            .sessions
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| MuxError::SessionNameNotFound(name.to_string()))
    }

    /// Snapshot of all sessions, oldest first
    pub fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Mark a session as viewed by a client
    pub fn attach_session(&self, id: &str) -> Result<Session> {
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.status = SessionStatus::Active;
        session.touch();
        debug!(session = %id, "attached");
        Ok(session.clone())
    }

    /// Mark a session as running unattended; panes keep running
    pub fn detach_session(&self, id: &str) -> Result<()> {
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.status = SessionStatus::Detached;
        session.touch();
        debug!(session = %id, "detached");
        Ok(())
    }

    /// Destroy a session and every pane in it.
    ///
    /// Pane release is best-effort: every pane is attempted and failures are
    /// collected in the report.
    pub fn kill_session(&self, id: &str) -> Result<ReleaseReport> {
        let panes = {
            let mut state = self.write();
            let mut session = state
                .sessions
                .remove(id)
                .ok_or_else(|| MuxError::SessionNotFound(id.to_string()))?;
            session.status = SessionStatus::Destroyed;
            session.drain_panes()
        };

        let report = Self::release_panes(panes);
        info!(
            session = %id,
            panes = report.panes_closed,
            failures = report.failures.len(),
            "killed session"
        );
        Ok(report)
    }

    /// Destroy every session, terminating all pane processes
    pub fn shutdown(&self) -> ReleaseReport {
        let panes: Vec<Pane> = {
            let mut state = self.write();
            state
                .sessions
                .drain()
                .flat_map(|(_, mut session)| session.drain_panes())
                .collect()
        };
        let report = Self::release_panes(panes);
        info!(
            panes = report.panes_closed,
            failures = report.failures.len(),
            "released all sessions"
        );
        report
    }

    pub fn create_window(&self, id: &str, name: &str) -> Result<Window> {
        let snapshot = {
            let mut state = self.write();
            let session = state.session_mut(id)?;
            let snapshot = session
                .create_window(name, self.defaults.layout, self.new_pane())?
                .clone();
            session.touch();
            snapshot
        };
        debug!(session = %id, window = snapshot.index, name = %snapshot.name, "created window");

        self.start_processes(id, snapshot.panes.iter().map(PendingPane::from).collect());
        Ok(snapshot)
    }

    pub fn close_window(&self, id: &str, index: usize) -> Result<ReleaseReport> {
        let window = {
            let mut state = self.write();
            let session = state.session_mut(id)?;
            let window = session.close_window(index)?;
            session.touch();
            window
        };
        debug!(session = %id, window = index, "closed window");
        Ok(Self::release_panes(window.panes))
    }

    /// Append a pane to a window and focus it.
    ///
    /// The direction is recorded in the log only; geometry follows the
    /// window's layout.
    pub fn split_pane(&self, id: &str, window_index: usize, direction: SplitDirection) -> Result<Pane> {
        let snapshot = {
            let mut state = self.write();
            let session = state.session_mut(id)?;
            let snapshot = session.split_pane(window_index, self.new_pane())?.clone();
            session.touch();
            snapshot
        };
        debug!(
            session = %id,
            window = window_index,
            pane = snapshot.index,
            direction = direction.as_str(),
            "split pane"
        );

        self.start_processes(id, vec![PendingPane::from(&snapshot)]);
        Ok(snapshot)
    }

    /// Close a pane; a window left without panes is closed as well
    pub fn close_pane(&self, id: &str, window_index: usize, pane_index: usize) -> Result<ReleaseReport> {
        let panes = {
            let mut state = self.write();
            let session = state.session_mut(id)?;
            let panes = session.close_pane(window_index, pane_index)?;
            session.touch();
            panes
        };
        debug!(session = %id, window = window_index, pane = pane_index, "closed pane");
        Ok(Self::release_panes(panes))
    }

    pub fn switch_window(&self, id: &str, index: usize) -> Result<()> {
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.switch_window(index)?;
        session.touch();
        Ok(())
    }

    pub fn switch_pane(&self, id: &str, window_index: usize, pane_index: usize) -> Result<()> {
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.switch_pane(window_index, pane_index)?;
        session.touch();
        Ok(())
    }

    pub fn rename_session(&self, id: &str, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(MuxError::EmptyName);
        }
        let mut state = self.write();
        state.session(id)?;
        if state.name_in_use(new_name, Some(id)) {
            return Err(MuxError::NameConflict(new_name.to_string()));
        }
        let session = state.session_mut(id)?;
        debug!(session = %id, from = %session.name, to = %new_name, "renamed session");
        session.name = new_name.to_string();
        session.touch();
        Ok(())
    }

    pub fn rename_window(&self, id: &str, index: usize, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(MuxError::EmptyName);
        }
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.rename_window(index, new_name)?;
        session.touch();
        Ok(())
    }

    pub fn select_layout(&self, id: &str, window_index: usize, layout: LayoutKind) -> Result<()> {
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.select_layout(window_index, layout)?;
        session.touch();
        Ok(())
    }

    pub fn resize_session(&self, id: &str, width: u16, height: u16) -> Result<()> {
        let mut state = self.write();
        let session = state.session_mut(id)?;
        session.resize(width, height);
        debug!(session = %id, width, height, "resized session");
        Ok(())
    }

    /// Write bytes to the focused pane of the current window
    pub fn send_keys(&self, id: &str, data: &[u8]) -> Result<()> {
        let process = {
            let state = self.read();
            let session = state.session(id)?;
            session
                .active_pane()
                .and_then(|pane| pane.process.clone())
                .ok_or(ProcessError::NoProcess)?
        };
        process.write(data)?;
        Ok(())
    }

    /// Tail of a pane's scrollback; empty when no process is attached
    pub fn capture_pane(
        &self,
        id: &str,
        window_index: usize,
        pane_index: usize,
        lines: Option<usize>,
    ) -> Result<Vec<String>> {
        let process = {
            let state = self.read();
            let pane = state.session(id)?.window(window_index)?.pane(pane_index)?;
            pane.process.clone()
        };
        Ok(process.map(|p| p.capture(lines)).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::testing::FakeSpawner;
    use std::sync::atomic::Ordering;
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn manager() -> SessionManager {
        SessionManager::new(SessionDefaults::default())
    }

    fn assert_invariants(session: &Session) {
        assert!(!session.windows.is_empty());
        assert!(session.active_window < session.windows.len());
        for (wi, window) in session.windows.iter().enumerate() {
            assert_eq!(window.index, wi);
            assert!(!window.panes.is_empty());
            assert!(window.active_pane < window.panes.len());
            assert_eq!(window.panes.iter().filter(|p| p.active).count(), 1);
            for (pi, pane) in window.panes.iter().enumerate() {
                assert_eq!(pane.index, pi);
            }
            let rects = crate::wm::layout::compute(
                window.panes.len(),
                window.layout,
                window.width,
                window.height,
            );
            let actual: Vec<_> = window.panes.iter().map(Pane::rect).collect();
            assert_eq!(actual, rects);
        }
    }

    #[test]
    fn test_create_and_get_session() {
        let mgr = manager();
        let s = mgr.create_session("work").unwrap();
        assert_eq!(s.name, "work");
        assert_eq!(mgr.get_session(&s.id).unwrap().name, "work");
        assert_eq!(mgr.get_session_by_name("work").unwrap().id, s.id);
        assert!(mgr.get_session("nope").unwrap_err().is_not_found());
        assert!(mgr.get_session_by_name("nope").unwrap_err().is_not_found());
        assert_invariants(&s);
    }

    #[test]
    fn test_generated_names() {
        let mgr = manager();
        let a = mgr.create_session("").unwrap();
        let b = mgr.create_session("").unwrap();
        assert_eq!(a.name, "session-0");
        assert_eq!(b.name, "session-1");
    }

    #[test]
    fn test_name_uniqueness_until_killed() {
        let mgr = manager();
        let s = mgr.create_session("x").unwrap();
        assert!(matches!(mgr.create_session("x"), Err(MuxError::NameConflict(_))));
        mgr.kill_session(&s.id).unwrap();
        mgr.create_session("x").unwrap();
    }

    #[test]
    fn test_concrete_scenario() {
        let mgr = manager();
        let s1 = mgr.create_session("work").unwrap();
        assert!(matches!(mgr.create_session("work"), Err(MuxError::NameConflict(_))));

        let pane = mgr.split_pane(&s1.id, 0, SplitDirection::Horizontal).unwrap();
        assert_eq!(pane.index, 1);
        assert!(pane.active);
        let s = mgr.get_session(&s1.id).unwrap();
        assert_eq!(s.windows[0].panes.len(), 2);
        assert_eq!(s.windows[0].active_pane, 1);
        assert_invariants(&s);

        mgr.close_pane(&s1.id, 0, 0).unwrap();
        let s = mgr.get_session(&s1.id).unwrap();
        assert_eq!(s.windows[0].panes.len(), 1);
        assert_eq!(s.windows[0].panes[0].index, 0);
        assert!(s.windows[0].panes[0].active);
        assert_eq!(s.windows[0].panes[0].id, pane.id);
        assert_invariants(&s);

        mgr.kill_session(&s1.id).unwrap();
        assert!(mgr.list_sessions().is_empty());
    }

    #[test]
    fn test_attach_detach() {
        let mgr = manager();
        let s = mgr.create_session("a").unwrap();
        mgr.detach_session(&s.id).unwrap();
        assert_eq!(mgr.get_session(&s.id).unwrap().status, SessionStatus::Detached);
        let attached = mgr.attach_session(&s.id).unwrap();
        assert_eq!(attached.status, SessionStatus::Active);
        assert!(attached.last_active >= s.last_active);
        assert!(mgr.attach_session("missing").is_err());
        assert!(mgr.detach_session("missing").is_err());
    }

    #[test]
    fn test_windows_and_switching() {
        let mgr = manager();
        let s = mgr.create_session("a").unwrap();
        let w = mgr.create_window(&s.id, "logs").unwrap();
        assert_eq!(w.index, 1);
        assert!(matches!(
            mgr.create_window(&s.id, "logs"),
            Err(MuxError::WindowNameConflict(_))
        ));

        mgr.switch_window(&s.id, 0).unwrap();
        assert_eq!(mgr.get_session(&s.id).unwrap().active_window, 0);
        assert!(mgr.switch_window(&s.id, 2).unwrap_err().is_out_of_range());

        mgr.close_window(&s.id, 0).unwrap();
        let snap = mgr.get_session(&s.id).unwrap();
        assert_eq!(snap.windows.len(), 1);
        assert_eq!(snap.windows[0].name, "logs");
        assert_invariants(&snap);

        assert!(matches!(mgr.close_window(&s.id, 0), Err(MuxError::LastWindow)));
    }

    #[test]
    fn test_switch_pane_exactly_one_active() {
        let mgr = manager();
        let s = mgr.create_session("a").unwrap();
        mgr.split_pane(&s.id, 0, SplitDirection::Vertical).unwrap();
        mgr.split_pane(&s.id, 0, SplitDirection::Vertical).unwrap();
        for target in [0, 2, 1, 1] {
            mgr.switch_pane(&s.id, 0, target).unwrap();
            let snap = mgr.get_session(&s.id).unwrap();
            let active: Vec<usize> = snap.windows[0]
                .panes
                .iter()
                .filter(|p| p.active)
                .map(|p| p.index)
                .collect();
            assert_eq!(active, vec![target]);
        }
        assert!(mgr.switch_pane(&s.id, 0, 3).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_rename() {
        let mgr = manager();
        let a = mgr.create_session("a").unwrap();
        mgr.create_session("b").unwrap();
        assert!(matches!(mgr.rename_session(&a.id, "b"), Err(MuxError::NameConflict(_))));
        assert!(matches!(mgr.rename_session(&a.id, ""), Err(MuxError::EmptyName)));
        mgr.rename_session(&a.id, "a").unwrap();
        mgr.rename_session(&a.id, "c").unwrap();
        assert_eq!(mgr.get_session_by_name("c").unwrap().id, a.id);
        assert!(mgr.rename_session("missing", "z").unwrap_err().is_not_found());

        mgr.rename_window(&a.id, 0, "editor").unwrap();
        assert_eq!(mgr.get_session(&a.id).unwrap().windows[0].name, "editor");
        assert!(mgr.rename_window(&a.id, 4, "x").unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_select_layout_and_resize() {
        let mgr = manager();
        let s = mgr.create_session("a").unwrap();
        mgr.split_pane(&s.id, 0, SplitDirection::Horizontal).unwrap();
        mgr.split_pane(&s.id, 0, SplitDirection::Horizontal).unwrap();
        mgr.select_layout(&s.id, 0, LayoutKind::MainHorizontal).unwrap();
        mgr.resize_session(&s.id, 100, 30).unwrap();

        let snap = mgr.get_session(&s.id).unwrap();
        assert_eq!(snap.windows[0].layout, LayoutKind::MainHorizontal);
        assert_eq!(snap.windows[0].panes[0].height, 20);
        assert_eq!(snap.windows[0].panes[0].width, 100);
        assert_invariants(&snap);
    }

    #[test]
    fn test_processes_attached_and_released() {
        let spawner = Arc::new(FakeSpawner::default());
        let mgr = manager().with_spawner(spawner.clone());
        let s = mgr.create_session("a").unwrap();
        mgr.split_pane(&s.id, 0, SplitDirection::Horizontal).unwrap();
        mgr.create_window(&s.id, "").unwrap();
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 3);

        mgr.close_pane(&s.id, 0, 1).unwrap();
        assert_eq!(spawner.terminated.load(Ordering::SeqCst), 1);

        let report = mgr.kill_session(&s.id).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.panes_closed, 2);
        assert_eq!(spawner.terminated.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_kill_session_collects_failures() {
        let spawner = Arc::new(FakeSpawner {
            fail_terminate: true,
            ..Default::default()
        });
        let mgr = manager().with_spawner(spawner);
        let s = mgr.create_session("a").unwrap();
        let second = mgr.split_pane(&s.id, 0, SplitDirection::Horizontal).unwrap();

        let report = mgr.kill_session(&s.id).unwrap();
        assert_eq!(report.panes_closed, 2);
        assert_eq!(report.failures.len(), 2);
        let mut failed: Vec<&str> = report.failures.iter().map(|f| f.pane_id.as_str()).collect();
        failed.sort();
        let mut expected = vec![s.windows[0].panes[0].id.as_str(), second.id.as_str()];
        expected.sort();
        assert_eq!(failed, expected);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, ProcessError::Terminate(_))));
        // Teardown still completed
        assert!(mgr.get_session(&s.id).is_err());
        assert!(mgr.kill_session(&s.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let spawner = Arc::new(FakeSpawner::default());
        let mgr = manager().with_spawner(spawner.clone());
        let a = mgr.create_session("a").unwrap();
        mgr.create_session("b").unwrap();
        mgr.split_pane(&a.id, 0, SplitDirection::Vertical).unwrap();

        let report = mgr.shutdown();
        assert_eq!(report.panes_closed, 3);
        assert!(report.failures.is_empty());
        assert_eq!(spawner.terminated.load(Ordering::SeqCst), 3);
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn test_send_keys_and_capture() {
        let spawner = Arc::new(FakeSpawner {
            output: b"prompt$ \nready\n".to_vec(),
            ..Default::default()
        });
        let mgr = manager().with_spawner(spawner.clone());
        let s = mgr.create_session("a").unwrap();

        mgr.send_keys(&s.id, b"echo hi\n").unwrap();
        assert_eq!(&*spawner.written.lock().unwrap(), b"echo hi\n");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut lines = Vec::new();
        while Instant::now() < deadline {
            lines = mgr.capture_pane(&s.id, 0, 0, None).unwrap();
            if lines.len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(lines, vec!["prompt$ ", "ready"]);
        assert_eq!(mgr.capture_pane(&s.id, 0, 0, Some(1)).unwrap(), vec!["ready"]);
        assert!(mgr.capture_pane(&s.id, 0, 9, None).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_send_keys_without_process() {
        let mgr = manager();
        let s = mgr.create_session("a").unwrap();
        assert!(matches!(
            mgr.send_keys(&s.id, b"x"),
            Err(MuxError::Process(ProcessError::NoProcess))
        ));
        assert!(mgr.capture_pane(&s.id, 0, 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_restore_session() {
        let mgr = manager();
        let original = mgr.create_session("saved").unwrap();
        let other = manager();
        let restored = other.restore_session(original.clone()).unwrap();
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.status, SessionStatus::Detached);
        assert!(matches!(
            other.restore_session(original),
            Err(MuxError::NameConflict(_))
        ));
    }

    #[test]
    fn test_restore_rejects_broken_snapshots() {
        let source = manager();
        let original = source.create_session("saved").unwrap();
        source.create_window(&original.id, "logs").unwrap();
        let original = source.get_session(&original.id).unwrap();

        let mut no_windows = original.clone();
        no_windows.windows.clear();

        let mut empty_window = original.clone();
        empty_window.windows[0].panes.clear();

        let mut duplicate_names = original.clone();
        duplicate_names.windows[1].name = duplicate_names.windows[0].name.clone();

        let mgr = manager();
        for broken in [no_windows, empty_window, duplicate_names] {
            assert!(matches!(
                mgr.restore_session(broken),
                Err(MuxError::InvalidSnapshot(_))
            ));
        }
        assert_eq!(mgr.session_count(), 0);

        // The intact snapshot still restores, with derived state rebuilt
        let mut shuffled = original;
        shuffled.active_window = 9;
        shuffled.windows[1].index = 7;
        let restored = mgr.restore_session(shuffled).unwrap();
        assert_eq!(restored.active_window, 1);
        assert_invariants(&restored);
    }

    /// Blocks every spawn until the test lets it through
    struct GatedSpawner {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        inner: FakeSpawner,
    }

    impl ProcessSpawner for GatedSpawner {
        fn spawn(
            &self,
            command: &str,
            working_dir: &std::path::Path,
        ) -> std::result::Result<crate::core::process::SpawnedProcess, ProcessError> {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            self.inner.spawn(command, working_dir)
        }
    }

    #[test]
    fn test_spawn_does_not_block_other_clients() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let spawner = GatedSpawner {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
            inner: FakeSpawner::default(),
        };
        let mgr = Arc::new(manager().with_spawner(Arc::new(spawner)));

        let creator = {
            let mgr = mgr.clone();
            thread::spawn(move || mgr.create_session("slow"))
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // While the spawn is stuck, other callers still get through
        let (done_tx, done_rx) = mpsc::channel();
        {
            let mgr = mgr.clone();
            thread::spawn(move || {
                let other = mgr.create_session("other").map(|s| s.id);
                let _ = done_tx.send((mgr.session_count(), other));
            });
        }
        // The second session's own spawn waits on the gate too
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();

        let slow = creator.join().unwrap().unwrap();
        let (count, other) = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(count, 2);
        other.unwrap();

        // The process was installed once the spawn finished
        mgr.send_keys(&slow.id, b"x").unwrap();
    }

    #[test]
    fn test_pane_closed_while_spawning_releases_process() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let terminated = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let spawner = GatedSpawner {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
            inner: FakeSpawner {
                terminated: terminated.clone(),
                ..Default::default()
            },
        };
        let mgr = Arc::new(manager().with_spawner(Arc::new(spawner)));
        release_tx.send(()).unwrap();
        let s = mgr.create_session("a").unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let splitter = {
            let mgr = mgr.clone();
            let id = s.id.clone();
            thread::spawn(move || mgr.split_pane(&id, 0, SplitDirection::Vertical))
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        mgr.close_pane(&s.id, 0, 1).unwrap();
        release_tx.send(()).unwrap();
        splitter.join().unwrap().unwrap();

        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert_invariants(&mgr.get_session(&s.id).unwrap());
    }

    #[test]
    fn test_concurrent_structural_mutations() {
        let mgr = Arc::new(manager());
        let s = mgr.create_session("shared").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let mgr = mgr.clone();
                let id = s.id.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        match (t + i) % 4 {
                            0 => {
                                let _ = mgr.split_pane(&id, 0, SplitDirection::Horizontal);
                            }
                            1 => {
                                let _ = mgr.close_pane(&id, 0, i % 3);
                            }
                            2 => {
                                let _ = mgr.switch_pane(&id, 0, i % 4);
                            }
                            _ => {
                                let _ = mgr.attach_session(&id);
                                let snap = mgr.get_session(&id).unwrap();
                                assert_invariants(&snap);
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_invariants(&mgr.get_session(&s.id).unwrap());
        assert_eq!(mgr.session_count(), 1);
    }
}
