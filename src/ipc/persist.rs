//! Session snapshots on disk
//!
//! One `<session-id>.json` file per session. Writes go to a temporary file
//! first and are renamed into place, so a crash never leaves a torn snapshot.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::wm::Session;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot {path} is not a valid session: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory of session snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    /// Write one session
    pub fn save(&self, session: &Session) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let path = self.path_for(&session.id);
        let tmp = self.dir.join(format!("{}.json.tmp", session.id));
        let data = serde_json::to_vec_pretty(session).map_err(|source| PersistError::Serde {
            path: path.clone(),
            source,
        })?;

        fs::write(&tmp, data).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        debug!(session = %session.id, "saved snapshot");
        Ok(())
    }

    /// Read one snapshot file
    pub fn load(&self, path: &Path) -> Result<Session, PersistError> {
        let data = fs::read(path).map_err(io_err(path))?;
        serde_json::from_slice(&data).map_err(|source| PersistError::Serde {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every readable snapshot. Unreadable files are logged and skipped; a
    /// missing directory means no snapshots.
    pub fn load_all(&self) -> Result<Vec<Session>, PersistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.dir)(e)),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable snapshot entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(error = %e, "skipping snapshot"),
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Delete a session's snapshot; a missing file is not an error
    pub fn remove(&self, session_id: &str) -> Result<(), PersistError> {
        let path = self.path_for(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}
