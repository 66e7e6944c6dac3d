//! Terminal Client
//!
//! Typed wrapper over one server connection. Every call sends one request
//! and waits for its response; an `{error}` response becomes
//! [`ClientError::Server`].

use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::UnixStream;

use super::codec::Connection;
use super::protocol::{
    self, AttachSession, CaptureResponse, CapturePane, CreateSession, CreateSessionResponse,
    CreateWindow, KeyData, KillSession, PaneResponse, PaneTarget, ProtocolError, Rename, RenameTarget,
    Request, Resize, SelectLayout, SendKeys, SessionResponse, SessionsResponse, SplitPane,
    SuccessResponse, WindowResponse, WindowTarget,
};
use crate::wm::{LayoutKind, Pane, Session, SplitDirection, Window};

/// Responses are small; the server enforces its own request limit
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot reach server: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Server(String),

    #[error("server closed the connection")]
    Disconnected,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub struct Client {
    conn: Connection<UnixStream>,
}

impl Client {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self {
            conn: Connection::new(stream, MAX_RESPONSE_BYTES),
        })
    }

    async fn call<T: DeserializeOwned>(&mut self, request: Request) -> Result<T> {
        let frame = request.encode().map_err(|e| ProtocolError::Io(e.into()))?;
        self.conn.send_line(frame).await?;

        let reply = match self.conn.recv().await {
            Ok(reply) => reply,
            Err(ProtocolError::Disconnected) => return Err(ClientError::Disconnected),
            Err(e) => return Err(e.into()),
        };
        match protocol::parse_response(&reply).map_err(ClientError::UnexpectedResponse)? {
            Ok(value) => serde_json::from_value(value).map_err(ClientError::UnexpectedResponse),
            Err(message) => Err(ClientError::Server(message)),
        }
    }

    async fn call_ok(&mut self, request: Request) -> Result<()> {
        let _: SuccessResponse = self.call(request).await?;
        Ok(())
    }

    /// Create a session and attach this connection to it
    pub async fn create_session(&mut self, name: &str) -> Result<Session> {
        let response: CreateSessionResponse = self
            .call(Request::CreateSession(CreateSession {
                name: name.to_string(),
            }))
            .await?;
        Ok(response.session)
    }

    pub async fn attach_by_id(&mut self, id: &str) -> Result<Session> {
        let response: SessionResponse = self
            .call(Request::AttachSession(AttachSession {
                session_id: id.to_string(),
                session_name: String::new(),
            }))
            .await?;
        Ok(response.session)
    }

    pub async fn attach_by_name(&mut self, name: &str) -> Result<Session> {
        let response: SessionResponse = self
            .call(Request::AttachSession(AttachSession {
                session_id: String::new(),
                session_name: name.to_string(),
            }))
            .await?;
        Ok(response.session)
    }

    /// Attach to a session given either its id or its name
    pub async fn attach(&mut self, target: &str) -> Result<Session> {
        match self.attach_by_id(target).await {
            Err(ClientError::Server(_)) => self.attach_by_name(target).await,
            other => other,
        }
    }

    pub async fn detach(&mut self) -> Result<()> {
        self.call_ok(Request::DetachSession).await
    }

    pub async fn list_sessions(&mut self) -> Result<Vec<Session>> {
        let response: SessionsResponse = self.call(Request::ListSessions).await?;
        Ok(response.sessions)
    }

    /// Fresh snapshot of the attached session
    pub async fn get_session(&mut self) -> Result<Session> {
        let response: SessionResponse = self.call(Request::GetSession).await?;
        Ok(response.session)
    }

    pub async fn create_window(&mut self, name: &str) -> Result<Window> {
        let response: WindowResponse = self
            .call(Request::CreateWindow(CreateWindow {
                name: name.to_string(),
            }))
            .await?;
        Ok(response.window)
    }

    pub async fn close_window(&mut self, window_index: usize) -> Result<()> {
        self.call_ok(Request::CloseWindow(WindowTarget { window_index }))
            .await
    }

    pub async fn split_pane(&mut self, window_index: usize, direction: SplitDirection) -> Result<Pane> {
        let response: PaneResponse = self
            .call(Request::SplitPane(SplitPane {
                window_index,
                direction,
            }))
            .await?;
        Ok(response.pane)
    }

    pub async fn close_pane(&mut self, window_index: usize, pane_index: usize) -> Result<()> {
        self.call_ok(Request::ClosePane(PaneTarget {
            window_index,
            pane_index,
        }))
        .await
    }

    pub async fn switch_window(&mut self, window_index: usize) -> Result<()> {
        self.call_ok(Request::SwitchWindow(WindowTarget { window_index }))
            .await
    }

    pub async fn switch_pane(&mut self, window_index: usize, pane_index: usize) -> Result<()> {
        self.call_ok(Request::SwitchPane(PaneTarget {
            window_index,
            pane_index,
        }))
        .await
    }

    pub async fn send_keys(&mut self, keys: &[u8]) -> Result<()> {
        self.call_ok(Request::SendKeys(SendKeys {
            keys: KeyData::from(keys),
        }))
        .await
    }

    pub async fn rename_session(&mut self, new_name: &str) -> Result<()> {
        self.call_ok(Request::Rename(Rename {
            target: RenameTarget::Session,
            new_name: new_name.to_string(),
            window_index: None,
        }))
        .await
    }

    pub async fn rename_window(&mut self, window_index: usize, new_name: &str) -> Result<()> {
        self.call_ok(Request::Rename(Rename {
            target: RenameTarget::Window,
            new_name: new_name.to_string(),
            window_index: Some(window_index),
        }))
        .await
    }

    /// Kill a session by id, or the attached session when `None`
    pub async fn kill_session(&mut self, session_id: Option<&str>) -> Result<()> {
        self.call_ok(Request::KillSession(KillSession {
            session_id: session_id.unwrap_or_default().to_string(),
        }))
        .await
    }

    pub async fn select_layout(&mut self, window_index: usize, layout: LayoutKind) -> Result<()> {
        self.call_ok(Request::SelectLayout(SelectLayout {
            window_index,
            layout,
        }))
        .await
    }

    pub async fn resize(&mut self, width: u16, height: u16) -> Result<()> {
        self.call_ok(Request::Resize(Resize { width, height })).await
    }

    pub async fn capture_pane(
        &mut self,
        window_index: usize,
        pane_index: usize,
        lines: Option<usize>,
    ) -> Result<Vec<String>> {
        let response: CaptureResponse = self
            .call(Request::CapturePane(CapturePane {
                window_index,
                pane_index,
                lines,
            }))
            .await?;
        Ok(response.lines)
    }
}
