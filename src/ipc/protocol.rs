//! Wire protocol
//!
//! A request is one JSON object `{"type": <command>, "payload": <object>}`.
//! Decoding happens in two steps so an unknown `type` and a bad payload can
//! be answered with an error response instead of dropping the connection.
//! A response is a command-specific object, or `{"error": <message>}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::wm::{LayoutKind, Pane, Session, SplitDirection, Window};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid payload for {command}: {source}")]
    InvalidPayload {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame exceeds the maximum length")]
    FrameTooLong,

    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer disconnected")]
    Disconnected,
}

impl From<LinesCodecError> for ProtocolError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong,
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

/// `create_session` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSession {
    pub name: String,
}

/// `attach_session` payload; the id wins when both are given
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachSession {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateWindow {
    pub name: String,
}

/// Payload addressing a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowTarget {
    pub window_index: usize,
}

/// Payload addressing a pane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaneTarget {
    pub window_index: usize,
    pub pane_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitPane {
    pub window_index: usize,
    pub direction: SplitDirection,
}

/// Raw input for a pane: a JSON string when the bytes are UTF-8, otherwise
/// an array of byte values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyData {
    Text(String),
    Bytes(Vec<u8>),
}

impl KeyData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            KeyData::Text(text) => text.as_bytes(),
            KeyData::Bytes(bytes) => bytes,
        }
    }
}

impl From<&[u8]> for KeyData {
    fn from(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => KeyData::Text(text.to_string()),
            Err(_) => KeyData::Bytes(bytes.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendKeys {
    pub keys: KeyData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameTarget {
    Session,
    Window,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rename {
    pub target: RenameTarget,
    pub new_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_index: Option<usize>,
}

/// `kill_session` payload; an empty id means the attached session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSession {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectLayout {
    pub window_index: usize,
    pub layout: LayoutKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resize {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapturePane {
    pub window_index: usize,
    pub pane_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
}

/// Every command the server understands
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    CreateSession(CreateSession),
    AttachSession(AttachSession),
    DetachSession,
    ListSessions,
    GetSession,
    CreateWindow(CreateWindow),
    CloseWindow(WindowTarget),
    SplitPane(SplitPane),
    ClosePane(PaneTarget),
    SwitchWindow(WindowTarget),
    SwitchPane(PaneTarget),
    SendKeys(SendKeys),
    Rename(Rename),
    KillSession(KillSession),
    SelectLayout(SelectLayout),
    Resize(Resize),
    CapturePane(CapturePane),
}

/// Frame shape before the payload is interpreted
#[derive(Debug, Serialize, Deserialize)]
struct RawRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    // A missing or null payload reads as an empty object
    let value = match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload {
        command: kind.to_string(),
        source,
    })
}

impl Request {
    /// Wire name of the command
    pub fn kind(&self) -> &'static str {
        match self {
            Request::CreateSession(_) => "create_session",
            Request::AttachSession(_) => "attach_session",
            Request::DetachSession => "detach_session",
            Request::ListSessions => "list_sessions",
            Request::GetSession => "get_session",
            Request::CreateWindow(_) => "create_window",
            Request::CloseWindow(_) => "close_window",
            Request::SplitPane(_) => "split_pane",
            Request::ClosePane(_) => "close_pane",
            Request::SwitchWindow(_) => "switch_window",
            Request::SwitchPane(_) => "switch_pane",
            Request::SendKeys(_) => "send_keys",
            Request::Rename(_) => "rename",
            Request::KillSession(_) => "kill_session",
            Request::SelectLayout(_) => "select_layout",
            Request::Resize(_) => "resize",
            Request::CapturePane(_) => "capture_pane",
        }
    }

    /// Parse one frame.
    ///
    /// `Malformed` means the frame is not a request object at all and the
    /// connection should be dropped; the other errors can be answered.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let raw: RawRequest = serde_json::from_str(frame).map_err(ProtocolError::Malformed)?;
        let RawRequest { kind, payload: p } = raw;
        let k = kind.as_str();

        let request = match k {
            "create_session" => Request::CreateSession(payload(k, p)?),
            "attach_session" => Request::AttachSession(payload(k, p)?),
            "detach_session" => Request::DetachSession,
            "list_sessions" => Request::ListSessions,
            "get_session" => Request::GetSession,
            "create_window" => Request::CreateWindow(payload(k, p)?),
            "close_window" => Request::CloseWindow(payload(k, p)?),
            "split_pane" => Request::SplitPane(payload(k, p)?),
            "close_pane" => Request::ClosePane(payload(k, p)?),
            "switch_window" => Request::SwitchWindow(payload(k, p)?),
            "switch_pane" => Request::SwitchPane(payload(k, p)?),
            "send_keys" => Request::SendKeys(payload(k, p)?),
            "rename" => Request::Rename(payload(k, p)?),
            "kill_session" => Request::KillSession(payload(k, p)?),
            "select_layout" => Request::SelectLayout(payload(k, p)?),
            "resize" => Request::Resize(payload(k, p)?),
            "capture_pane" => Request::CapturePane(payload(k, p)?),
            _ => return Err(ProtocolError::UnknownCommand(kind)),
        };
        Ok(request)
    }

    /// Serialize to a single-line frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let payload = match self {
            Request::CreateSession(p) => serde_json::to_value(p)?,
            Request::AttachSession(p) => serde_json::to_value(p)?,
            Request::DetachSession | Request::ListSessions | Request::GetSession => {
                Value::Object(Default::default())
            }
            Request::CreateWindow(p) => serde_json::to_value(p)?,
            Request::CloseWindow(p) | Request::SwitchWindow(p) => serde_json::to_value(p)?,
            Request::SplitPane(p) => serde_json::to_value(p)?,
            Request::ClosePane(p) | Request::SwitchPane(p) => serde_json::to_value(p)?,
            Request::SendKeys(p) => serde_json::to_value(p)?,
            Request::Rename(p) => serde_json::to_value(p)?,
            Request::KillSession(p) => serde_json::to_value(p)?,
            Request::SelectLayout(p) => serde_json::to_value(p)?,
            Request::Resize(p) => serde_json::to_value(p)?,
            Request::CapturePane(p) => serde_json::to_value(p)?,
        };
        serde_json::to_string(&RawRequest {
            kind: self.kind().to_string(),
            payload,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub success: bool,
    pub session_id: String,
    pub session: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,
    pub session: Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub success: bool,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResponse {
    pub success: bool,
    pub window: Window,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaneResponse {
    pub success: bool,
    pub pane: Pane,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub success: bool,
    pub lines: Vec<String>,
}

/// Anything the server sends back
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Error(ErrorResponse),
    Success(SuccessResponse),
    CreateSession(CreateSessionResponse),
    Session(SessionResponse),
    Sessions(SessionsResponse),
    Window(WindowResponse),
    Pane(PaneResponse),
    Capture(CaptureResponse),
}

impl Response {
    pub fn ok() -> Self {
        Response::Success(SuccessResponse { success: true })
    }

    pub fn error(message: impl ToString) -> Self {
        Response::Error(ErrorResponse {
            error: message.to_string(),
        })
    }
}

/// Split a received frame into the server's error message or the value
pub fn parse_response(frame: &str) -> Result<Result<Value, String>, serde_json::Error> {
    let value: Value = serde_json::from_str(frame)?;
    match value.get("error").and_then(Value::as_str) {
        Some(message) => Ok(Err(message.to_string())),
        None => Ok(Ok(value)),
    }
}
