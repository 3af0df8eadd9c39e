use crate::error::{QscError, Result};
use crate::types::{ControlValue, StatusRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version tag carried by every request
pub const JSONRPC_VERSION: &str = "2.0";

/// Id carried by every request. The core echoes it back but responses are
/// matched to requests by connection, never by id.
pub const REQUEST_ID: u32 = 1;

/// Terminator of every frame, in both directions
pub const FRAME_DELIMITER: u8 = 0x00;

/// Fixed parameter of the `StatusGet` method
const STATUS_GET_PARAMS: i32 = 0;

/// Remote methods used by the client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Method {
    #[serde(rename = "Control.Get")]
    ControlGet,
    #[serde(rename = "Control.Set")]
    ControlSet,
    #[serde(rename = "StatusGet")]
    StatusGet,
}

/// JSON-RPC request envelope
#[derive(Debug, Clone, Serialize)]
pub struct Request<P> {
    pub jsonrpc: &'static str,
    pub id: u32,
    pub method: Method,
    pub params: P,
}

/// Parameters of `Control.Set`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetParams {
    pub name: String,
    pub value: f64,
}

/// JSON-RPC response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<R> {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

/// Error object returned by the core in place of a result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// The fields needed to tell a response from an unsolicited notification
#[derive(Deserialize)]
struct FrameHeader {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
}

impl<P> Request<P> {
    fn new(method: Method, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: REQUEST_ID,
            method,
            params,
        }
    }
}

impl Request<Vec<String>> {
    /// `Control.Get` for a single control
    pub fn control_get(name: impl Into<String>) -> Self {
        Self::new(Method::ControlGet, vec![name.into()])
    }
}

impl Request<SetParams> {
    /// `Control.Set` of one control to a numeric value
    pub fn control_set(name: impl Into<String>, value: f64) -> Self {
        Self::new(
            Method::ControlSet,
            SetParams {
                name: name.into(),
                value,
            },
        )
    }
}

impl Request<i32> {
    /// `StatusGet`
    pub fn status_get() -> Self {
        Self::new(Method::StatusGet, STATUS_GET_PARAMS)
    }
}

impl<P: Serialize> Request<P> {
    /// Serialize to compact JSON followed by the frame delimiter
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(FRAME_DELIMITER);
        Ok(frame)
    }
}

impl<R> Response<R> {
    /// Unwrap the result, turning an error object or a missing result into an error
    pub fn into_result(self) -> Result<R> {
        if let Some(error) = self.error {
            return Err(QscError::Remote {
                code: error.code,
                message: error.message,
            });
        }

        self.result
            .ok_or_else(|| <serde_json::Error as serde::de::Error>::missing_field("result").into())
    }
}

/// Response to `Control.Get`
pub type ControlGetResponse = Response<Vec<ControlValue>>;

/// Response to `Control.Set`
pub type ControlSetResponse = Response<ControlValue>;

/// Response to `StatusGet`
pub type StatusGetResponse = Response<StatusRecord>;

/// Strip delimiter bytes from both ends of a frame
pub fn trim_frame(frame: &[u8]) -> &[u8] {
    let start = frame
        .iter()
        .position(|&b| b != FRAME_DELIMITER)
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|&b| b != FRAME_DELIMITER)
        .map_or(start, |i| i + 1);
    &frame[start..end]
}

/// If the frame is a notification (a method but no id), return its method name.
///
/// The core pushes `EngineStatus` notifications on its own schedule; they
/// are not answers to anything the client sent.
pub fn notification_method(frame: &[u8]) -> Option<String> {
    let header: FrameHeader = serde_json::from_slice(frame).ok()?;
    match (header.id, header.method) {
        (None, Some(method)) => Some(method),
        _ => None,
    }
}

/// Decode a trimmed frame into the response envelope expected for the method sent
pub fn decode_response<R: DeserializeOwned>(frame: &[u8]) -> Result<Response<R>> {
    Ok(serde_json::from_slice(trim_frame(frame))?)
}
