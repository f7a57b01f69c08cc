//! Backend wire protocol: messages and framing
//!
//! Every message travels as `[4 bytes LE length][bincode body]`. A connection
//! carries any number of request/response pairs; the client closes it.

use super::QueryVerdict;
use crate::{EncounterError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; a default-sized counting filter is ~800 KB
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendRequest {
    /// Store an encoded filter of a positive node
    Upload { filter: Vec<u8> },
    /// Match an encoded query filter against every stored filter
    Query { filter: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendResponse {
    Uploaded { id: u64 },
    Verdict { matched: bool, per_filter: Vec<bool> },
    Error { kind: RemoteErrorKind, message: String },
}

/// Error class carried back to the client so it surfaces as the same variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    Serialization,
    InvalidConfig,
    Storage,
    Other,
}

impl RemoteErrorKind {
    /// Split an error into its class and bare detail
    pub fn classify(err: &EncounterError) -> (Self, String) {
        match err {
            EncounterError::SerializationError(detail) => {
                (RemoteErrorKind::Serialization, detail.clone())
            }
            EncounterError::InvalidConfig(detail) => (RemoteErrorKind::InvalidConfig, detail.clone()),
            EncounterError::Storage(detail) => (RemoteErrorKind::Storage, detail.clone()),
            other => (RemoteErrorKind::Other, other.to_string()),
        }
    }

    pub fn into_error(self, message: String) -> EncounterError {
        match self {
            RemoteErrorKind::Serialization => EncounterError::SerializationError(message),
            RemoteErrorKind::InvalidConfig => EncounterError::InvalidConfig(message),
            RemoteErrorKind::Storage => EncounterError::Storage(message),
            RemoteErrorKind::Other => EncounterError::TransportFailure(message),
        }
    }
}

impl From<&EncounterError> for BackendResponse {
    fn from(err: &EncounterError) -> Self {
        let (kind, message) = RemoteErrorKind::classify(err);
        BackendResponse::Error { kind, message }
    }
}

impl BackendRequest {
    pub fn message_type(&self) -> &'static str {
        match self {
            BackendRequest::Upload { .. } => "Upload",
            BackendRequest::Query { .. } => "Query",
        }
    }
}

impl BackendResponse {
    pub fn message_type(&self) -> &'static str {
        match self {
            BackendResponse::Uploaded { .. } => "Uploaded",
            BackendResponse::Verdict { .. } => "Verdict",
            BackendResponse::Error { .. } => "Error",
        }
    }
}

impl From<QueryVerdict> for BackendResponse {
    fn from(verdict: QueryVerdict) -> Self {
        BackendResponse::Verdict {
            matched: verdict.matched,
            per_filter: verdict.per_filter,
        }
    }
}

fn io_failure(err: std::io::Error) -> EncounterError {
    EncounterError::TransportFailure(err.to_string())
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        bincode::serialize(message).map_err(|e| EncounterError::SerializationError(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(EncounterError::SerializationError(format!(
            "frame of {} bytes exceeds limit {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    writer
        .write_u32_le(payload.len() as u32)
        .await
        .map_err(io_failure)?;
    writer.write_all(&payload).await.map_err(io_failure)?;
    writer.flush().await.map_err(io_failure)?;
    Ok(())
}

/// Read one frame; `Ok(None)` when the peer closed cleanly between frames
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_failure(e)),
    };
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(EncounterError::SerializationError(format!(
            "invalid frame length {}",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(io_failure)?;
    bincode::deserialize(&body)
        .map(Some)
        .map_err(|e| EncounterError::SerializationError(e.to_string()))
}
