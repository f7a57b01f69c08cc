// TCP client for a remote positive-filter backend

use super::protocol::{read_frame, write_frame, BackendRequest, BackendResponse};
use super::{BackendStore, QueryVerdict};
use crate::{EncounterError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection per request; failures are surfaced, never retried
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    addr: SocketAddr,
    request_timeout: Duration,
}

impl RemoteBackend {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn exchange(&self, request: BackendRequest) -> Result<BackendResponse> {
        let kind = request.message_type();
        let round_trip = async {
            let mut stream = TcpStream::connect(self.addr)
                .await
                .map_err(|e| EncounterError::TransportFailure(format!("connect {}: {}", self.addr, e)))?;
            write_frame(&mut stream, &request).await?;
            read_frame::<_, BackendResponse>(&mut stream)
                .await?
                .ok_or_else(|| {
                    EncounterError::TransportFailure("backend closed without responding".to_string())
                })
        };

        match timeout(self.request_timeout, round_trip).await {
            Ok(Ok(BackendResponse::Error {
                kind: error_kind,
                message,
            })) => Err(error_kind.into_error(format!("backend rejected {}: {}", kind, message))),
            Ok(result) => result,
            Err(_) => Err(EncounterError::TransportFailure(format!(
                "{} to {} timed out after {:?}",
                kind, self.addr, self.request_timeout
            ))),
        }
    }
}

#[async_trait]
impl BackendStore for RemoteBackend {
    async fn upload(&self, filter: Vec<u8>) -> Result<()> {
        match self.exchange(BackendRequest::Upload { filter }).await? {
            BackendResponse::Uploaded { id } => {
                tracing::debug!("Backend {} stored filter #{}", self.addr, id);
                Ok(())
            }
            other => Err(EncounterError::TransportFailure(format!(
                "unexpected response to Upload: {}",
                other.message_type()
            ))),
        }
    }

    async fn query(&self, filter: Vec<u8>) -> Result<QueryVerdict> {
        match self.exchange(BackendRequest::Query { filter }).await? {
            BackendResponse::Verdict {
                matched,
                per_filter,
            } => Ok(QueryVerdict {
                matched,
                per_filter,
            }),
            other => Err(EncounterError::TransportFailure(format!(
                "unexpected response to Query: {}",
                other.message_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::protocol::RemoteErrorKind;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = RemoteBackend::new(addr).with_timeout(Duration::from_millis(500));
        let err = backend.upload(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, EncounterError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let backend = RemoteBackend::new(addr).with_timeout(Duration::from_millis(100));
        let err = backend.query(vec![0]).await.unwrap_err();
        assert!(matches!(err, EncounterError::TransportFailure(msg) if msg.contains("timed out")));
    }

    /// Backend that answers a single request with `response`
    async fn answering(response: BackendResponse) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _: Option<BackendRequest> = read_frame(&mut stream).await.unwrap();
            write_frame(&mut stream, &response).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_error_response_keeps_its_kind() {
        let addr = answering(BackendResponse::from(&EncounterError::SerializationError(
            "bad filter".to_string(),
        )))
        .await;

        let err = RemoteBackend::new(addr).upload(vec![9]).await.unwrap_err();
        assert!(matches!(err, EncounterError::SerializationError(msg) if msg.contains("bad filter")));
    }

    #[tokio::test]
    async fn test_unclassified_error_is_transport_failure() {
        let addr = answering(BackendResponse::Error {
            kind: RemoteErrorKind::Other,
            message: "overloaded".to_string(),
        })
        .await;

        let err = RemoteBackend::new(addr).query(vec![9]).await.unwrap_err();
        assert!(matches!(err, EncounterError::TransportFailure(msg) if msg.contains("overloaded")));
    }
}
