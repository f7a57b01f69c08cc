// Backend TCP server
//
// Accepts connections and serves framed requests against a
// PositiveFilterStore until the client hangs up. A bad request gets an
// `Error` response; the connection stays open.

use super::PositiveFilterStore;
use crate::exposure::protocol::{read_frame, write_frame, BackendRequest, BackendResponse};
use crate::{EncounterError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct BackendServer {
    store: Arc<PositiveFilterStore>,
}

impl BackendServer {
    pub fn new(store: Arc<PositiveFilterStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PositiveFilterStore> {
        &self.store
    }

    /// Serve until the listener fails
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| EncounterError::TransportFailure(e.to_string()))?;
        info!("🗄️  Backend listening on {} (policy {:?})", local, self.store.policy());

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| EncounterError::TransportFailure(format!("accept: {}", e)))?;
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(store, stream, peer).await {
                    warn!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

/// Answer one request
pub fn dispatch(store: &PositiveFilterStore, request: BackendRequest) -> BackendResponse {
    let result = match request {
        BackendRequest::Upload { filter } => store
            .upload(&filter)
            .map(|id| BackendResponse::Uploaded { id }),
        BackendRequest::Query { filter } => store.query(&filter).map(BackendResponse::from),
    };
    result.unwrap_or_else(|e| BackendResponse::from(&e))
}

async fn handle_connection(
    store: Arc<PositiveFilterStore>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    debug!("Backend connection from {}", peer);
    while let Some(request) = read_frame::<_, BackendRequest>(&mut stream).await? {
        let kind = request.message_type();
        let response = dispatch(&store, request);
        match &response {
            BackendResponse::Uploaded { id } => {
                info!("Positive filter #{} uploaded by {}", id, peer)
            }
            BackendResponse::Verdict { matched: true, .. } => {
                info!("Node at {} has been in contact with a positive case", peer)
            }
            BackendResponse::Verdict { .. } => info!("Node at {} has no detection", peer),
            BackendResponse::Error { kind: error_kind, message } => {
                warn!("{} from {} rejected ({:?}): {}", kind, peer, error_kind, message)
            }
        }
        write_frame(&mut stream, &response).await?;
    }
    debug!("Backend connection from {} closed", peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::{BloomFilter, BloomParams};
    use crate::exposure::protocol::RemoteErrorKind;
    use crate::store::{MatchPolicy, MemoryStorage};

    #[test]
    fn test_dispatch_reports_errors_as_responses() {
        let params = BloomParams::new(512, 3).unwrap();
        let store = PositiveFilterStore::new(
            Arc::new(MemoryStorage::new()),
            params,
            MatchPolicy::for_params(params),
        )
        .unwrap();
        let response = dispatch(&store, BackendRequest::Upload { filter: vec![1] });
        assert!(matches!(
            response,
            BackendResponse::Error {
                kind: RemoteErrorKind::Serialization,
                ..
            }
        ));

        let mut filter = BloomFilter::new(params);
        filter.insert(b"x");
        let response = dispatch(
            &store,
            BackendRequest::Upload {
                filter: filter.to_bytes(),
            },
        );
        assert_eq!(response, BackendResponse::Uploaded { id: 0 });

        let response = dispatch(
            &store,
            BackendRequest::Query {
                filter: filter.to_bytes(),
            },
        );
        assert_eq!(
            response,
            BackendResponse::Verdict {
                matched: true,
                per_filter: vec![true]
            }
        );
    }
}
