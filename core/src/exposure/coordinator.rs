// Exposure coordinator
//
// Decides what a node sends to the backend on each scheduled action. A node
// normally queries. After a positive report it uploads its presence snapshot
// instead, until the positive period runs out.

use super::{BackendStore, FilterSource, QueryVerdict};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    Querying,
    Positive { until: Instant },
}

/// What a scheduled tick ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    Uploaded { window_id: u64 },
    Queried(QueryVerdict),
}

// Snapshot bytes already produced for a window
struct ReportCache {
    window_id: u64,
    bytes: Vec<u8>,
}

struct CoordinatorState {
    mode: ExposureMode,
    cache: Option<ReportCache>,
    last_verdict: Option<QueryVerdict>,
}

pub struct ExposureCoordinator {
    store: Arc<dyn BackendStore>,
    source: Arc<dyn FilterSource>,
    positive_period: Duration,
    state: Mutex<CoordinatorState>,
}

impl ExposureCoordinator {
    pub fn new(
        store: Arc<dyn BackendStore>,
        source: Arc<dyn FilterSource>,
        positive_period: Duration,
    ) -> Self {
        Self {
            store,
            source,
            positive_period,
            state: Mutex::new(CoordinatorState {
                mode: ExposureMode::Querying,
                cache: None,
                last_verdict: None,
            }),
        }
    }

    pub fn mode(&self) -> ExposureMode {
        self.state.lock().mode
    }

    pub fn last_verdict(&self) -> Option<QueryVerdict> {
        self.state.lock().last_verdict.clone()
    }

    /// Upload the presence snapshot and stay positive for the configured period
    pub async fn report_positive(&self, now: Instant) -> Result<u64> {
        self.report_positive_for(now, self.positive_period).await
    }

    /// Upload the presence snapshot and stay positive for `period`.
    ///
    /// Within one window the same snapshot bytes are resubmitted.
    pub async fn report_positive_for(&self, now: Instant, period: Duration) -> Result<u64> {
        if !period.is_zero() {
            self.state.lock().mode = ExposureMode::Positive { until: now + period };
            info!("🩺 Positive mode for {:?}", period);
        }
        self.upload_snapshot().await
    }

    /// Query the backend with a filter over our recent EncIDs
    pub async fn query_exposure(&self) -> Result<QueryVerdict> {
        let query = self.source.query_filter();
        let verdict = self.store.query(query.to_bytes()).await.map_err(|e| {
            warn!("Exposure query failed: {}", e);
            e
        })?;

        if verdict.matched {
            warn!(
                "⚠️  Exposure detected: {} of {} positive filters match",
                verdict.match_count(),
                verdict.per_filter.len()
            );
        } else {
            info!(
                "✅ No exposure ({} positive filters checked)",
                verdict.per_filter.len()
            );
        }

        self.state.lock().last_verdict = Some(verdict.clone());
        Ok(verdict)
    }

    /// Scheduled exposure action
    pub async fn tick(&self, now: Instant) -> Result<TickAction> {
        let positive = {
            let mut state = self.state.lock();
            match state.mode {
                ExposureMode::Positive { until } if now < until => true,
                ExposureMode::Positive { .. } => {
                    state.mode = ExposureMode::Querying;
                    info!("🩺 Positive period over, back to querying");
                    false
                }
                ExposureMode::Querying => false,
            }
        };

        if positive {
            let window_id = self.upload_snapshot().await?;
            Ok(TickAction::Uploaded { window_id })
        } else {
            Ok(TickAction::Queried(self.query_exposure().await?))
        }
    }

    async fn upload_snapshot(&self) -> Result<u64> {
        let window_id = self.source.window_id();
        let (bytes, cached) = {
            let mut state = self.state.lock();
            match state.cache.as_ref() {
                Some(cache) if cache.window_id == window_id => (cache.bytes.clone(), true),
                _ => {
                    let bytes = self.source.presence_snapshot().to_bytes();
                    state.cache = Some(ReportCache {
                        window_id,
                        bytes: bytes.clone(),
                    });
                    (bytes, false)
                }
            }
        };

        let size = bytes.len();
        self.store.upload(bytes).await.map_err(|e| {
            warn!("Positive filter upload failed: {}", e);
            e
        })?;
        info!(
            "📤 Uploaded presence snapshot for window {} ({} bytes{})",
            window_id,
            size,
            if cached { ", resubmitted" } else { "" }
        );
        Ok(window_id)
    }
}
