// Node runtime: the event loop of one encounter node
//
// A single task multiplexes the tick timer, inbound datagrams, the exposure
// schedule and operator commands. Everything a node does happens in order on
// that task; the engine's locks only matter to outside observers.

use super::engine::EncounterEngine;
use crate::config::ProtocolConfig;
use crate::encounter::{EncounterId, ShareOutcome};
use crate::exposure::{BackendStore, ExposureCoordinator, QueryVerdict, TickAction};
use crate::transport::{Location, ShareTransport};
use crate::{EncounterError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    /// Change broadcast location
    Move(Location),
    /// Upload our presence snapshot, then keep uploading for `period`
    ReportPositive { period: Duration },
    /// Query the backend now
    Query,
    Stop,
}

/// Things a node reports to whoever holds its handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Rotated { version: u64 },
    Encounter(EncounterId),
    WindowRolled { window_id: u64 },
    Uploaded { window_id: u64 },
    Verdict(QueryVerdict),
    Moved(Location),
    BackendError(String),
}

/// Control side of a running node
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    events: broadcast::Sender<NodeEvent>,
    engine: Arc<EncounterEngine>,
}

impl NodeHandle {
    pub async fn send(&self, command: NodeCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EncounterError::TransportFailure("node has stopped".to_string()))
    }

    pub async fn move_to(&self, location: Location) -> Result<()> {
        self.send(NodeCommand::Move(location)).await
    }

    pub async fn report_positive(&self, period: Duration) -> Result<()> {
        self.send(NodeCommand::ReportPositive { period }).await
    }

    pub async fn query(&self) -> Result<()> {
        self.send(NodeCommand::Query).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(NodeCommand::Stop).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn engine(&self) -> &Arc<EncounterEngine> {
        &self.engine
    }
}

pub struct NodeRuntime {
    config: ProtocolConfig,
    engine: Arc<EncounterEngine>,
    transport: Arc<dyn ShareTransport>,
    exposure: Option<ExposureCoordinator>,
    events: broadcast::Sender<NodeEvent>,
    rng: StdRng,
}

fn now() -> std::time::Instant {
    TokioInstant::now().into_std()
}

impl NodeRuntime {
    /// `backend` is optional; without one, exposure commands only log
    pub fn new(
        config: ProtocolConfig,
        transport: Arc<dyn ShareTransport>,
        backend: Option<Arc<dyn BackendStore>>,
    ) -> Result<Self> {
        let engine = Arc::new(EncounterEngine::new(&config)?);
        let exposure = backend.map(|store| {
            ExposureCoordinator::new(store, engine.clone(), config.positive_period())
        });
        let (events, _) = broadcast::channel(EVENT_QUEUE);

        Ok(Self {
            config,
            engine,
            transport,
            exposure,
            events,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn engine(&self) -> Arc<EncounterEngine> {
        Arc::clone(&self.engine)
    }

    /// Run on a new task; the handle controls it
    pub fn spawn(self) -> (NodeHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = NodeHandle {
            commands: tx,
            events: self.events.clone(),
            engine: Arc::clone(&self.engine),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<NodeCommand>) -> Result<()> {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let query_interval = self.config.query_interval();
        let mut exposure_timer = interval_at(TokioInstant::now() + query_interval, query_interval);
        exposure_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "🚀 Node started at {} (t={}, n={}, epoch {:?})",
            self.transport.location(),
            self.config.share_threshold,
            self.config.share_count,
            self.config.epoch_duration()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                datagram = self.transport.recv() => match datagram {
                    Ok(datagram) => self.on_datagram(&datagram),
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        tokio::time::sleep(self.config.tick_interval()).await;
                    }
                },
                _ = exposure_timer.tick(), if self.exposure.is_some() => self.on_exposure_tick().await,
                command = commands.recv() => match command {
                    None | Some(NodeCommand::Stop) => break,
                    Some(command) => self.on_command(command).await,
                },
            }
        }

        info!("🛑 Node stopped");
        Ok(())
    }

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn on_tick(&mut self) {
        let report = match self.engine.on_tick(now()) {
            Ok(report) => report,
            Err(e) => {
                warn!("Tick failed: {}", e);
                return;
            }
        };

        if let Some(version) = report.rotated {
            self.emit(NodeEvent::Rotated { version });
        }
        if let Some(window_id) = report.window_rolled {
            self.emit(NodeEvent::WindowRolled { window_id });
        }
        let Some(advertisement) = report.outgoing else {
            return;
        };

        let index = advertisement.share().index();
        let p = self.config.broadcast_drop_probability;
        if p > 0.0 && self.rng.gen_bool(p) {
            debug!("Dropped share #{} before broadcast", index);
            return;
        }
        match self.transport.broadcast(&advertisement.to_bytes()).await {
            Ok(()) => debug!(
                "Broadcast share #{} of {} at {}",
                index,
                advertisement.sender_tag(),
                self.transport.location()
            ),
            Err(e) => warn!("Broadcast of share #{} failed: {}", index, e),
        }
    }

    fn on_datagram(&self, datagram: &[u8]) {
        match self.engine.on_datagram(datagram, now()) {
            Ok(ShareOutcome::Reconstructed(enc_id)) => self.emit(NodeEvent::Encounter(enc_id)),
            Ok(outcome) => debug!("Share outcome: {:?}", outcome),
            Err(e) => debug!("Dropped datagram of {} bytes: {}", datagram.len(), e),
        }
    }

    async fn on_exposure_tick(&self) {
        let Some(exposure) = self.exposure.as_ref() else {
            return;
        };
        match exposure.tick(now()).await {
            Ok(TickAction::Uploaded { window_id }) => self.emit(NodeEvent::Uploaded { window_id }),
            Ok(TickAction::Queried(verdict)) => self.emit(NodeEvent::Verdict(verdict)),
            Err(e) => self.emit(NodeEvent::BackendError(e.to_string())),
        }
    }

    async fn on_command(&self, command: NodeCommand) {
        match command {
            NodeCommand::Move(location) => match self.transport.move_to(location).await {
                Ok(()) => {
                    info!("🚶 Moved to {}", location);
                    self.emit(NodeEvent::Moved(location));
                }
                Err(e) => warn!("Move to {} failed: {}", location, e),
            },
            NodeCommand::ReportPositive { period } => {
                let Some(exposure) = self.exposure.as_ref() else {
                    warn!("Positive report ignored: no backend configured");
                    return;
                };
                match exposure.report_positive_for(now(), period).await {
                    Ok(window_id) => self.emit(NodeEvent::Uploaded { window_id }),
                    Err(e) => self.emit(NodeEvent::BackendError(e.to_string())),
                }
            }
            NodeCommand::Query => {
                let Some(exposure) = self.exposure.as_ref() else {
                    warn!("Query ignored: no backend configured");
                    return;
                };
                match exposure.query_exposure().await {
                    Ok(verdict) => self.emit(NodeEvent::Verdict(verdict)),
                    Err(e) => self.emit(NodeEvent::BackendError(e.to_string())),
                }
            }
            NodeCommand::Stop => {}
        }
    }
}
