//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream to the relay (handshake + all gameplay traffic)
//! - One rollback engine driven by a fixed-timestep scheduler
//! - Local input publication, optionally delayed to simulate lag
//! - Resynchronization: on desync it asks peers for a snapshot and loads it
//!
//! Everything that touches the engine runs on the task that owns the client,
//! so corrections are always fully queued or reconciled between two frames.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use rollback_shared::{
    config::EngineConfig,
    driver::{LoopOptions, Scheduler},
    engine::{FrameOutcome, FrameTime, RollbackEngine, StateOf, Submission},
    error::RollbackError,
    net::{InputMessage, NetMsg, ReliableConn, SessionStart, PROTOCOL_VERSION},
    observe::ObserverHandle,
    sim::Simulation,
    tick::{ParticipantId, TickId},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::input::ClientCommand;

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Running our own view of the session.
    Synced,
    /// Waiting for a peer's snapshot before our state can be trusted.
    AwaitingSnapshot,
    /// Relay connection is gone.
    Disconnected,
}

/// High-level game client.
pub struct GameClient<S: Simulation> {
    pub participant: ParticipantId,
    pub state: ClientState,
    pub peers: Vec<ParticipantId>,

    engine: RollbackEngine<S>,
    outbound: mpsc::Sender<NetMsg>,
    inbound: mpsc::Receiver<NetMsg>,
    lag: Duration,
}

impl<S: Simulation> GameClient<S> {
    /// Connects to the relay, performs the handshake and starts the loop.
    ///
    /// If other participants are already present, a snapshot is requested
    /// right away and the client stays in `AwaitingSnapshot` until one arrives.
    pub async fn connect(cfg: &EngineConfig, sim: S) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let participant = ParticipantId::new(cfg.participant.clone());

        info!(server = %server_addr, participant = %participant, "Connecting to relay");

        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
            participant: participant.clone(),
        })
        .await?;

        let peers = match conn.recv().await? {
            NetMsg::Welcome { peers, .. } => peers,
            NetMsg::Disconnect { reason } => anyhow::bail!("relay refused connection: {reason}"),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };
        info!(participant = %participant, peers = peers.len(), "Connected to relay");

        let engine = RollbackEngine::new(sim, cfg.clone())?;

        let (mut reader, mut writer) = conn.into_split();
        let (outbound, mut outbound_rx) = mpsc::channel::<NetMsg>(256);
        let (inbound_tx, inbound) = mpsc::channel::<NetMsg>(256);

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = writer.send(&msg).await {
                    warn!(error = %e, "relay write failed");
                    break;
                }
            }
        });
        // Reading in its own task keeps frame decoding cancel-safe.
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(msg) => {
                        if inbound_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "relay read ended");
                        break;
                    }
                }
            }
        });

        let mut client = Self {
            participant,
            state: ClientState::Synced,
            peers,
            engine,
            outbound,
            inbound,
            lag: Duration::from_millis(cfg.simulated_lag_ms),
        };
        client
            .engine
            .start(LoopOptions::default(), FrameTime::now());
        if !client.peers.is_empty() {
            client.request_resync().await?;
        }
        Ok(client)
    }

    async fn send(&mut self, msg: NetMsg) -> anyhow::Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("relay writer stopped"))
    }

    /// Applies a local input and publishes it for the tick it was recorded on.
    pub async fn submit_local_input(&mut self, input: S::Input) -> anyhow::Result<TickId> {
        let tick = self
            .engine
            .submit_local_input(self.participant.clone(), input.clone())?;
        let msg = NetMsg::Input(InputMessage::new(self.participant.clone(), &input, tick)?);

        if self.lag.is_zero() {
            self.send(msg).await?;
        } else {
            let outbound = self.outbound.clone();
            let lag = self.lag;
            tokio::spawn(async move {
                tokio::time::sleep(lag).await;
                if outbound.send(msg).await.is_err() {
                    warn!(lag_ms = lag.as_millis() as u64, "relay writer stopped, delayed input dropped");
                }
            });
        }
        Ok(tick)
    }

    /// Handles one message from the relay.
    pub async fn handle_message(&mut self, msg: NetMsg) -> anyhow::Result<()> {
        match msg {
            NetMsg::Input(m) => self.on_remote_input(m).await,
            NetMsg::SessionStartRequest { reset_existing } => {
                if reset_existing {
                    info!("peer is starting a new session");
                    self.state = ClientState::AwaitingSnapshot;
                } else if self.state == ClientState::Synced {
                    let start = SessionStart::new(false, &self.engine.snapshot())?;
                    self.send(NetMsg::SessionStart(start)).await?;
                }
                Ok(())
            }
            NetMsg::SessionStart(start) => {
                if !start.reset && self.state != ClientState::AwaitingSnapshot {
                    debug!("ignoring unsolicited snapshot");
                    return Ok(());
                }
                let snapshot = match start.decode::<S::Payload, S::Input>() {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "malformed snapshot");
                        return Ok(());
                    }
                };
                match self.engine.load_from_snapshot(snapshot, FrameTime::now()) {
                    Ok(()) => {
                        self.state = ClientState::Synced;
                        Ok(())
                    }
                    Err(e @ RollbackError::InvalidSnapshot(_)) => {
                        warn!(error = %e, "rejected snapshot");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            NetMsg::PeerJoined { participant } => {
                info!(participant = %participant, "peer joined");
                if !self.peers.contains(&participant) {
                    self.peers.push(participant);
                }
                Ok(())
            }
            NetMsg::PeerLeft { participant } => {
                info!(participant = %participant, "peer left");
                self.peers.retain(|p| p != &participant);
                Ok(())
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected by relay");
                self.state = ClientState::Disconnected;
                Ok(())
            }
            other => {
                debug!(?other, "Unhandled relay message");
                Ok(())
            }
        }
    }

    async fn on_remote_input(&mut self, m: InputMessage) -> anyhow::Result<()> {
        let input: S::Input = match m.decode() {
            Ok(i) => i,
            Err(e) => {
                warn!(participant = %m.participant, error = %e, "malformed input payload");
                return Ok(());
            }
        };
        match self
            .engine
            .submit_remote_input(m.participant.clone(), input, m.target_tick)
        {
            Ok(Submission::Queued) | Ok(Submission::Applied) => Ok(()),
            Err(e) if e.is_desync() => self.request_resync().await,
            Err(e @ RollbackError::MalformedInput { .. }) => {
                warn!(error = %e, "rejected remote input");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Asks peers for their window. Our own state stays visible (and stale)
    /// until a snapshot arrives.
    pub async fn request_resync(&mut self) -> anyhow::Result<()> {
        if self.state == ClientState::AwaitingSnapshot {
            return Ok(());
        }
        warn!(participant = %self.participant, "requesting resync");
        self.state = ClientState::AwaitingSnapshot;
        self.send(NetMsg::SessionStartRequest {
            reset_existing: false,
        })
        .await
    }

    /// Discards the current session for everyone and starts a fresh one.
    pub async fn start_new_session(&mut self) -> anyhow::Result<()> {
        self.engine.reset(FrameTime::now())?;
        self.state = ClientState::Synced;
        self.send(NetMsg::SessionStartRequest {
            reset_existing: true,
        })
        .await?;
        let start = SessionStart::new(true, &self.engine.snapshot())?;
        self.send(NetMsg::SessionStart(start)).await
    }

    /// One scheduler callback. A desync found while draining triggers a resync
    /// request and yields `None`.
    pub async fn frame(&mut self, at: std::time::Instant) -> anyhow::Result<Option<FrameOutcome>> {
        match self.engine.frame(at) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) if e.is_desync() => {
                self.request_resync().await?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Waits up to `timeout` for one relay message and handles it.
    /// Returns false on timeout.
    pub async fn poll_network(&mut self, timeout: Duration) -> anyhow::Result<bool> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(msg)) => {
                self.handle_message(msg).await?;
                Ok(true)
            }
            Ok(None) => {
                self.state = ClientState::Disconnected;
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }

    /// Main loop: frames from `scheduler`, messages from the relay, user
    /// commands from `commands`. Returns on `Quit`, when the command channel
    /// closes, or when the relay connection goes away.
    pub async fn run(
        &mut self,
        mut scheduler: impl Scheduler,
        mut commands: mpsc::Receiver<ClientCommand<S::Input>>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                at = scheduler.next_frame() => {
                    self.frame(at).await?;
                }
                msg = self.inbound.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await?,
                    None => self.state = ClientState::Disconnected,
                },
                cmd = commands.recv() => match cmd {
                    Some(ClientCommand::Quit) | None => break,
                    Some(cmd) => self.exec(cmd).await?,
                },
            }
            if self.state == ClientState::Disconnected {
                info!(participant = %self.participant, "relay connection closed");
                break;
            }
        }
        self.engine.stop();
        let _ = self
            .send(NetMsg::Disconnect {
                reason: "client exiting".into(),
            })
            .await;
        Ok(())
    }

    async fn exec(&mut self, cmd: ClientCommand<S::Input>) -> anyhow::Result<()> {
        match cmd {
            ClientCommand::Input(input) => {
                if let Err(e) = self.submit_local_input(input).await {
                    warn!(error = %e, "local input rejected");
                }
            }
            ClientCommand::Resync => self.request_resync().await?,
            ClientCommand::NewSession => self.start_new_session().await?,
            ClientCommand::Status => {
                let latest = self.engine.latest();
                info!(
                    participant = %self.participant,
                    state = ?self.state,
                    session = %self.engine.simulation_id(),
                    tick = %latest.tick,
                    time = latest.simulation_time,
                    window = self.engine.history().len(),
                    pending = self.engine.pending_len(),
                    peers = self.peers.len(),
                    "status"
                );
            }
            ClientCommand::Quit => {}
        }
        Ok(())
    }

    pub fn observe_ticks(
        &mut self,
        callback: impl FnMut(&StateOf<S>) + Send + 'static,
    ) -> ObserverHandle {
        self.engine.observe_ticks(callback)
    }

    pub fn engine(&self) -> &RollbackEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RollbackEngine<S> {
        &mut self.engine
    }
}
