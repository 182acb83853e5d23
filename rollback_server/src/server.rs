//! Relay server implementation.
//!
//! The relay holds no simulation state. It identifies participants and fans
//! each gameplay message out to every other participant:
//! - `Hello` must be the first frame; duplicate identities are refused.
//! - `Input`, `SessionStartRequest` and `SessionStart` are forwarded to all
//!   other identified participants, never echoed back to the sender.
//! - Joins and leaves are announced with `PeerJoined` / `PeerLeft`.
//!
//! One hub task owns the participant table. Each connection runs a reader task
//! and a writer task; they talk to the hub over channels, so no lock guards the
//! table.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use anyhow::Context;
use rollback_shared::{
    config::EngineConfig,
    net::{FrameReader, NetMsg, ReliableConn, ReliableListener, PROTOCOL_VERSION},
    tick::ParticipantId,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Per-participant outbound queue depth. A participant that falls this far
/// behind starts losing messages, which the engine tolerates.
const OUTBOUND_DEPTH: usize = 256;

/// How long a fresh connection has to identify itself.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

enum HubEvent {
    Join {
        participant: ParticipantId,
        outbound: mpsc::Sender<NetMsg>,
        ack: oneshot::Sender<Result<Vec<ParticipantId>, String>>,
    },
    Forward {
        from: ParticipantId,
        msg: NetMsg,
    },
    Leave {
        participant: ParticipantId,
    },
    Status {
        reply: oneshot::Sender<Vec<ParticipantId>>,
    },
}

/// Cloneable handle for querying a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    hub: mpsc::Sender<HubEvent>,
}

impl RelayHandle {
    /// Currently identified participants, sorted.
    pub async fn participants(&self) -> anyhow::Result<Vec<ParticipantId>> {
        let (reply, rx) = oneshot::channel();
        self.hub
            .send(HubEvent::Status { reply })
            .await
            .map_err(|_| anyhow::anyhow!("relay hub stopped"))?;
        rx.await.context("relay hub dropped status request")
    }
}

/// Relay server.
pub struct RelayServer {
    listener: ReliableListener,
    hub_tx: mpsc::Sender<HubEvent>,
    hub_rx: mpsc::Receiver<HubEvent>,
}

impl RelayServer {
    /// Binds the listener from config.
    pub async fn bind(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        Self::bind_addr(addr).await
    }

    pub async fn bind_addr(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = ReliableListener::bind(addr).await?;
        let (hub_tx, hub_rx) = mpsc::channel(1024);
        Ok(Self {
            listener,
            hub_tx,
            hub_rx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            hub: self.hub_tx.clone(),
        }
    }

    /// Runs the relay until the listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            listener,
            hub_tx,
            hub_rx,
        } = self;
        let hub = tokio::spawn(run_hub(hub_rx));

        let result = loop {
            match listener.accept().await {
                Ok((conn, peer)) => {
                    debug!(%peer, "connection accepted");
                    let hub_tx = hub_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(conn, peer, hub_tx).await {
                            debug!(%peer, error = %e, "connection closed");
                        }
                    });
                }
                Err(e) => break Err(e),
            }
        };
        hub.abort();
        result
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn run_hub(mut rx: mpsc::Receiver<HubEvent>) {
    let mut peers: HashMap<ParticipantId, mpsc::Sender<NetMsg>> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            HubEvent::Join {
                participant,
                outbound,
                ack,
            } => {
                if peers.contains_key(&participant) {
                    let _ = ack.send(Err(format!("{participant} is already connected")));
                    continue;
                }
                let mut existing: Vec<ParticipantId> = peers.keys().cloned().collect();
                existing.sort();
                broadcast(
                    &peers,
                    &participant,
                    &NetMsg::PeerJoined {
                        participant: participant.clone(),
                    },
                );
                peers.insert(participant.clone(), outbound);
                info!(participant = %participant, peers = peers.len(), "participant joined");
                let _ = ack.send(Ok(existing));
            }
            HubEvent::Forward { from, msg } => {
                broadcast(&peers, &from, &msg);
            }
            HubEvent::Leave { participant } => {
                if peers.remove(&participant).is_some() {
                    info!(participant = %participant, peers = peers.len(), "participant left");
                    broadcast(
                        &peers,
                        &participant,
                        &NetMsg::PeerLeft {
                            participant: participant.clone(),
                        },
                    );
                }
            }
            HubEvent::Status { reply } => {
                let mut ids: Vec<ParticipantId> = peers.keys().cloned().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
        }
    }
}

fn broadcast(
    peers: &HashMap<ParticipantId, mpsc::Sender<NetMsg>>,
    exclude: &ParticipantId,
    msg: &NetMsg,
) {
    for (id, tx) in peers {
        if id == exclude {
            continue;
        }
        if let Err(e) = tx.try_send(msg.clone()) {
            warn!(participant = %id, error = %e, "dropping relayed message");
        }
    }
}

async fn serve_connection(
    mut conn: ReliableConn,
    peer: SocketAddr,
    hub: mpsc::Sender<HubEvent>,
) -> anyhow::Result<()> {
    let hello = tokio::time::timeout(HELLO_TIMEOUT, conn.recv())
        .await
        .context("hello timeout")??;
    let participant = match hello {
        NetMsg::Hello {
            protocol,
            participant,
        } if protocol == PROTOCOL_VERSION => participant,
        NetMsg::Hello { protocol, .. } => {
            conn.send(&NetMsg::Disconnect {
                reason: format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}"),
            })
            .await?;
            anyhow::bail!("protocol mismatch from {peer}: {protocol}");
        }
        other => anyhow::bail!("unexpected handshake msg: {other:?}"),
    };

    let (outbound, mut outbound_rx) = mpsc::channel(OUTBOUND_DEPTH);
    let (ack, ack_rx) = oneshot::channel();
    hub.send(HubEvent::Join {
        participant: participant.clone(),
        outbound,
        ack,
    })
    .await
    .map_err(|_| anyhow::anyhow!("relay hub stopped"))?;

    let peers = match ack_rx.await.context("relay hub dropped join")? {
        Ok(peers) => peers,
        Err(reason) => {
            conn.send(&NetMsg::Disconnect {
                reason: reason.clone(),
            })
            .await?;
            anyhow::bail!("refused {participant}: {reason}");
        }
    };

    conn.send(&NetMsg::Welcome {
        participant: participant.clone(),
        peers,
    })
    .await?;
    info!(participant = %participant, %peer, "participant identified");

    let (reader, mut writer) = conn.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if writer.send(&msg).await.is_err() {
                break;
            }
        }
    });

    let result = forward_inbound(reader, &participant, &hub).await;

    let _ = hub
        .send(HubEvent::Leave {
            participant: participant.clone(),
        })
        .await;
    writer_task.abort();
    result
}

async fn forward_inbound(
    mut reader: FrameReader,
    participant: &ParticipantId,
    hub: &mpsc::Sender<HubEvent>,
) -> anyhow::Result<()> {
    loop {
        let msg = reader.recv().await?;
        match msg {
            NetMsg::Input(ref input) if &input.participant != participant => {
                warn!(
                    participant = %participant,
                    claimed = %input.participant,
                    "dropping input sent on behalf of another participant"
                );
            }
            NetMsg::Input(_) | NetMsg::SessionStartRequest { .. } | NetMsg::SessionStart(_) => {
                hub.send(HubEvent::Forward {
                    from: participant.clone(),
                    msg,
                })
                .await
                .map_err(|_| anyhow::anyhow!("relay hub stopped"))?;
            }
            NetMsg::Disconnect { reason } => {
                debug!(participant = %participant, reason = %reason, "participant disconnecting");
                return Ok(());
            }
            other => {
                debug!(participant = %participant, ?other, "ignoring unexpected message");
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral() -> anyhow::Result<(RelayServer, EngineConfig)> {
    let server = RelayServer::bind_addr("127.0.0.1:0".parse()?).await?;
    let cfg = EngineConfig {
        server_addr: server.local_addr()?.to_string(),
        ..Default::default()
    };
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(addr: SocketAddr, name: &str) -> anyhow::Result<(ReliableConn, NetMsg)> {
        let mut conn = ReliableConn::connect(addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
            participant: name.into(),
        })
        .await?;
        let reply = conn.recv().await?;
        Ok((conn, reply))
    }

    #[tokio::test]
    async fn duplicate_identity_refused() -> anyhow::Result<()> {
        let (server, cfg) = bind_ephemeral().await?;
        let addr: SocketAddr = cfg.server_addr.parse()?;
        let relay = server.spawn();

        let (_a, welcome) = join(addr, "alice").await?;
        assert!(matches!(welcome, NetMsg::Welcome { .. }));
        let (_b, refused) = join(addr, "alice").await?;
        assert!(matches!(refused, NetMsg::Disconnect { .. }));

        relay.abort();
        Ok(())
    }

    #[tokio::test]
    async fn wrong_protocol_refused() -> anyhow::Result<()> {
        let (server, cfg) = bind_ephemeral().await?;
        let addr: SocketAddr = cfg.server_addr.parse()?;
        let relay = server.spawn();

        let mut conn = ReliableConn::connect(addr).await?;
        conn.send(&NetMsg::Hello {
            protocol: PROTOCOL_VERSION + 1,
            participant: "bob".into(),
        })
        .await?;
        assert!(matches!(conn.recv().await?, NetMsg::Disconnect { .. }));

        relay.abort();
        Ok(())
    }
}
