//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) length-prefixed frame channel.
//! - Provide the message types exchanged between participants and the relay.
//! - Keep serialization explicit and versionable.
//!
//! The transport is deliberately dumb. Inputs may still arrive late,
//! duplicated or out of tick order relative to the local simulation; the
//! rollback engine compensates for that, not the transport.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::tick::{ParticipantId, Snapshot, TickId};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
        participant: ParticipantId,
    },
    Welcome {
        participant: ParticipantId,
        /// Participants already identified on the relay.
        peers: Vec<ParticipantId>,
    },

    // ─── Membership ───
    PeerJoined {
        participant: ParticipantId,
    },
    PeerLeft {
        participant: ParticipantId,
    },

    // ─── Gameplay ───
    /// An input for a given tick.
    Input(InputMessage),
    /// Ask peers for their window, or to start over.
    SessionStartRequest {
        reset_existing: bool,
    },
    /// A full window for bootstrap or resync.
    SessionStart(SessionStart),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Input payload for a target tick. The payload is opaque JSON here; it is
/// decoded to the simulation's input type at the receiving boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMessage {
    pub participant: ParticipantId,
    pub payload: serde_json::Value,
    pub target_tick: TickId,
    pub sent_at: DateTime<Utc>,
}

impl InputMessage {
    pub fn new<I: Serialize>(
        participant: ParticipantId,
        input: &I,
        target_tick: TickId,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            participant,
            payload: serde_json::to_value(input).context("serialize input payload")?,
            target_tick,
            sent_at: Utc::now(),
        })
    }

    /// Decodes the payload; failure means a malformed input.
    pub fn decode<I: DeserializeOwned>(&self) -> serde_json::Result<I> {
        I::deserialize(&self.payload)
    }
}

/// Snapshot wrapper for the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStart {
    /// Set when the sender started a new session everyone should adopt.
    pub reset: bool,
    pub snapshot: serde_json::Value,
}

impl SessionStart {
    pub fn new<P: Serialize, I: Serialize>(
        reset: bool,
        snapshot: &Snapshot<P, I>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            reset,
            snapshot: serde_json::to_value(snapshot).context("serialize snapshot")?,
        })
    }

    pub fn decode<P: DeserializeOwned, I: DeserializeOwned>(
        &self,
    ) -> serde_json::Result<Snapshot<P, I>> {
        Snapshot::deserialize(&self.snapshot)
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    anyhow::ensure!(
        payload.len() <= MAX_FRAME_LEN,
        "frame of {} bytes exceeds limit",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame of {len} bytes exceeds limit");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { half: r }, FrameWriter { half: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        math::Vec2,
        tick::TickState,
        topdown::{AxisInput, World},
    };

    #[test]
    fn input_payload_decodes_to_concrete_type() {
        let msg = InputMessage::new("p1".into(), &AxisInput::new(1.0, 0.0), TickId(3)).unwrap();
        let back = decode_from_bytes(&encode_to_bytes(&NetMsg::Input(msg.clone())).unwrap()).unwrap();
        let NetMsg::Input(back) = back else {
            panic!("expected input");
        };
        assert_eq!(back.decode::<AxisInput>().unwrap().axis, Vec2::new(1.0, 0.0));
        assert_eq!(back.target_tick, TickId(3));
    }

    #[test]
    fn structurally_wrong_payload_fails_decode() {
        let msg = InputMessage {
            participant: "p1".into(),
            payload: serde_json::json!({ "axis": "left" }),
            target_tick: TickId(1),
            sent_at: Utc::now(),
        };
        assert!(msg.decode::<AxisInput>().is_err());
    }

    #[test]
    fn session_start_carries_snapshot() {
        let snap: Snapshot<World, AxisInput> = Snapshot {
            simulation_id: "s".into(),
            origin_time: Utc::now(),
            simulation_time: 0.0,
            states: vec![TickState::genesis(World::default(), 0.0)],
        };
        let start = SessionStart::new(false, &snap).unwrap();
        let back: Snapshot<World, AxisInput> = start.decode().unwrap();
        assert_eq!(back, snap);
    }

    #[tokio::test]
    async fn frames_cross_a_socket() -> anyhow::Result<()> {
        let listener = ReliableListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;
        let client = tokio::spawn(async move {
            let mut conn = ReliableConn::connect(addr).await?;
            conn.send(&NetMsg::SessionStartRequest {
                reset_existing: true,
            })
            .await?;
            conn.recv().await
        });

        let (conn, _) = listener.accept().await?;
        let (mut r, mut w) = conn.into_split();
        let got = r.recv().await?;
        assert_eq!(
            got,
            NetMsg::SessionStartRequest {
                reset_existing: true
            }
        );
        w.send(&NetMsg::Disconnect {
            reason: "bye".into(),
        })
        .await?;
        assert_eq!(
            client.await??,
            NetMsg::Disconnect {
                reason: "bye".into()
            }
        );
        Ok(())
    }
}
