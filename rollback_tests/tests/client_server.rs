//! Socket-based tests: a loopback relay with real clients.

use std::time::Duration;

use rollback_client::{
    client::{ClientState, GameClient},
    input::ClientCommand,
};
use rollback_server::server::bind_ephemeral;
use rollback_shared::{
    config::{EngineConfig, ReconcileMode},
    driver::IntervalScheduler,
    engine::Step,
    net::{InputMessage, NetMsg, ReliableConn, PROTOCOL_VERSION},
    tick::TickId,
    topdown::{AxisInput, TopDown},
};
use rollback_tests::{advance, drain, init_tracing, pid, pump_until};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn client_cfg(base: &EngineConfig, name: &str) -> EngineConfig {
    EngineConfig {
        participant: name.into(),
        reconcile: ReconcileMode::Immediate,
        tick_hz: 10,
        retention_secs: 1,
        ..base.clone()
    }
}

async fn raw_peer(addr: &str, name: &str) -> anyhow::Result<ReliableConn> {
    let mut conn = ReliableConn::connect(addr.parse()?).await?;
    conn.send(&NetMsg::Hello {
        protocol: PROTOCOL_VERSION,
        participant: name.into(),
    })
    .await?;
    anyhow::ensure!(matches!(conn.recv().await?, NetMsg::Welcome { .. }));
    Ok(conn)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joiner_adopts_existing_session_and_sees_inputs() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let handle = server.handle();
    let relay = server.spawn();

    let mut alice = GameClient::connect(&client_cfg(&cfg, "alice"), TopDown::default()).await?;
    assert_eq!(alice.state, ClientState::Synced);
    assert!(alice.peers.is_empty());

    let mut bob = GameClient::connect(&client_cfg(&cfg, "bob"), TopDown::default()).await?;
    assert_eq!(bob.state, ClientState::AwaitingSnapshot);
    assert_eq!(bob.peers, vec![pid("alice")]);

    // Alice learns about bob, then answers his snapshot request.
    drain(&mut alice, Duration::from_millis(200)).await?;
    assert_eq!(alice.peers, vec![pid("bob")]);
    pump_until(&mut bob, WAIT, |c| c.state == ClientState::Synced).await?;
    assert_eq!(bob.engine().simulation_id(), alice.engine().simulation_id());
    assert_eq!(handle.participants().await?, vec![pid("alice"), pid("bob")]);

    let tick = alice.submit_local_input(AxisInput::new(1.0, 0.0)).await?;
    pump_until(&mut bob, WAIT, |c| {
        c.engine()
            .history()
            .at(tick)
            .and_then(|s| s.input_of(&pid("alice")))
            .is_some()
    })
    .await?;

    relay.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peers_converge_after_exchanging_inputs() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let relay = server.spawn();

    let mut alice = GameClient::connect(&client_cfg(&cfg, "alice"), TopDown::default()).await?;
    let mut bob = GameClient::connect(&client_cfg(&cfg, "bob"), TopDown::default()).await?;
    drain(&mut alice, Duration::from_millis(200)).await?;
    pump_until(&mut bob, WAIT, |c| c.state == ClientState::Synced).await?;

    // Alice steers at tick 3; bob is already at tick 6 when it arrives.
    advance(alice.engine_mut(), 3)?;
    let tick = alice.submit_local_input(AxisInput::new(1.0, 0.0)).await?;
    advance(bob.engine_mut(), 6)?;
    pump_until(&mut bob, WAIT, |c| {
        c.engine()
            .history()
            .at(tick)
            .and_then(|s| s.input_of(&pid("alice")))
            .is_some()
    })
    .await?;

    // Bob answers at tick 6; alice reaches tick 8 before reading it.
    let tick = bob.submit_local_input(AxisInput::new(0.0, -1.0)).await?;
    advance(alice.engine_mut(), 5)?;
    pump_until(&mut alice, WAIT, |c| {
        c.engine()
            .history()
            .at(tick)
            .and_then(|s| s.input_of(&pid("bob")))
            .is_some()
    })
    .await?;

    advance(bob.engine_mut(), 2)?;
    assert_eq!(alice.engine().latest().tick, TickId(8));
    assert_eq!(alice.engine().latest(), bob.engine().latest());

    advance(alice.engine_mut(), 4)?;
    advance(bob.engine_mut(), 4)?;
    assert_eq!(alice.engine().latest(), bob.engine().latest());
    let alice_pos = alice
        .engine()
        .latest()
        .payload
        .entity(&pid("alice"))
        .map(|e| e.pos);
    assert!(alice_pos.is_some_and(|p| p.x > 0.0));

    relay.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_input_triggers_resync_from_peer() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let relay = server.spawn();

    let mut alice = GameClient::connect(&client_cfg(&cfg, "alice"), TopDown::default()).await?;
    let mut mallory = raw_peer(&cfg.server_addr, "mallory").await?;
    drain(&mut alice, Duration::from_millis(200)).await?;

    // Push alice well past her window, then deliver an input for tick 0.
    advance(alice.engine_mut(), 25)?;
    let oldest = alice.engine().history().oldest_tick();
    assert!(oldest > TickId(0));
    mallory
        .send(&NetMsg::Input(InputMessage::new(
            pid("mallory"),
            &AxisInput::new(0.0, 1.0),
            TickId(0),
        )?))
        .await?;
    pump_until(&mut alice, WAIT, |c| c.state == ClientState::AwaitingSnapshot).await?;

    // The relay forwards alice's request to everyone else.
    let request = loop {
        match tokio::time::timeout(WAIT, mallory.recv()).await?? {
            NetMsg::SessionStartRequest { reset_existing } => break reset_existing,
            _ => continue,
        }
    };
    assert!(!request);

    // Mallory answers with a fresh window; alice adopts it.
    let mut donor = rollback_tests::engine_with(TopDown::default(), client_cfg(&cfg, "donor"))?;
    donor.run(Step::AdvanceTick)?;
    let snapshot = donor.snapshot();
    mallory
        .send(&NetMsg::SessionStart(
            rollback_shared::net::SessionStart::new(false, &snapshot)?,
        ))
        .await?;
    pump_until(&mut alice, WAIT, |c| c.state == ClientState::Synced).await?;
    assert_eq!(alice.engine().simulation_id(), donor.simulation_id());
    assert_eq!(alice.engine().latest().tick, TickId(1));

    relay.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_session_is_adopted_by_peers() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let relay = server.spawn();

    let mut alice = GameClient::connect(&client_cfg(&cfg, "alice"), TopDown::default()).await?;
    let mut bob = GameClient::connect(&client_cfg(&cfg, "bob"), TopDown::default()).await?;
    drain(&mut alice, Duration::from_millis(200)).await?;
    pump_until(&mut bob, WAIT, |c| c.state == ClientState::Synced).await?;

    let old_session = alice.engine().simulation_id().to_string();
    alice.start_new_session().await?;
    assert_ne!(alice.engine().simulation_id(), old_session);

    let new_session = alice.engine().simulation_id().to_string();
    pump_until(&mut bob, WAIT, |c| c.engine().simulation_id() == new_session).await?;
    assert_eq!(bob.state, ClientState::Synced);
    assert_eq!(bob.engine().latest().tick, TickId::GENESIS);

    relay.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_loop_publishes_inputs_and_exits_on_quit() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let relay = server.spawn();

    let mut alice = GameClient::connect(&client_cfg(&cfg, "alice"), TopDown::default()).await?;
    let mut watcher = raw_peer(&cfg.server_addr, "watcher").await?;

    let (tx, rx) = mpsc::channel(8);
    let period = alice.engine().driver().tick_duration();
    let task = tokio::spawn(async move {
        alice.run(IntervalScheduler::new(period), rx).await?;
        anyhow::Ok(alice)
    });

    tx.send(ClientCommand::Input(AxisInput::new(-1.0, 0.0))).await?;
    let forwarded = loop {
        match tokio::time::timeout(WAIT, watcher.recv()).await?? {
            NetMsg::Input(msg) => break msg,
            _ => continue,
        }
    };
    assert_eq!(forwarded.participant, pid("alice"));
    assert_eq!(forwarded.decode::<AxisInput>()?, AxisInput::new(-1.0, 0.0));

    tokio::time::sleep(Duration::from_millis(300)).await;
    tx.send(ClientCommand::Quit).await?;
    let alice = tokio::time::timeout(WAIT, task).await???;
    assert!(!alice.engine().is_running());
    assert!(alice.engine().latest().tick > TickId(0));

    relay.abort();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulated_lag_delays_published_input() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let relay = server.spawn();

    let lagged = EngineConfig {
        simulated_lag_ms: 150,
        ..client_cfg(&cfg, "alice")
    };
    let mut alice = GameClient::connect(&lagged, TopDown::default()).await?;
    let mut watcher = raw_peer(&cfg.server_addr, "watcher").await?;

    let sent = tokio::time::Instant::now();
    let tick = alice.submit_local_input(AxisInput::new(0.0, 1.0)).await?;
    // Applied locally right away.
    assert!(alice.engine().latest().input_of(&pid("alice")).is_some());

    let forwarded = loop {
        match tokio::time::timeout(WAIT, watcher.recv()).await?? {
            NetMsg::Input(msg) => break msg,
            _ => continue,
        }
    };
    assert!(sent.elapsed() >= Duration::from_millis(150));
    assert_eq!(forwarded.target_tick, tick);

    relay.abort();
    Ok(())
}
