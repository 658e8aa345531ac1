//! Reconnection, offline buffering and ack lifecycle integration tests.

mod common;

use std::time::Duration;

use common::{
    next_event, record, test_config, wait_event, wait_for, ConnectOutcome, TransportProbe,
};
use sio_client::{
    AckError, BufferPolicy, ClientConfig, ConstantBackoff, ExponentialBackoff, Frame, Manager,
    ManagerStatus, SioError, SocketOptions, SocketStatus, Value,
};

const URL: &str = "http://localhost:3000";

// ---- Reconnection policy ----

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_configured_attempts() {
    let probe = TransportProbe::new();
    probe.script([
        ConnectOutcome::Open,
        ConnectOutcome::Fail("refused".into()),
        ConnectOutcome::Fail("refused".into()),
        ConnectOutcome::Fail("refused".into()),
    ]);
    let config = ClientConfig {
        reconnection_attempts: Some(3),
        ..test_config()
    };
    let backoff = ExponentialBackoff::new(
        Duration::from_millis(100),
        Duration::from_secs(10),
        0.0,
    );
    let manager = Manager::with_backoff(URL, config, probe.transport(), Box::new(backoff)).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(
        &socket,
        &[
            "connect",
            "disconnect",
            "reconnect_attempt",
            "reconnect_error",
            "reconnect_failed",
        ],
    );
    wait_event(&mut log, "connect").await;

    let closed_at = tokio::time::Instant::now();
    probe.server_close("transport close");

    assert_eq!(
        next_event(&mut log).await,
        ("disconnect".to_string(), vec![Value::from("transport close")])
    );
    for attempt in 1..=3u32 {
        assert_eq!(
            next_event(&mut log).await,
            ("reconnect_attempt".to_string(), vec![Value::from(attempt)])
        );
        assert_eq!(
            next_event(&mut log).await,
            ("reconnect_error".to_string(), vec![Value::from("refused")])
        );
    }
    assert_eq!(next_event(&mut log).await.0, "reconnect_failed");

    // Exactly three reconnect attempts after the initial connection.
    assert_eq!(probe.connect_count(), 4);
    let times = probe.connect_times();
    let gaps = [
        times[1] - closed_at,
        times[2] - times[1],
        times[3] - times[2],
    ];
    assert!(gaps[0] >= Duration::from_millis(100) && gaps[0] < Duration::from_millis(150));
    assert!(gaps[0] < gaps[1] && gaps[1] < gaps[2], "gaps not increasing: {gaps:?}");

    wait_for(|| manager.status() == ManagerStatus::Disconnected).await;
    assert_eq!(socket.status(), SocketStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(probe.connect_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn reconnect_rejoins_namespaces() {
    let probe = TransportProbe::new();
    let manager = Manager::with_backoff(
        URL,
        test_config(),
        probe.transport(),
        Box::new(ConstantBackoff(Duration::from_millis(50))),
    )
    .unwrap();
    let root = manager.socket("/", SocketOptions::default());
    let chat = manager.socket("/chat", SocketOptions::default());
    let mut log = record(
        &chat,
        &["connect", "disconnect", "reconnect_attempt", "reconnect"],
    );
    let mut root_log = record(&root, &["connect"]);
    wait_event(&mut log, "connect").await;
    wait_event(&mut root_log, "connect").await;
    let first_id = chat.id();

    probe.server_close("transport close");

    assert_eq!(next_event(&mut log).await.0, "disconnect");
    assert_eq!(chat.status(), SocketStatus::Connecting);
    wait_for(|| manager.status() == ManagerStatus::Reconnecting).await;
    assert_eq!(
        next_event(&mut log).await,
        ("reconnect_attempt".to_string(), vec![Value::from(1u32)])
    );
    assert_eq!(
        next_event(&mut log).await,
        ("reconnect".to_string(), vec![Value::from(1u32)])
    );
    assert_eq!(next_event(&mut log).await.0, "connect");
    wait_event(&mut root_log, "connect").await;

    assert!(chat.connected());
    assert!(root.connected());
    assert_ne!(chat.id(), first_id);
    assert_eq!(manager.status(), ManagerStatus::Connected);
    assert_eq!(probe.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_fires_error_then_disconnect() {
    let probe = TransportProbe::new();
    let config = ClientConfig {
        reconnection: false,
        ..test_config()
    };
    let manager = Manager::new(URL, config, probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "error", "disconnect"]);
    wait_event(&mut log, "connect").await;

    probe.server_error("connection reset");

    assert_eq!(
        next_event(&mut log).await,
        ("error".to_string(), vec![Value::from("connection reset")])
    );
    assert_eq!(
        next_event(&mut log).await,
        ("disconnect".to_string(), vec![Value::from("transport error")])
    );
    wait_for(|| manager.status() == ManagerStatus::Disconnected).await;
    assert_eq!(socket.status(), SocketStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn close_cancels_pending_reconnect() {
    let probe = TransportProbe::new();
    let manager = Manager::with_backoff(
        URL,
        test_config(),
        probe.transport(),
        Box::new(ConstantBackoff(Duration::from_secs(5))),
    )
    .unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "disconnect", "reconnect_attempt"]);
    wait_event(&mut log, "connect").await;

    probe.server_close("transport close");
    wait_event(&mut log, "disconnect").await;
    wait_for(|| manager.status() == ManagerStatus::Reconnecting).await;

    manager.close().unwrap();
    wait_for(|| manager.status() == ManagerStatus::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.connect_count(), 1);
    assert!(log.try_recv().is_err());
    assert_eq!(socket.status(), SocketStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stale_transport_events_are_ignored() {
    let probe = TransportProbe::new();
    let manager = Manager::with_backoff(
        URL,
        test_config(),
        probe.transport(),
        Box::new(ConstantBackoff(Duration::from_millis(10))),
    )
    .unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "message"]);
    wait_event(&mut log, "connect").await;
    let old_sink = probe.current_sink().unwrap();

    probe.server_close("transport close");
    wait_event(&mut log, "connect").await;

    old_sink.frame(Frame::event("/", "message", vec![Value::from("stale")], None));
    old_sink.close("transport close");
    probe.server_frame(Frame::event("/", "message", vec![Value::from("fresh")], None));

    assert_eq!(
        next_event(&mut log).await,
        ("message".to_string(), vec![Value::from("fresh")])
    );
    assert!(socket.connected());
    assert_eq!(manager.status(), ManagerStatus::Connected);
}

// ---- Offline emits ----

#[tokio::test(start_paused = true)]
async fn buffered_emits_replay_before_new_ones() {
    let probe = TransportProbe::new();
    let manager = Manager::with_backoff(
        URL,
        test_config(),
        probe.transport(),
        Box::new(ConstantBackoff(Duration::from_millis(100))),
    )
    .unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "disconnect"]);
    wait_event(&mut log, "connect").await;

    probe.server_close("transport close");
    wait_event(&mut log, "disconnect").await;

    socket.emit("a", vec![Value::from(1)]).unwrap();
    socket.emit("b", vec![Value::from(2)]).unwrap();

    wait_event(&mut log, "connect").await;
    socket.emit("c", vec![Value::from(3)]).unwrap();
    wait_for(|| probe.sent_events("/").len() == 3).await;

    assert_eq!(probe.sent_events("/"), vec!["a", "b", "c"]);

    // The replay follows the namespace re-join.
    let sent = probe.sent();
    let rejoin = sent
        .iter()
        .rposition(|f| *f == Frame::connect("/", None))
        .unwrap();
    let first_replayed = sent
        .iter()
        .position(|f| f.event_name() == Some("a"))
        .unwrap();
    assert!(rejoin < first_replayed);
}

#[tokio::test(start_paused = true)]
async fn buffer_cap_evicts_oldest_emit() {
    let probe = TransportProbe::new();
    let config = ClientConfig {
        buffer: BufferPolicy::BufferUntilReconnect { cap: 2 },
        ..test_config()
    };
    let manager = Manager::with_backoff(
        URL,
        config,
        probe.transport(),
        Box::new(ConstantBackoff(Duration::from_millis(100))),
    )
    .unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "disconnect"]);
    wait_event(&mut log, "connect").await;

    probe.server_close("transport close");
    wait_event(&mut log, "disconnect").await;

    let evicted = socket.emit_with_ack("a", vec![]).unwrap();
    socket.emit("b", vec![]).unwrap();
    socket.emit("c", vec![]).unwrap();

    assert_eq!(evicted.await, Err(AckError::Dropped));

    wait_event(&mut log, "connect").await;
    wait_for(|| probe.sent_events("/").len() == 2).await;
    assert_eq!(probe.sent_events("/"), vec!["b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn drop_policy_fails_offline_emits_immediately() {
    let probe = TransportProbe::new();
    let config = ClientConfig {
        buffer: BufferPolicy::DropWhenDisconnected,
        auto_connect: false,
        ..test_config()
    };
    let manager = Manager::new(URL, config, probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());

    let handle = socket.emit_with_ack("hello", vec![]).unwrap();
    assert_eq!(handle.await, Err(AckError::NotConnected));
    assert!(matches!(
        socket.emit("hello", vec![]),
        Err(SioError::NotConnected)
    ));
    assert_eq!(socket.pending_acks(), 0);

    common::settle().await;
    assert!(probe.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn drop_policy_reports_emits_lost_to_a_closing_transport() {
    let probe = TransportProbe::new();
    let config = ClientConfig {
        buffer: BufferPolicy::DropWhenDisconnected,
        reconnection: false,
        ..test_config()
    };
    let manager = Manager::new(URL, config, probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "disconnect", "error"]);
    wait_event(&mut log, "connect").await;

    probe.server_close("transport close");
    assert!(socket.connected());
    assert!(socket.emit("lost", vec![]).is_ok());

    assert_eq!(next_event(&mut log).await.0, "disconnect");
    assert_eq!(
        next_event(&mut log).await,
        (
            "error".to_string(),
            vec![Value::from("emit 'lost' dropped: not connected")]
        )
    );
    assert!(probe.sent_events("/").is_empty());
    wait_for(|| manager.status() == ManagerStatus::Disconnected).await;
}

#[tokio::test(start_paused = true)]
async fn close_discards_buffered_emits() {
    let probe = TransportProbe::new();
    probe.script([ConnectOutcome::Hang]);
    let manager = Manager::new(URL, test_config(), probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());

    let handle = socket.emit_with_ack("queued", vec![]).unwrap();
    wait_for(|| probe.connect_count() == 1).await;
    common::settle().await;

    manager.close().unwrap();
    assert_eq!(handle.await, Err(AckError::Dropped));
    assert!(probe.sent_events("/").is_empty());
}

// ---- Acks ----

#[tokio::test(start_paused = true)]
async fn ack_resolves_with_server_reply() {
    let probe = TransportProbe::new();
    let manager = Manager::new(URL, test_config(), probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect"]);
    wait_event(&mut log, "connect").await;

    let handle = socket.emit_with_ack("ask", vec![Value::from("q")]).unwrap();
    let id = handle.id();
    wait_for(|| probe.sent_events("/") == vec!["ask"]).await;

    probe.server_frame(Frame::ack("/", id, vec![Value::from("answer")]));
    assert_eq!(handle.await, Ok(vec![Value::from("answer")]));

    // A second reply for the same id is ignored.
    probe.server_frame(Frame::ack("/", id, vec![Value::from("late")]));
    common::settle().await;
    assert_eq!(socket.pending_acks(), 0);
}

#[tokio::test(start_paused = true)]
async fn ack_times_out_without_reply() {
    let probe = TransportProbe::new();
    let manager = Manager::new(URL, test_config(), probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect"]);
    wait_event(&mut log, "connect").await;

    let start = tokio::time::Instant::now();
    let handle = socket
        .emit_with_ack_timeout("ask", vec![], Some(Duration::from_secs(2)))
        .unwrap();

    assert_eq!(handle.await, Err(AckError::Timeout));
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(socket.pending_acks(), 0);
}

#[tokio::test(start_paused = true)]
async fn configured_ack_timeout_applies_by_default() {
    let probe = TransportProbe::new();
    let config = ClientConfig {
        ack_timeout_ms: Some(250),
        ..test_config()
    };
    let manager = Manager::new(URL, config, probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect"]);
    wait_event(&mut log, "connect").await;

    let handle = socket.emit_with_ack("ask", vec![]).unwrap();
    assert_eq!(handle.await, Err(AckError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn disconnect_expires_acks_before_listener_runs() {
    let probe = TransportProbe::new();
    let config = ClientConfig {
        reconnection: false,
        ..test_config()
    };
    let manager = Manager::new(URL, config, probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect"]);
    wait_event(&mut log, "connect").await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let observed = socket.clone();
    socket.on("disconnect", move |event| {
        let reason = event.arg(0).and_then(Value::as_str).unwrap_or_default().to_string();
        let _ = tx.send((reason, observed.pending_acks()));
        Ok(())
    });

    let handle = socket.emit_with_ack("ask", vec![]).unwrap();
    wait_for(|| probe.sent_events("/") == vec!["ask"]).await;

    probe.server_close("transport close");

    assert_eq!(rx.recv().await, Some(("transport close".to_string(), 0)));
    assert_eq!(
        handle.await,
        Err(AckError::Disconnected("transport close".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn client_disconnect_expires_acks() {
    let probe = TransportProbe::new();
    let manager = Manager::new(URL, test_config(), probe.transport()).unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect"]);
    wait_event(&mut log, "connect").await;

    let first = socket.emit_with_ack("one", vec![]).unwrap();
    let second = socket.emit_with_ack("two", vec![]).unwrap();
    socket.disconnect().unwrap();

    let reason = AckError::Disconnected("io client disconnect".into());
    assert_eq!(first.await, Err(reason.clone()));
    assert_eq!(second.await, Err(reason));
}

#[tokio::test(start_paused = true)]
async fn emit_racing_transport_loss_is_never_sent() {
    let probe = TransportProbe::new();
    let manager = Manager::with_backoff(
        URL,
        test_config(),
        probe.transport(),
        Box::new(ConstantBackoff(Duration::from_millis(50))),
    )
    .unwrap();
    let socket = manager.socket("/", SocketOptions::default());
    let mut log = record(&socket, &["connect", "disconnect"]);
    wait_event(&mut log, "connect").await;

    probe.server_close("transport close");
    assert!(socket.connected(), "the close is still queued");
    let handle = socket.emit_with_ack("x", vec![]).unwrap();

    assert_eq!(
        handle.await,
        Err(AckError::Disconnected("transport close".into()))
    );
    wait_event(&mut log, "disconnect").await;
    wait_event(&mut log, "connect").await;
    common::settle().await;

    assert_eq!(probe.connect_count(), 2);
    assert!(probe.sent_events("/").is_empty());
    assert_eq!(socket.pending_acks(), 0);
}
