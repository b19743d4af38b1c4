mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use live_relay::session::{CloseReason, Negotiated, ProtocolSink, SessionController};
use live_relay::{MediaPacket, Result};

/// Counts how many sessions closed their sink
#[derive(Default)]
struct CountingSink {
    closes: Arc<std::sync::atomic::AtomicU64>,
}

#[async_trait::async_trait]
impl ProtocolSink for CountingSink {
    async fn write_packet(&mut self, _packet: &MediaPacket) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self, _reason: &CloseReason) {
        self.closes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_sessions_attach_and_detach_once() {
    const SESSIONS: usize = 64;

    let state = common::state().await;
    let codecs = state.registry.codecs_for("cam").await.unwrap();
    let closes = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let mut handles = Vec::new();
    for _ in 0..SESSIONS {
        let negotiated = live_relay::session::negotiate(
            "cam",
            &codecs,
            live_relay::session::Transport::ChunkedStream,
        );
        let sink = CountingSink {
            closes: Arc::clone(&closes),
        };
        let session = SessionController::attach(&state.registry, "cam", negotiated, sink)
            .await
            .unwrap()
            .liveness_window(Duration::from_millis(500));
        handles.push(tokio::spawn(session.run()));
    }

    common::wait_for_subscribers(&state, "cam", SESSIONS).await;

    for n in 0..10 {
        let delivered = state.registry.hub().publish("cam", &common::keyframe(n));
        assert_eq!(delivered, SESSIONS);
    }

    // No more keyframes: every session stalls out
    let outcomes = join_all(handles).await;
    for outcome in outcomes {
        let outcome = outcome.unwrap();
        assert!(matches!(outcome.reason, CloseReason::Stalled));
        assert_eq!(outcome.stats.forwarded, 10);
    }

    let stats = state.registry.hub().stats();
    assert_eq!(stats.attached, SESSIONS as u64);
    assert_eq!(stats.detached, SESSIONS as u64);
    assert_eq!(stats.outstanding(), 0);
    assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), SESSIONS as u64);
}

#[tokio::test]
async fn test_sessions_on_different_streams_are_isolated() {
    let state = common::state().await;
    state
        .registry
        .add_stream(
            "lobby",
            live_relay::StreamConfig::new("tcp://127.0.0.1:9001").on_demand(true),
        )
        .await;
    let codecs = state.registry.codecs_for("cam").await.unwrap();

    let attach = |stream: &'static str| {
        let state = state.clone();
        let codecs = codecs.clone();
        async move {
            let negotiated: Negotiated = live_relay::session::negotiate(
                stream,
                &codecs,
                live_relay::session::Transport::ChunkedStream,
            );
            SessionController::attach(&state.registry, stream, negotiated, CountingSink::default())
                .await
                .unwrap()
                .liveness_window(Duration::from_millis(500))
        }
    };

    let cam = tokio::spawn(attach("cam").await.run());
    let lobby = tokio::spawn(attach("lobby").await.run());
    common::wait_for_subscribers(&state, "cam", 1).await;
    common::wait_for_subscribers(&state, "lobby", 1).await;

    for n in 0..3 {
        assert_eq!(state.registry.hub().publish("cam", &common::keyframe(n)), 1);
    }

    let cam = cam.await.unwrap();
    let lobby = lobby.await.unwrap();
    assert_eq!(cam.stats.forwarded, 3);
    assert_eq!(lobby.stats.forwarded, 0);
}
