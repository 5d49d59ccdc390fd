//! Session establishment and recovery driven through fake collaborators

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use avatar_session::avatar::SessionState;
use avatar_session::events::SessionEvent;
use avatar_session::webrtc::{
    IceConnectionState, MediaKind, RelayServerSet, SinkEvent, SinkState, TransportEvent,
};
use avatar_session::AppError;

use common::{drain_recovery, drain_states, settle, HangingFetcher, HarnessBuilder, SilentTrack};

use IceConnectionState::{Checking, Connected, Disconnected, Failed};

#[tokio::test(start_paused = true)]
async fn test_connect_reaches_connected() {
    let h = HarnessBuilder::new().build();
    let mut rx = h.events.subscribe();
    h.factory.script(&[Checking, Connected]);

    h.orchestrator.connect().await.unwrap();

    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(
        drain_states(&mut rx),
        vec![
            "acquiring_credential",
            "resolving_relay",
            "negotiating",
            "connected"
        ]
    );
    let link = h.factory.link(0);
    assert_eq!(link.offers.lock().as_slice(), &[false]);
    assert_eq!(link.lines.lock().len(), 2);
    assert_eq!(h.factory.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_authenticated_relay_keeps_fallbacks() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);

    h.orchestrator.connect().await.unwrap();

    let configs = h.factory.configs.lock();
    let servers = configs[0].relays.servers();
    assert_eq!(servers.len(), 3);
    assert!(servers[0].has_credentials());
    assert!(!servers[1].has_credentials());
    assert!(!servers[2].has_credentials());
}

#[tokio::test(start_paused = true)]
async fn test_relay_timeout_falls_back_and_negotiates() {
    let h = HarnessBuilder::new().fetcher(HangingFetcher).build();
    let mut rx = h.events.subscribe();
    h.factory.script(&[Connected]);

    h.orchestrator.connect().await.unwrap();

    assert!(drain_states(&mut rx).contains(&"negotiating".to_string()));
    assert_eq!(h.factory.configs.lock()[0].relays, RelayServerSet::fallback());
    assert!(h
        .orchestrator
        .diagnostics()
        .entries()
        .iter()
        .any(|line| line.contains("relay resolution degraded")));
}

#[tokio::test(start_paused = true)]
async fn test_transient_disconnect_heals_without_restart() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();
    let mut rx = h.events.subscribe();

    let link = h.factory.link(0);
    link.emit(Disconnected);
    settle(Duration::from_secs(3)).await;
    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    link.emit(Connected);
    settle(Duration::from_secs(30)).await;

    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(link.ice_restarts(), 0);
    assert_eq!(h.factory.created(), 1);
    assert_eq!(drain_recovery(&mut rx), vec!["grace_armed", "grace_cancelled"]);

    let diagnostics = h.orchestrator.diagnostics().entries();
    assert!(diagnostics
        .iter()
        .any(|line| line.contains("grace timer cancelled")));
    assert!(!diagnostics.iter().any(|line| line.contains("restarting ICE")));
}

#[tokio::test(start_paused = true)]
async fn test_prolonged_disconnect_restarts_ice() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();

    let link = h.factory.link(0);
    link.emit(Disconnected);
    settle(Duration::from_secs(11)).await;

    assert_eq!(link.ice_restarts(), 1);
    assert_eq!(h.orchestrator.state(), SessionState::Recovering);
    assert_eq!(h.factory.created(), 1);
    assert!(h.avatar.offers.lock().last().unwrap().ice_restart);

    link.emit(Connected);
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.orchestrator.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_transport_is_replaced() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();

    h.factory.link(0).emit(Failed);
    settle(Duration::from_millis(10)).await;
    assert_eq!(h.orchestrator.state(), SessionState::Recovering);
    assert_eq!(h.factory.created(), 1);

    settle(Duration::from_secs(2)).await;
    assert_eq!(h.factory.created(), 2);
    assert!(h.factory.link(0).is_closed());
    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(h.factory.live(), 1);
    assert_eq!(h.factory.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_three_failed_recoveries_close_session() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    for _ in 0..3 {
        h.factory.script(&[Failed]);
    }
    h.orchestrator.connect().await.unwrap();

    // this first failure only starts recovery; the budget is spent by the
    // three replacement links that fail after it
    h.factory.link(0).emit(Failed);
    settle(Duration::from_secs(30)).await;

    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.created(), 4);
    assert_eq!(h.factory.live(), 0);
    assert_eq!(h.factory.max_live(), 1);
    match h.orchestrator.take_error() {
        Some(AppError::NegotiationFailure { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected error {:?}", other),
    }

    settle(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_ice_restart_escalates_to_full_recovery() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();

    h.avatar.reject_offers.store(true, Ordering::SeqCst);
    h.factory.link(0).emit(Disconnected);
    settle(Duration::from_secs(11)).await;
    assert_eq!(h.factory.link(0).ice_restarts(), 1);
    assert!(h.factory.link(0).is_closed());

    settle(Duration::from_secs(30)).await;

    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.created(), 4);
    assert_eq!(h.factory.live(), 0);
    assert_eq!(h.factory.max_live(), 1);
    match h.orchestrator.take_error() {
        Some(AppError::NegotiationFailure { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(h
        .orchestrator
        .diagnostics()
        .entries()
        .iter()
        .any(|line| line.contains("ICE restart failed")));
}

#[tokio::test(start_paused = true)]
async fn test_transport_construction_failure_ends_recovery() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();

    h.factory.fail_creates.store(true, Ordering::SeqCst);
    h.factory.link(0).emit(Failed);
    settle(Duration::from_secs(3)).await;

    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert!(matches!(
        h.orchestrator.take_error(),
        Some(AppError::TransportConstruction(_))
    ));
    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.factory.live(), 0);

    // no further attempts once construction has failed
    settle(Duration::from_secs(30)).await;
    assert_eq!(h.factory.created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_track_is_bound_to_sink() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();
    let mut rx = h.events.subscribe();

    h.factory
        .link(0)
        .send(TransportEvent::Track(SilentTrack::new(MediaKind::Video, "video-1")));
    settle(Duration::from_millis(10)).await;

    let sink = h.orchestrator.video_sink();
    assert_eq!(sink.source_id().as_deref(), Some("video-1"));
    assert_eq!(sink.state(), SinkState::Attached);
    assert_eq!(h.orchestrator.audio_sink().source_id(), None);

    let mut bound = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::MediaBound { kind, track_id } = event {
            bound.push((kind, track_id));
        }
    }
    assert_eq!(bound, vec![("video".to_string(), "video-1".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_sink_error_keeps_session_connected() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();
    let mut rx = h.events.subscribe();

    h.factory.link(0).send(TransportEvent::Sink(
        MediaKind::Video,
        SinkEvent::Error("decoder rejected frame".into()),
    ));
    settle(Duration::from_secs(5)).await;

    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(h.factory.created(), 1);
    assert!(!h.factory.link(0).is_closed());
    assert!(h.orchestrator.take_error().is_none());

    let mut sink_errors = Vec::new();
    let mut codes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            SessionEvent::MediaSink {
                kind,
                status,
                error,
            } => sink_errors.push((kind, status, error)),
            SessionEvent::SessionError { code, .. } => codes.push(code),
            _ => {}
        }
    }
    assert_eq!(
        sink_errors,
        vec![(
            "video".to_string(),
            "error".to_string(),
            Some("decoder rejected frame".to_string())
        )]
    );
    assert_eq!(codes, vec!["media_binding"]);
    assert!(h
        .orchestrator
        .diagnostics()
        .entries()
        .iter()
        .any(|line| line.contains("error [media_binding]")));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_connects_keep_one_transport() {
    let h = HarnessBuilder::new().build();
    for _ in 0..3 {
        h.factory.script(&[Connected]);
    }
    h.orchestrator.connect().await.unwrap();

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.connect().await }
    });
    let second = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.connect().await }
    });
    let first = first.await.unwrap();
    let second = second.await.unwrap();

    assert!(first.is_ok() || second.is_ok());
    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(h.factory.live(), 1);
    assert_eq!(h.factory.max_live(), 1);

    h.orchestrator.disconnect().await;
    settle(Duration::from_secs(1)).await;
    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_connection_resets_retry_budget() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.factory.script(&[Failed]);
    h.factory.script(&[Connected]);
    h.factory.script(&[Failed]);
    h.factory.script(&[Failed]);
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();

    // two attempts, then healthy
    h.factory.link(0).emit(Failed);
    settle(Duration::from_secs(10)).await;
    assert_eq!(h.factory.created(), 3);
    assert_eq!(h.orchestrator.state(), SessionState::Connected);

    // three more would exceed the budget without the reset
    h.factory.latest().emit(Failed);
    settle(Duration::from_secs(10)).await;
    assert_eq!(h.factory.created(), 6);
    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(h.factory.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_interrupts_recovery() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.orchestrator.connect().await.unwrap();

    h.factory.link(0).emit(Failed);
    settle(Duration::from_millis(500)).await;
    assert_eq!(h.orchestrator.state(), SessionState::Recovering);

    h.orchestrator.disconnect().await;
    settle(Duration::from_secs(10)).await;

    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.created(), 1);
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_close() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);
    h.factory.script(&[Connected]);

    h.orchestrator.connect().await.unwrap();
    h.orchestrator.disconnect().await;
    h.orchestrator.connect().await.unwrap();

    assert_eq!(h.orchestrator.state(), SessionState::Connected);
    assert_eq!(h.factory.created(), 2);
    assert_eq!(h.factory.live(), 1);
    assert_eq!(h.factory.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_timeout_reports_snapshot() {
    let h = HarnessBuilder::new()
        .connection_timeout(Duration::from_secs(15))
        .build();
    h.factory.script(&[Checking]);

    let err = h.orchestrator.connect().await.unwrap_err();

    assert!(matches!(err, AppError::IceConnectionFailed { .. }));
    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_credential_failure_closes() {
    let h = HarnessBuilder::new().failing_credentials().build();

    let err = h.orchestrator.connect().await.unwrap_err();

    assert!(matches!(err, AppError::Credential(_)));
    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_offer_is_negotiation_failure() {
    let h = HarnessBuilder::new().build();
    h.avatar.reject_offers.store(true, Ordering::SeqCst);

    let err = h.orchestrator.connect().await.unwrap_err();

    assert!(matches!(err, AppError::NegotiationFailure { attempts: 0, .. }));
    assert_eq!(h.orchestrator.state(), SessionState::Closed);
    assert_eq!(h.factory.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_speak_requires_connection_and_text() {
    let h = HarnessBuilder::new().build();
    h.factory.script(&[Connected]);

    assert!(matches!(
        h.orchestrator.speak("hello").await,
        Err(AppError::InvalidState(_))
    ));

    h.orchestrator.connect().await.unwrap();
    assert!(matches!(
        h.orchestrator.speak("   ").await,
        Err(AppError::BadRequest(_))
    ));
    h.orchestrator.speak("  こんにちは ").await.unwrap();
    h.orchestrator.stop_speaking().await.unwrap();

    assert_eq!(h.avatar.spoken.lock().as_slice(), &["こんにちは".to_string()]);
    assert_eq!(h.avatar.stops.load(Ordering::SeqCst), 1);
}
