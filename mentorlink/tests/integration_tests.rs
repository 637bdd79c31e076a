//! Integration tests for mentorlink
//!
//! The driver runs against a scripted transport on a paused clock, so every
//! timer (heartbeat, backoff, typing window) fires at an exact instant.

use mentorlink::{
    ChannelIdentity, ConnectionStatus, Credential, Error, FaultKind, GamificationKind, InMemoryMessageCache,
    LinkBuilder, LinkConfig, LinkHandle, MessageCache, NoCredential, OutboundFrame, PendingPolicy, ToastKind,
    TokenProvider, TransportEvent, DEFAULT_CONNECT_TIMEOUT,
};
use mentorlink_test_support::chaos::{stream_frames, ChaosMonkey};
use mentorlink_test_support::dispatch::RecordingDispatcher;
use mentorlink_test_support::loss::{DropDecision, LossGenerator};
use mentorlink_test_support::transport::ScriptedTransport;
use mentorlink_test_support::verify::{CacheVerifier, VerifyResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_test::{assert_err, assert_ok};

struct Harness {
    link: LinkHandle,
    transport: Arc<ScriptedTransport>,
    dispatcher: Arc<RecordingDispatcher>,
    cache: Arc<InMemoryMessageCache>,
}

fn harness_with(config: LinkConfig, credentials: Arc<dyn TokenProvider>, dispatcher: RecordingDispatcher) -> Harness {
    mentorlink_test_support::init_tracing();
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = Arc::new(dispatcher);
    let cache = Arc::new(InMemoryMessageCache::new());

    let link = LinkBuilder::with_credentials(credentials)
        .config(config)
        .cache(cache.clone())
        .dispatcher(dispatcher.clone())
        .transport(transport.clone())
        .spawn();

    Harness {
        link,
        transport,
        dispatcher,
        cache,
    }
}

fn harness() -> Harness {
    harness_with(
        LinkConfig::default(),
        Arc::new(Credential::new("secret")),
        RecordingDispatcher::new(),
    )
}

/// Let the driver drain everything already queued.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

async fn open(h: &mut Harness, channel: &ChannelIdentity) -> mentorlink::TransportId {
    let before = h.transport.open_count();
    h.link.select_channel(Some(channel.clone())).unwrap();
    let id = h.transport.wait_for_open(before + 1).await;
    h.transport.accept(id);
    assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Open).await);
    id
}

/// Test optimistic send confirmed by the server
#[tokio::test(start_paused = true)]
async fn test_send_is_confirmed_in_place() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let id = open(&mut h, &chan).await;
    assert_eq!(h.transport.url(1).as_str(), "wss://localhost:8000/ws/chat/c1/?token=secret");

    let sent = assert_ok!(h.link.send("Hello").await);
    assert!(sent.is_pending());

    let out = h.transport.outbound_json(id);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["type"], "streaming_message");
    assert_eq!(out[0]["content"], "Hello");
    assert_eq!(out[0]["temp_id"], sent.id.as_str());

    let verifier = CacheVerifier::new(chan.clone()).expect("Hello");
    assert_eq!(verifier.verify(h.cache.as_ref()), VerifyResult::Ok);
    assert_eq!(verifier.stats(h.cache.as_ref()).pending, 1);

    let confirm = json!({
        "type": "chat_message",
        "temp_id": sent.id,
        "message": {"id": "42", "sender": "user", "content": "Hello"},
    });
    h.transport.frame(id, &confirm.to_string());
    settle().await;

    let stats = verifier.stats(h.cache.as_ref());
    assert_eq!((stats.pages, stats.records, stats.confirmed, stats.pending), (1, 1, 1, 0));
    let pages = h.cache.snapshot(&chan).unwrap();
    assert_eq!(pages.pages[0][0].id, "42");
}

/// Test sending before the channel is acknowledged
#[tokio::test(start_paused = true)]
async fn test_send_rejected_while_connecting() {
    let h = harness();
    let chan = ChannelIdentity::conversation("c1");
    h.link.select_channel(Some(chan.clone())).unwrap();
    h.transport.wait_for_open(1).await;

    let err = assert_err!(h.link.send("too early").await);
    assert!(matches!(err, Error::NotConnected));
    assert!(h.cache.snapshot(&chan).is_none());
}

/// Test stream assembly with random chunk sizes and noise frames
#[tokio::test(start_paused = true)]
async fn test_stream_assembles_random_chunks() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let id = open(&mut h, &chan).await;

    let text = "Start with a budget: list income, fixed costs, then savings goals.";
    let mut monkey = ChaosMonkey::noisy();
    let chunks = monkey.split_chunks(text, 7);
    let mut frames = stream_frames("m1", &chunks);
    let complete = frames.pop().unwrap();

    for frame in monkey.perturb(frames) {
        h.transport.frame(id, &frame);
    }
    let snap = assert_ok!(h.link.wait_for(|s| s.streaming_text.as_deref() == Some(text)).await);
    assert!(snap.is_streaming);
    assert_eq!(snap.status, ConnectionStatus::Open);

    // A straggler from another generation is ignored.
    h.transport.frame(id, r#"{"type":"stream_chunk","message_id":"m0","content":"stale"}"#);
    h.transport.frame(id, &complete);
    h.transport.frame(id, &complete);
    assert_ok!(h.link.wait_for(|s| !s.is_streaming).await);

    // A chunk of the finished stream arriving late does not restart it.
    h.transport.frame(id, r#"{"type":"stream_chunk","message_id":"m1","content":"late"}"#);
    settle().await;
    let snap = h.link.snapshot();
    assert!(!snap.is_streaming);
    assert_eq!(snap.streaming_text, None);

    let verifier = CacheVerifier::new(chan).expect(text);
    assert_eq!(verifier.verify(h.cache.as_ref()), VerifyResult::Ok);
    assert_eq!(verifier.stats(h.cache.as_ref()).records, 1);
}

/// Test stream error discards the partial reply
#[tokio::test(start_paused = true)]
async fn test_stream_error_surfaces_without_cache_write() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let id = open(&mut h, &chan).await;

    h.transport.frame(id, r#"{"type":"stream_start","message_id":"m1"}"#);
    h.transport.frame(id, r#"{"type":"stream_chunk","message_id":"m1","content":"Par"}"#);
    h.transport.frame(id, r#"{"type":"stream_error","message_id":"m1","error":"model overloaded"}"#);

    let snap = assert_ok!(h.link.wait_for(|s| s.last_stream_error.is_some()).await);
    assert!(!snap.is_streaming);
    assert_eq!(snap.streaming_text, None);
    assert_eq!(snap.last_stream_error.as_deref(), Some("model overloaded"));
    assert_eq!(snap.status, ConnectionStatus::Open);
    assert!(h.cache.snapshot(&chan).is_none());
}

/// Test heartbeat: answered probes keep the channel, a lost reply forces a reconnect
#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_forces_reconnect() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let id = open(&mut h, &chan).await;
    let t0 = Instant::now();
    let mut loss = LossGenerator::from_probe(1);

    for probe in 0..2u64 {
        // Probes go out every 20s; look one second after each.
        sleep_until(t0 + Duration::from_secs(20 * (probe + 1) + 1)).await;
        let out = h.transport.outbound_json(id);
        assert_eq!(out.len(), 1, "probe {}", probe);
        assert_eq!(out[0]["type"], "ping");
        if loss.should_drop(probe) == DropDecision::Pass {
            h.transport.frame(id, r#"{"type":"pong"}"#);
        }
    }
    assert_eq!(loss.stats().dropped, 1);

    // Second probe went out at t0+40 and expired at t0+50; first retry 1s later.
    h.transport.wait_for_open(2).await;
    assert_eq!(Instant::now() - t0, Duration::from_secs(51));
    assert!(matches!(
        h.transport.outbound(id).as_slice(),
        [OutboundFrame::Close { code: 1000, .. }]
    ));

    let snap = h.link.snapshot();
    assert_eq!(snap.status, ConnectionStatus::Connecting);
    assert_eq!(snap.reconnect_attempt, 1);
}

/// Test heartbeat resumes on the replacement transport after a lost reply
#[tokio::test(start_paused = true)]
async fn test_heartbeat_resumes_after_reconnect() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let mut id = open(&mut h, &chan).await;
    let mut opened_at = Instant::now();
    let mut loss = LossGenerator::specific([2]);

    for probe in 0..5u64 {
        // Each ping goes out 20s after the previous one (or after the open).
        sleep_until(opened_at + Duration::from_secs(20 * (probe % 3 + 1) + 1)).await;
        let pings = h.transport.outbound_json(id);
        assert_eq!(pings.len(), 1, "probe {}", probe);

        if loss.should_drop(probe) == DropDecision::Drop {
            // Probe 2 went out at +60 and expired at +70; retry 1s later.
            id = h.transport.wait_for_open(2).await;
            assert_eq!(Instant::now() - opened_at, Duration::from_secs(71));
            h.transport.accept(id);
            assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Open).await);
            opened_at = Instant::now();
        } else {
            h.transport.frame(id, r#"{"type":"pong"}"#);
        }
    }

    sleep(Duration::from_secs(5)).await;
    assert_eq!(loss.stats().dropped, 1);
    assert_eq!(h.transport.open_count(), 2);
    assert_eq!(h.link.status(), ConnectionStatus::Open);
}

/// Test a handshake the server never acknowledges is dropped and retried
#[tokio::test(start_paused = true)]
async fn test_unacknowledged_connect_times_out() {
    let mut h = harness();
    let t0 = Instant::now();
    h.link.select_channel(Some(ChannelIdentity::conversation("c1"))).unwrap();
    let first = h.transport.wait_for_open(1).await;
    h.transport.emit(first, TransportEvent::Opened);

    let snap = assert_ok!(h.link.wait_for(|s| s.reconnect_attempt == 1).await);
    assert_eq!(Instant::now() - t0, DEFAULT_CONNECT_TIMEOUT);
    assert_eq!(snap.status, ConnectionStatus::Connecting);
    assert!(matches!(
        h.transport.outbound(first).as_slice(),
        [OutboundFrame::Close { code: 1000, .. }]
    ));

    let second = h.transport.wait_for_open(2).await;
    assert_eq!(Instant::now() - t0, DEFAULT_CONNECT_TIMEOUT + Duration::from_secs(1));
    h.transport.accept(second);
    let snap = assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Open).await);
    assert_eq!(snap.reconnect_attempt, 0);
}

/// Test capped exponential backoff across repeated abnormal closes
#[tokio::test(start_paused = true)]
async fn test_abnormal_close_backoff_sequence() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let mut id = open(&mut h, &chan).await;

    let expected = [1u64, 2, 4, 8, 16, 30, 30];
    for (i, delay) in expected.iter().enumerate() {
        let attempt = i as u32 + 1;
        h.transport.close(id, 1006);
        let snap = assert_ok!(h.link.wait_for(|s| s.reconnect_attempt == attempt).await);
        assert_eq!(snap.status, ConnectionStatus::Connecting);
        assert_eq!(snap.reconnect.unwrap().delay, Duration::from_secs(*delay));
        assert_eq!(snap.error.unwrap().kind, FaultKind::Transient);

        let closed_at = Instant::now();
        id = h.transport.wait_for_open(i + 2).await;
        assert_eq!(Instant::now() - closed_at, Duration::from_secs(*delay));
    }

    h.transport.accept(id);
    let snap = assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Open).await);
    assert_eq!(snap.reconnect_attempt, 0);
    assert_eq!(snap.reconnect, None);
    assert_eq!(snap.error, None);
}

/// Test forbidden close is terminal until a manual reconnect
#[tokio::test(start_paused = true)]
async fn test_forbidden_close_is_fatal() {
    let mut h = harness();
    let chan = ChannelIdentity::conversation("c1");
    let id = open(&mut h, &chan).await;

    h.transport.close(id, 4003);
    let snap = assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Error).await);
    let fault = snap.error.unwrap();
    assert_eq!(fault.kind, FaultKind::AccessRevoked { code: 4003 });
    assert!(fault.is_fatal());
    assert_eq!(snap.reconnect_attempt, 0);
    assert_eq!(snap.reconnect, None);

    sleep(Duration::from_secs(300)).await;
    assert_eq!(h.transport.open_count(), 1);

    h.link.reconnect().unwrap();
    let id = h.transport.wait_for_open(2).await;
    h.transport.accept(id);
    assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Open).await);
}

/// Test channel switch mid-stream drops every trace of the old channel
#[tokio::test(start_paused = true)]
async fn test_channel_switch_mid_stream() {
    let mut h = harness();
    let c1 = ChannelIdentity::conversation("c1");
    let c2 = ChannelIdentity::conversation("c2");
    let old = open(&mut h, &c1).await;

    h.transport.frame(old, r#"{"type":"stream_start","message_id":"m1"}"#);
    h.transport.frame(old, r#"{"type":"stream_chunk","message_id":"m1","content":"Hi"}"#);
    assert_ok!(h.link.wait_for(|s| s.is_streaming).await);

    h.link.select_channel(Some(c2.clone())).unwrap();
    let new = h.transport.wait_for_open(2).await;
    assert!(h.transport.url(2).as_str().contains("/ws/chat/c2/"));
    assert!(matches!(
        h.transport.outbound(old).as_slice(),
        [OutboundFrame::Close { code: 1000, .. }]
    ));

    for late in [
        r#"{"type":"stream_chunk","message_id":"m1","content":" there"}"#,
        r#"{"type":"connection_established"}"#,
        r#"{"type":"stream_complete","message_id":"m1","message":{"id":"m1","sender":"assistant","content":"Hi there"}}"#,
    ] {
        h.transport.frame(old, late);
    }
    h.transport.close(old, 1006);
    settle().await;

    let snap = h.link.snapshot();
    assert_eq!(snap.channel.as_ref(), Some(&c2));
    assert_eq!(snap.status, ConnectionStatus::Connecting);
    assert!(!snap.is_streaming);
    assert_eq!(snap.reconnect_attempt, 0);
    assert!(h.cache.snapshot(&c1).is_none());
    assert!(h.cache.snapshot(&c2).is_none());

    // Well past the first retry delay, inside the connect timeout.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.open_count(), 2);

    h.transport.accept(new);
    assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Open).await);
}

/// Test channel switch while a retry for the old channel is pending
#[tokio::test(start_paused = true)]
async fn test_channel_switch_cancels_pending_retry() {
    let mut h = harness();
    let c1 = ChannelIdentity::conversation("c1");
    let old = open(&mut h, &c1).await;

    h.transport.close(old, 1006);
    assert_ok!(h.link.wait_for(|s| s.reconnect_attempt == 1).await);

    h.link.select_channel(Some(ChannelIdentity::notifications())).unwrap();
    h.transport.wait_for_open(2).await;
    sleep(Duration::from_secs(5)).await;

    assert_eq!(h.transport.open_count(), 2);
    assert_eq!(h.transport.url(2).as_str(), "wss://localhost:8000/ws/notifications/?token=secret");
}

/// Test missing credential never opens a transport
#[tokio::test(start_paused = true)]
async fn test_missing_credential() {
    let mut h = harness_with(LinkConfig::default(), Arc::new(NoCredential), RecordingDispatcher::new());
    h.link.select_channel(Some(ChannelIdentity::conversation("c1"))).unwrap();

    let snap = assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Error).await);
    assert_eq!(snap.error.unwrap().kind, FaultKind::MissingCredential);
    assert_eq!(h.transport.open_count(), 0);
    assert!(matches!(h.link.send("hi").await, Err(Error::NotConnected)));
}

/// Test external stores, toasts and the gamification bus
#[tokio::test(start_paused = true)]
async fn test_events_reach_external_stores() {
    let mut h = harness();
    let mut celebrations = h.link.subscribe_gamification();
    let id = open(&mut h, &ChannelIdentity::notifications()).await;

    for frame in [
        r#"{"type":"plan_update","status":"building","message":"Collecting goals"}"#,
        r#"{"type":"agent_runtime","agent":"planner","step":"fetch_accounts","status":"done"}"#,
        r#"{"type":"insight_generated","id":"i1","title":"Dining spend up 20%","content":"..."}"#,
        r#"{"type":"missing_information","message":"What is your monthly rent?","fields":["rent"]}"#,
        r#"{"type":"gamification_update","kind":"badge_earned","title":"First budget"}"#,
        r#"{"type":"gamification_update","kind":"xp_gained","amount":10}"#,
    ] {
        h.transport.frame(id, frame);
    }
    settle().await;

    assert_eq!(h.dispatcher.plans.lock().len(), 1);
    assert!(h.dispatcher.plans.lock()[0].event_id.is_some());
    assert_eq!(h.dispatcher.runtime.lock().len(), 1);
    assert_eq!(h.dispatcher.insights.lock()[0].title, "Dining spend up 20%");
    assert_eq!(h.dispatcher.missing.lock()[0].fields, vec!["rent"]);

    let kinds: Vec<ToastKind> = h.dispatcher.toasts.lock().iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![ToastKind::Info, ToastKind::Warning, ToastKind::Celebration]);

    assert_eq!(celebrations.try_recv().unwrap().kind, GamificationKind::BadgeEarned);
    assert_eq!(celebrations.try_recv().unwrap().kind, GamificationKind::XpGained);
}

/// Test failing stores and junk frames never disturb the connection
#[tokio::test(start_paused = true)]
async fn test_per_frame_failures_are_isolated() {
    let mut h = harness_with(
        LinkConfig::default(),
        Arc::new(Credential::new("secret")),
        RecordingDispatcher::failing(),
    );
    let id = open(&mut h, &ChannelIdentity::conversation("c1")).await;

    for frame in [
        "not json",
        r#"{"no_type":true}"#,
        r#"{"type":"stream_chunk"}"#,
        r#"{"type":"mystery_event"}"#,
        r#"{"type":"insight_generated","title":"x"}"#,
        r#"{"type":"plan_update","status":"s","message":"m"}"#,
        r#"{"type":"agent_start","agent":"coach","reason":"motivation"}"#,
    ] {
        h.transport.frame(id, frame);
    }

    let snap = assert_ok!(h.link.wait_for(|s| s.active_agent.is_some()).await);
    assert_eq!(snap.status, ConnectionStatus::Open);
    assert_eq!(snap.active_agent.as_deref(), Some("coach"));
    assert!(h.dispatcher.toasts.lock().is_empty());
}

/// Test peer typing lapses after the silence window
#[tokio::test(start_paused = true)]
async fn test_peer_typing_lapses() {
    let mut h = harness();
    let id = open(&mut h, &ChannelIdentity::conversation("c1")).await;

    h.transport.frame(id, r#"{"type":"typing_status","is_typing":true}"#);
    assert_ok!(h.link.wait_for(|s| s.is_peer_typing).await);
    let since = Instant::now();

    assert_ok!(h.link.wait_for(|s| !s.is_peer_typing).await);
    assert_eq!(Instant::now() - since, Duration::from_secs(4));

    h.link.set_typing_status(true);
    settle().await;
    let out = h.transport.outbound_json(id);
    assert_eq!(out, vec![json!({"type": "typing_status", "is_typing": true})]);
}

/// Test unconfirmed sends are marked failed under the expiry policy
#[tokio::test(start_paused = true)]
async fn test_unconfirmed_send_marked_failed() {
    let config = LinkConfig::builder()
        .pending_policy(PendingPolicy::MarkFailedAfter(Duration::from_secs(5)))
        .build();
    let mut h = harness_with(config, Arc::new(Credential::new("secret")), RecordingDispatcher::new());
    let chan = ChannelIdentity::conversation("c1");
    open(&mut h, &chan).await;

    h.link.send("Anyone there?").await.unwrap();
    sleep(Duration::from_secs(6)).await;

    let stats = CacheVerifier::new(chan).expect("Anyone there?").stats(h.cache.as_ref());
    assert_eq!((stats.records, stats.pending, stats.failed), (1, 0, 1));
}

/// Test a send left unconfirmed by a channel switch still fails on its own channel
#[tokio::test(start_paused = true)]
async fn test_unconfirmed_send_fails_after_switch() {
    let config = LinkConfig::builder()
        .pending_policy(PendingPolicy::MarkFailedAfter(Duration::from_secs(5)))
        .build();
    let mut h = harness_with(config, Arc::new(Credential::new("secret")), RecordingDispatcher::new());
    let c1 = ChannelIdentity::conversation("c1");
    open(&mut h, &c1).await;

    h.link.send("Before switching").await.unwrap();
    h.link.select_channel(Some(ChannelIdentity::conversation("c2"))).unwrap();
    h.transport.wait_for_open(2).await;
    sleep(Duration::from_secs(6)).await;

    let stats = CacheVerifier::new(c1).expect("Before switching").stats(h.cache.as_ref());
    assert_eq!((stats.records, stats.pending, stats.failed), (1, 0, 1));
}

/// Test shutdown closes normally and stops the driver
#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_driver() {
    let mut h = harness();
    let id = open(&mut h, &ChannelIdentity::conversation("c1")).await;

    h.link.shutdown();
    assert_ok!(h.link.wait_for(|s| s.status == ConnectionStatus::Closed).await);
    settle().await;

    assert!(matches!(
        h.transport.outbound(id).as_slice(),
        [OutboundFrame::Close { code: 1000, .. }]
    ));
    assert!(matches!(h.link.send("late").await, Err(Error::DriverStopped)));
}
