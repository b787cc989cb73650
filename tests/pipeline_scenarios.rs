//! End-to-end scenarios for the per-call streaming engine.
//!
//! All scenarios run at 20ms frames: 8kHz companded toward the carrier,
//! 16kHz PCM from the upstream. Component-level scenarios drive the
//! sequencer/buffer/controller chain on a mock clock; pipeline-level
//! scenarios run the orchestrator against a scripted upstream transport.

use callbridge::audio::frame::FrameFlags;
use callbridge::clock::MockClock;
use callbridge::config::{JitterConfig, PipelineConfig};
use callbridge::pipeline::event::PipelineEvent;
use callbridge::pipeline::jitter_buffer::JitterBuffer;
use callbridge::pipeline::playback::PlaybackController;
use callbridge::pipeline::sequencer::{FrameClass, Sequencer};
use callbridge::pipeline::orchestrator::Pipeline;
use callbridge::session::{CallDirection, CallSession, CallStatus};
use callbridge::upstream::mock::MockTransport;
use callbridge::upstream::transport::WireFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const FRAME_SAMPLES: u32 = 320; // 20ms at 16kHz
const FRAME_BYTES: usize = 640;

/// Route pipeline logs through the test harness; `RUST_LOG=debug` to see
/// reconnect and overflow diagnostics.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wide_payload(fill: u8) -> Vec<u8> {
    vec![fill; FRAME_BYTES]
}

async fn next_event(events: &mut mpsc::Receiver<PipelineEvent>) -> PipelineEvent {
    timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("timed out waiting for pipeline event")
        .expect("pipeline event channel closed")
}

async fn next_audio(events: &mut mpsc::Receiver<PipelineEvent>) -> Vec<u8> {
    loop {
        if let PipelineEvent::Audio(bytes) = next_event(events).await {
            return bytes;
        }
    }
}

async fn wait_for_connected(events: &mut mpsc::Receiver<PipelineEvent>) {
    loop {
        if let PipelineEvent::Connected { .. } = next_event(events).await {
            return;
        }
    }
}

/// Scenario 1: steady state, no jitter. 500 frames at exactly 20ms spacing
/// drain to 500 egress frames with no underruns, no overruns, unit rate, and
/// near-zero measured jitter.
#[test]
fn steady_state_without_jitter() {
    let clock = Arc::new(MockClock::new());
    let mut sequencer = Sequencer::with_clock(clock.clone());
    let mut buffer = JitterBuffer::with_clock(
        JitterConfig {
            min_ms: 40,
            max_ms: 200,
            target_ms: 60,
        },
        clock.clone(),
    );
    let mut controller = PlaybackController::new(Default::default());
    controller.start();

    let mut emitted: Vec<u64> = Vec::new();
    let mut draining = false;

    for _ in 0..500 {
        clock.advance(Duration::from_millis(20));
        let frame = sequencer.create(wide_payload(0x10), FRAME_SAMPLES, FrameFlags::continuation());
        assert_eq!(sequencer.process(&frame).class, FrameClass::Normal);
        buffer.enqueue(frame);
        controller.update_buffer_level(buffer.fill_level());

        if !draining && buffer.is_ready() {
            draining = true;
        }
        if draining {
            // One playback tick per arrival interval.
            if let Some(frame) = buffer.dequeue() {
                emitted.push(frame.sequence);
            }
            controller.update_buffer_level(buffer.fill_level());
        }
    }
    // The call ended; drain what remains buffered.
    while !buffer.is_empty() {
        if let Some(frame) = buffer.dequeue() {
            emitted.push(frame.sequence);
        }
    }

    assert_eq!(emitted.len(), 500);
    for pair in emitted.windows(2) {
        assert!(pair[0] < pair[1], "egress out of order: {pair:?}");
    }

    let stats = buffer.stats();
    assert_eq!(stats.underruns, 0);
    assert_eq!(stats.overruns, 0);
    assert!(stats.jitter_ms < 0.001, "jitter {} not ~0", stats.jitter_ms);
    assert!((stats.mean_gap_ms - 20.0).abs() < 0.001);
    assert!((controller.current_rate() - 1.0).abs() < 1e-9);
}

/// Scenario 2: moderate jitter. Inter-arrival times spread across [10,30]ms
/// adapt the target depth to at least 60ms with no gaps and at most two
/// underruns over the first 50 frames.
#[test]
fn moderate_jitter_adapts_target_depth() {
    // Zero-mean spread within [10,30]ms; bounded partial sums keep the
    // scenario deterministic.
    const GAPS_MS: [u64; 10] = [10, 30, 15, 25, 20, 12, 28, 17, 23, 20];

    let clock = Arc::new(MockClock::new());
    let mut sequencer = Sequencer::with_clock(clock.clone());
    let mut buffer = JitterBuffer::with_clock(
        JitterConfig {
            min_ms: 50,
            max_ms: 200,
            target_ms: 60,
        },
        clock.clone(),
    );
    let mut controller = PlaybackController::new(Default::default());
    controller.start();

    let mut emitted = 0usize;
    let mut draining = false;
    let mut underruns_at_50 = None;

    for i in 0..500 {
        clock.advance(Duration::from_millis(GAPS_MS[i % GAPS_MS.len()]));
        let frame = sequencer.create(wide_payload(0x10), FRAME_SAMPLES, FrameFlags::continuation());
        assert_ne!(sequencer.process(&frame).class, FrameClass::Gap);
        buffer.enqueue(frame);
        controller.update_buffer_level(buffer.fill_level());

        if !draining && buffer.is_ready() {
            draining = true;
        }
        if draining && buffer.dequeue().is_some() {
            emitted += 1;
        }
        controller.update_buffer_level(buffer.fill_level());

        if i == 49 {
            underruns_at_50 = Some(buffer.stats().underruns);
        }
    }

    let stats = buffer.stats();
    assert_eq!(sequencer.stats().gaps, 0);
    assert!(
        stats.target_ms >= 60,
        "target {}ms did not adapt up",
        stats.target_ms
    );
    assert!(stats.target_ms <= 200);
    assert!(
        underruns_at_50.unwrap() <= 2,
        "too many early underruns: {}",
        underruns_at_50.unwrap()
    );
    assert!(emitted > 450);
}

/// Scenario 3: packet reordering. Frames delivered 1,2,4,3,5,6 produce
/// exactly one out-of-order report and drain strictly in sequence order.
#[test]
fn packet_reordering_is_restored() {
    let clock = Arc::new(MockClock::new());
    let mut sequencer = Sequencer::with_clock(clock.clone());
    let mut buffer = JitterBuffer::with_clock(
        JitterConfig {
            min_ms: 40,
            max_ms: 200,
            target_ms: 60,
        },
        clock.clone(),
    );

    let stamped: Vec<_> = (0..6)
        .map(|_| sequencer.create(wide_payload(0x22), FRAME_SAMPLES, FrameFlags::continuation()))
        .collect();

    // Delivery order 1,2,4,3,5,6 (as sequences 0,1,3,2,4,5).
    for index in [0usize, 1, 3, 2, 4, 5] {
        let frame = stamped[index].clone();
        sequencer.process(&frame);
        buffer.enqueue(frame);
        clock.advance(Duration::from_millis(20));
    }

    assert_eq!(sequencer.stats().out_of_order, 1);

    let mut sequences = Vec::new();
    while !buffer.is_empty() {
        if let Some(frame) = buffer.dequeue() {
            sequences.push(frame.sequence);
        }
    }
    assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
}

/// Scenario 4: gap plus concealment. Omitting sequences 100..=102 from a
/// 300-frame stream reports the three missing sequences exactly once and
/// emits 60ms of fade-to-silence spanning the hole; later frames resume at
/// the plain frame size.
#[tokio::test(start_paused = true)]
async fn gap_is_concealed_and_stream_resumes() {
    init_tracing();
    let transport = MockTransport::new();
    let (handle, mut events) = Pipeline::new(PipelineConfig::default(), "scenario-4")
        .with_transport(Arc::new(transport.clone()))
        .start()
        .unwrap();
    wait_for_connected(&mut events).await;

    let sequences: Vec<u64> = (0..100).chain(103..300).collect();
    let stamped = |sequence: u64| callbridge::audio::frame::SequencedFrame {
        sequence,
        timestamp_us: sequence * 20_000,
        duration_samples: FRAME_SAMPLES,
        flags: FrameFlags::continuation(),
        payload: wide_payload(0x10),
    };

    // Prime with a few frames, then keep arrivals paced with departures so
    // the buffer neither starves nor overflows.
    let mut next = 0usize;
    for _ in 0..4 {
        handle.push_egress_frame(stamped(sequences[next])).unwrap();
        next += 1;
    }

    let mut lengths = Vec::new();
    while lengths.len() < 290 {
        if next < sequences.len() {
            handle.push_egress_frame(stamped(sequences[next])).unwrap();
            next += 1;
        }
        lengths.push(next_audio(&mut events).await.len());
    }

    let long_frames: Vec<usize> = lengths.iter().copied().filter(|&len| len > 400).collect();
    assert_eq!(
        long_frames.len(),
        1,
        "expected exactly one concealment span, got {long_frames:?}"
    );
    // 60ms concealment crossfaded into a 20ms frame, companded: 480 bytes.
    assert_eq!(long_frames[0], 480);

    // Everything around the hole is plain 20ms narrow-band frames.
    assert!(lengths.iter().filter(|&&len| len == 160).count() >= 288);

    let stats = handle.stats();
    assert_eq!(stats.sequencer.gaps, 1);
    assert_eq!(stats.sequencer.lost, 3);
    assert_eq!(stats.jitter.lost, 3);
    handle.stop();
}

/// Scenario 5: upstream disconnect mid-call. The pipeline keeps running,
/// egress falls back to concealment silence, the client reconnects after
/// backoff, and the call session stays in-progress throughout.
#[tokio::test(start_paused = true)]
async fn upstream_disconnect_does_not_kill_the_call() {
    init_tracing();
    let transport = MockTransport::new();
    let session = CallSession::new(
        PipelineConfig::default(),
        "scenario-5",
        CallDirection::Inbound,
    )
    .unwrap()
    .with_transport(Arc::new(transport.clone()));

    let mut events = session.answer().unwrap();
    wait_for_connected(&mut events).await;
    let server = transport.take_server().unwrap();

    // Feed audio, then drop the connection abnormally.
    for _ in 0..6 {
        server
            .to_client
            .send(WireFrame::Binary(wide_payload(0x20)))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        let frame = next_audio(&mut events).await;
        assert_eq!(frame.len(), 160);
    }

    server
        .to_client
        .send(WireFrame::Close {
            code: 1006,
            reason: "carrier-grade hiccup".to_string(),
        })
        .await
        .unwrap();

    loop {
        match next_event(&mut events).await {
            PipelineEvent::Disconnected { code, .. } => {
                assert_eq!(code, 1006);
                break;
            }
            PipelineEvent::Audio(_) => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(session.status(), CallStatus::InProgress);

    // Buffered frames drain, then egress turns into concealment silence
    // rather than stopping.
    let mut post_drop_frames = 0;
    loop {
        match next_event(&mut events).await {
            PipelineEvent::Audio(frame) => {
                assert_eq!(frame.len(), 160);
                post_drop_frames += 1;
                if post_drop_frames >= 6 {
                    break;
                }
            }
            PipelineEvent::Connected { .. } => break,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // Reconnect (1s backoff under paused time) restores audio.
    let mut reconnected = false;
    for _ in 0..100 {
        match next_event(&mut events).await {
            PipelineEvent::Connected { .. } => {
                reconnected = true;
                break;
            }
            PipelineEvent::Audio(_) => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(reconnected, "upstream never reconnected");

    let server = transport.take_server().unwrap();
    for _ in 0..6 {
        server
            .to_client
            .send(WireFrame::Binary(wide_payload(0x30)))
            .await
            .unwrap();
    }
    let frame = next_audio(&mut events).await;
    assert_eq!(frame.len(), 160);

    assert_eq!(session.status(), CallStatus::InProgress);
    session.teardown(None);
    assert_eq!(session.status(), CallStatus::Completed);
}

/// Scenario 6: breathing at sentence end. A 20-word sentence ending with a
/// period splices exactly one normal breathing burst (100..=300ms) into the
/// egress shortly after.
#[tokio::test(start_paused = true)]
async fn breathing_burst_after_sentence_end() {
    let transport = MockTransport::new();
    let (handle, mut events) = Pipeline::new(PipelineConfig::default(), "scenario-6")
        .with_transport(Arc::new(transport.clone()))
        .start()
        .unwrap();
    wait_for_connected(&mut events).await;
    let server = transport.take_server().unwrap();

    let sentence = "alpha beta gamma delta epsilon zeta eta theta iota kappa \
                    lambda mu nu xi omicron pi rho sigma tau upsilon.";
    server
        .to_client
        .send(WireFrame::Text(format!(
            r#"{{"type": "transcript", "text": "{sentence}"}}"#
        )))
        .await
        .unwrap();
    loop {
        if let PipelineEvent::Transcript(_) = next_event(&mut events).await {
            break;
        }
    }

    for _ in 0..8 {
        server
            .to_client
            .send(WireFrame::Binary(wide_payload(0x10)))
            .await
            .unwrap();
    }

    let mut burst_narrow_bytes = None;
    for _ in 0..8 {
        let frame = next_audio(&mut events).await;
        if frame.len() > 160 {
            burst_narrow_bytes = Some(frame.len() - 160);
            break;
        }
    }

    // The burst rides on one 20ms frame; its own length compands to
    // narrow-band bytes at 8 bytes per millisecond.
    let burst_ms = burst_narrow_bytes.expect("no breathing burst spliced") / 8;
    assert!(
        (100..=300).contains(&burst_ms),
        "burst duration {burst_ms}ms outside [100, 300]"
    );

    // Exactly one burst: the following frames are plain again.
    for _ in 0..3 {
        let frame = next_audio(&mut events).await;
        assert_eq!(frame.len(), 160);
    }
    handle.stop();
}

/// A frame stale enough to have aged out of the sequencer's seen-set, and
/// arriving after higher sequences have already played, is dropped rather
/// than re-slotted: egress never goes backward and no spurious concealment
/// span follows it.
#[tokio::test(start_paused = true)]
async fn stale_frame_behind_playout_is_dropped() {
    let transport = MockTransport::new();
    let (handle, mut events) = Pipeline::new(PipelineConfig::default(), "stale-frame")
        .with_transport(Arc::new(transport.clone()))
        .start()
        .unwrap();
    wait_for_connected(&mut events).await;

    let stamped = |sequence: u64| callbridge::audio::frame::SequencedFrame {
        sequence,
        timestamp_us: sequence * 20_000,
        duration_samples: FRAME_SAMPLES,
        flags: FrameFlags::continuation(),
        payload: wide_payload(0x10),
    };

    // Prime, then push far enough that the seen-set window (1000) slides
    // past the low sequences, pacing arrivals with departures.
    for sequence in 0..4u64 {
        handle.push_egress_frame(stamped(sequence)).unwrap();
    }
    let mut next = 4u64;
    while next < 1104 {
        handle.push_egress_frame(stamped(next)).unwrap();
        next += 1;
        assert_eq!(next_audio(&mut events).await.len(), 160);
    }

    // Sequence 50 is below the pruned window, so it classifies as
    // out-of-order, not duplicate; the buffer must refuse to re-slot it
    // behind audio the carrier has already heard.
    handle.push_egress_frame(stamped(50)).unwrap();

    for sequence in 1104..1110u64 {
        handle.push_egress_frame(stamped(sequence)).unwrap();
        // A replayed stale frame would make this a multi-second
        // concealment span; every emission stays one plain 20ms frame.
        assert_eq!(next_audio(&mut events).await.len(), 160);
    }

    let stats = handle.stats();
    assert_eq!(stats.sequencer.out_of_order, 1);
    assert_eq!(stats.sequencer.gaps, 0);
    handle.stop();
}

/// A short sentence still draws a breath when the pause it enters exceeds
/// the sentence-pause threshold.
#[tokio::test(start_paused = true)]
async fn breathing_burst_on_long_pause() {
    let transport = MockTransport::new();
    let (handle, mut events) = Pipeline::new(PipelineConfig::default(), "long-pause")
        .with_transport(Arc::new(transport.clone()))
        .start()
        .unwrap();
    wait_for_connected(&mut events).await;
    let server = transport.take_server().unwrap();

    // Two words: far under the long-sentence policies, but the trailing
    // period maps to a 500ms pause, above the 400ms sentence threshold.
    server
        .to_client
        .send(WireFrame::Text(
            r#"{"type": "transcript", "text": "done now."}"#.to_string(),
        ))
        .await
        .unwrap();
    loop {
        if let PipelineEvent::Transcript(_) = next_event(&mut events).await {
            break;
        }
    }

    for _ in 0..8 {
        server
            .to_client
            .send(WireFrame::Binary(wide_payload(0x10)))
            .await
            .unwrap();
    }

    let mut burst_narrow_bytes = None;
    for _ in 0..8 {
        let frame = next_audio(&mut events).await;
        if frame.len() > 160 {
            burst_narrow_bytes = Some(frame.len() - 160);
            break;
        }
    }

    let burst_ms = burst_narrow_bytes.expect("no breathing burst spliced") / 8;
    assert!(
        (100..=300).contains(&burst_ms),
        "burst duration {burst_ms}ms outside [100, 300]"
    );

    // The burst also absorbs the scheduled sentence pause; playback
    // returns to plain frames immediately.
    for _ in 0..3 {
        assert_eq!(next_audio(&mut events).await.len(), 160);
    }
    handle.stop();
}

/// Invariant 6: no cross-session contamination. Two concurrent sessions
/// with distinct upstream payloads never see each other's frames.
#[tokio::test(start_paused = true)]
async fn sessions_are_fully_isolated() {
    let transport_a = MockTransport::new();
    let transport_b = MockTransport::new();

    let (handle_a, mut events_a) = Pipeline::new(PipelineConfig::default(), "call-a")
        .with_transport(Arc::new(transport_a.clone()))
        .start()
        .unwrap();
    let (handle_b, mut events_b) = Pipeline::new(PipelineConfig::default(), "call-b")
        .with_transport(Arc::new(transport_b.clone()))
        .start()
        .unwrap();

    wait_for_connected(&mut events_a).await;
    wait_for_connected(&mut events_b).await;
    let server_a = transport_a.take_server().unwrap();
    let server_b = transport_b.take_server().unwrap();

    // Distinct DC levels per session; the companded egress must match the
    // session's own source only.
    for _ in 0..6 {
        server_a
            .to_client
            .send(WireFrame::Binary(wide_payload(0x00)))
            .await
            .unwrap();
        server_b
            .to_client
            .send(WireFrame::Binary(wide_payload(0x40)))
            .await
            .unwrap();
    }

    let frame_a = next_audio(&mut events_a).await;
    let frame_b = next_audio(&mut events_b).await;

    // Session A carried digital silence; B carried a loud DC offset.
    assert!(frame_a.iter().all(|&b| b == 0xFF), "session A contaminated");
    assert!(frame_b.iter().all(|&b| b != 0xFF), "session B contaminated");

    assert_eq!(handle_a.stats().frames_received, 6);
    assert_eq!(handle_b.stats().frames_received, 6);

    handle_a.stop();
    handle_b.stop();
}

/// Restarting a pipeline with the same configuration reproduces the same
/// sequence numbering from zero.
#[tokio::test(start_paused = true)]
async fn restart_reproduces_sequencing() {
    for round in 0..2 {
        let transport = MockTransport::new();
        let (handle, mut events) =
            Pipeline::new(PipelineConfig::default(), format!("restart-{round}"))
                .with_transport(Arc::new(transport.clone()))
                .start()
                .unwrap();
        wait_for_connected(&mut events).await;
        let server = transport.take_server().unwrap();

        for _ in 0..5 {
            server
                .to_client
                .send(WireFrame::Binary(wide_payload(0x10)))
                .await
                .unwrap();
        }
        let _ = next_audio(&mut events).await;

        let stats = handle.stats();
        assert_eq!(stats.frames_received, 5);
        assert_eq!(stats.sequencer.total, 5);
        assert_eq!(stats.sequencer.duplicates, 0);
        handle.stop();
    }
}
