use media_input::engine::scripted::ScriptedEngine;
use media_input::engine::StateChangeOutcome;
use media_input::input::Topology;
use media_input::{
    BusEvent, Color, EngineState, EventSource, Graph, InputConfig, InputError, MediaInput,
    NegotiatedCaps, SinkKind, TagSeverity,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const URI: &str = "rtmp://live.example.com/app/key";
const IDLE: Duration = Duration::from_secs(5);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config() -> InputConfig {
    InputConfig {
        bus_poll_interval_ms: 10,
        ..InputConfig::default()
    }
}

fn open_with(
    engine: &ScriptedEngine,
    loop_playback: Option<bool>,
    config: InputConfig,
) -> (MediaInput<ScriptedEngine>, Arc<Graph>) {
    init_logger();
    let graph = Arc::new(Graph::new());
    let input = MediaInput::with_config(engine.clone(), URI, loop_playback, config, graph.clone())
        .unwrap();
    (input, graph)
}

fn open(engine: &ScriptedEngine, loop_playback: Option<bool>) -> MediaInput<ScriptedEngine> {
    open_with(engine, loop_playback, test_config()).0
}

fn pipeline_playing() -> BusEvent {
    BusEvent::StateChanged {
        source: EventSource::Pipeline,
        old: EngineState::Paused,
        new: EngineState::Playing,
        pending: None,
    }
}

#[test]
fn open_builds_network_pipeline_and_prerolls() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    assert!(input.is_initialized());
    assert_eq!(input.uri(), URI);
    assert_eq!(engine.launches(), 1);
    assert_eq!(engine.state(), EngineState::Paused);
    assert!(engine.has_callback(SinkKind::Video));
    assert!(engine.has_callback(SinkKind::Audio));

    let descriptions = engine.descriptions();
    assert_eq!(
        descriptions[0].topology,
        Topology::NetworkSource {
            location: URI.to_string()
        }
    );
}

#[test]
fn empty_uri_fails_before_anything_starts() {
    init_logger();
    let engine = ScriptedEngine::new();

    for uri in ["", "   "] {
        let err = MediaInput::open(engine.clone(), uri, None).err();
        assert!(matches!(err, Some(InputError::InvalidInput(_))));
    }
    assert_eq!(engine.launches(), 0);
}

#[test]
fn video_queue_holds_at_most_capacity() {
    let engine = ScriptedEngine::new();
    let config = InputConfig {
        video_capacity: 3,
        ..test_config()
    };
    let (input, _graph) = open_with(&engine, None, config);

    for _ in 0..5 {
        assert!(engine.push_video());
    }
    assert_eq!(input.buffered(), (3, 0));
    // 入队失败的两帧立即释放
    assert_eq!(engine.released_samples(), 2);

    let ids: Vec<u64> = std::iter::from_fn(|| input.try_pop_video())
        .map(|sample| sample.id())
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(engine.released_samples(), 5);
    assert!(input.try_pop_video().is_none());
}

#[test]
fn audio_queue_is_independent_of_video() {
    let engine = ScriptedEngine::new();
    let config = InputConfig {
        audio_capacity: 2,
        ..test_config()
    };
    let (input, _graph) = open_with(&engine, None, config);

    engine.push_audio();
    engine.push_audio();
    engine.push_audio();
    engine.push_video();

    assert_eq!(input.buffered(), (1, 2));
    let chunk = input.try_pop_audio().unwrap();
    assert_eq!(chunk.kind(), SinkKind::Audio);
    assert!(input.try_pop_audio().is_some());
    assert!(input.try_pop_audio().is_none());
}

#[test]
fn every_sample_is_released_exactly_once() {
    let engine = ScriptedEngine::new();
    let config = InputConfig {
        video_capacity: 4,
        audio_capacity: 4,
        ..test_config()
    };
    let (input, _graph) = open_with(&engine, None, config);

    for _ in 0..10 {
        engine.push_video();
        engine.push_audio();
    }
    drop(input.try_pop_video());
    input.seek(0, true);
    for _ in 0..3 {
        engine.push_video();
    }

    drop(input);
    assert_eq!(engine.released_samples(), 23);
    assert!(!engine.has_callback(SinkKind::Video));
    assert_eq!(engine.state(), EngineState::Null);
}

#[test]
fn flush_seek_empties_queues_and_tags_seek() {
    let engine = ScriptedEngine::new();
    let (input, graph) = open_with(&engine, None, test_config());

    engine.push_video();
    engine.push_video();
    engine.push_audio();
    assert_eq!(input.buffered(), (2, 1));

    input.seek(1500, true);

    assert_eq!(input.buffered(), (0, 0));
    assert!(input.try_pop_video().is_none());
    assert_eq!(engine.seeks(), vec![Duration::from_millis(1500)]);
    assert_eq!(graph.tag_count(TagSeverity::Info, "seek"), 1);
}

#[test]
fn seek_without_flush_keeps_queues() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    engine.push_video();
    input.seek(200, false);

    assert_eq!(input.buffered(), (1, 0));
    assert_eq!(engine.seeks(), vec![Duration::from_millis(200)]);
}

#[test]
fn negative_seek_is_clamped_to_zero() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    input.seek(-5, true);
    input.seek(0, true);

    assert_eq!(engine.seeks(), vec![Duration::ZERO, Duration::ZERO]);
}

#[test]
fn negative_seek_without_flush_keeps_queues() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    engine.push_video();
    engine.push_audio();
    input.seek(-5, false);

    assert_eq!(engine.seeks(), vec![Duration::ZERO]);
    assert_eq!(input.buffered(), (1, 1));
}

#[test]
fn rejected_seek_is_logged_and_clears_eof() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, Some(false));

    engine.emit(BusEvent::EndOfStream);
    assert!(engine.wait_until_idle(IDLE));
    assert!(input.eof());

    engine.reject_seeks(true);
    input.seek(1000, true);

    assert!(engine.seeks().is_empty());
    assert!(!input.eof());
    assert!(input.is_initialized());
}

#[test]
fn end_of_stream_sets_eof_without_loop() {
    let engine = ScriptedEngine::new();
    for loop_playback in [None, Some(false)] {
        let input = open(&engine, loop_playback);
        assert!(!input.eof());

        engine.emit(BusEvent::EndOfStream);
        assert!(engine.wait_until_idle(IDLE));
        assert!(input.eof());
    }
    assert!(engine.seeks().is_empty());
}

#[test]
fn end_of_stream_rewinds_when_looping() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, Some(true));

    engine.push_video();
    engine.emit(BusEvent::EndOfStream);
    assert!(engine.wait_until_idle(IDLE));

    assert!(!input.eof());
    assert_eq!(engine.seeks(), vec![Duration::ZERO]);
    assert_eq!(input.buffered(), (0, 0));
}

#[test]
fn duration_is_read_when_pipeline_reaches_playing() {
    let engine = ScriptedEngine::new();
    engine.set_duration(Some(Duration::from_nanos(5_000_000_000)));
    let input = open(&engine, None);
    assert_eq!(input.duration(), 0);

    // 子元素进入 PLAYING 不触发时长查询
    engine.emit(BusEvent::StateChanged {
        source: EventSource::Element("decode".to_string()),
        old: EngineState::Paused,
        new: EngineState::Playing,
        pending: None,
    });
    assert!(engine.wait_until_idle(IDLE));
    assert_eq!(input.duration(), 0);

    engine.emit(BusEvent::StateChanged {
        source: EventSource::Pipeline,
        old: EngineState::Ready,
        new: EngineState::Paused,
        pending: Some(EngineState::Playing),
    });
    assert!(engine.wait_until_idle(IDLE));
    assert_eq!(input.duration(), 0);

    engine.emit(pipeline_playing());
    assert!(engine.wait_until_idle(IDLE));
    assert_eq!(input.duration(), 5000);
    assert_eq!(input.stream_info().duration_ms, 5000);
}

#[test]
fn unknown_duration_keeps_previous_value() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    engine.emit(pipeline_playing());
    assert!(engine.wait_until_idle(IDLE));
    assert_eq!(input.duration(), 0);
}

#[test]
fn negotiated_caps_fill_stream_info() {
    let engine = ScriptedEngine::new();
    engine.set_video_caps(1920, 1080);
    engine.set_audio_caps(2, 48000);
    let input = open(&engine, None);

    assert_eq!(input.width(), 1920);
    assert_eq!(input.height(), 1080);
    assert_eq!(input.audio_channels(), 2);
    assert_eq!(input.audio_sample_rate(), 48000);
    assert_eq!(
        input.video_caps(),
        Some(NegotiatedCaps::Video {
            width: 1920,
            height: 1080
        })
    );
    assert_eq!(
        input.audio_caps(),
        Some(NegotiatedCaps::Audio {
            channels: 2,
            rate: 48000
        })
    );
}

#[test]
fn stream_info_is_refreshed_on_playing() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);
    assert_eq!(input.width(), 0);

    engine.set_video_caps(1280, 720);
    engine.emit(pipeline_playing());
    assert!(engine.wait_until_idle(IDLE));

    let info = input.stream_info();
    assert_eq!((info.width, info.height), (1280, 720));
}

#[test]
fn start_and_stop_request_states() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    input.start();
    assert_eq!(engine.state(), EngineState::Playing);
    input.stop();
    assert_eq!(engine.state(), EngineState::Paused);
}

#[test]
fn failed_launch_leaves_input_inert_until_reset() {
    let engine = ScriptedEngine::new();
    engine.fail_next_launches(1);
    let input = open(&engine, None);

    assert!(!input.is_initialized());
    assert_eq!(engine.launches(), 1);

    input.start();
    input.seek(100, true);
    assert!(engine.state_requests().is_empty());
    assert!(engine.seeks().is_empty());
    assert!(!engine.push_video());
    assert!(input.try_pop_video().is_none());
    assert!(input.video_caps().is_none());

    assert!(input.reset());
    assert!(input.is_initialized());
    assert_eq!(engine.launches(), 2);
    assert!(engine.push_video());
    assert_eq!(input.buffered(), (1, 0));
}

#[test]
fn failed_pause_releases_the_pipeline() {
    let engine = ScriptedEngine::new();
    engine.fail_state(EngineState::Paused);
    let input = open(&engine, None);

    assert!(!input.is_initialized());
    assert_eq!(
        engine.state_requests(),
        vec![EngineState::Paused, EngineState::Null]
    );
    assert!(!engine.has_callback(SinkKind::Video));

    engine.clear_state_failures();
    assert!(input.reset());
    assert_eq!(engine.state(), EngineState::Paused);
}

#[test]
fn async_preroll_waits_for_paused() {
    let engine = ScriptedEngine::new();
    engine.set_pause_outcome(StateChangeOutcome::Async);
    let input = open(&engine, None);
    assert!(input.is_initialized());

    engine.set_pause_outcome(StateChangeOutcome::NoPreroll);
    assert!(input.reset());
}

#[test]
fn reset_rebuilds_and_clears_state() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, Some(false));

    engine.push_video();
    engine.push_audio();
    engine.emit(BusEvent::EndOfStream);
    assert!(engine.wait_until_idle(IDLE));
    assert!(input.eof());

    assert!(input.reset());

    assert!(!input.eof());
    assert_eq!(input.buffered(), (0, 0));
    assert_eq!(engine.launches(), 2);
    assert_eq!(engine.state(), EngineState::Paused);
    // 旧管线注销回调不影响新管线的回调
    assert!(engine.has_callback(SinkKind::Video));
    assert!(engine.push_video());
    assert_eq!(engine.released_samples(), 2);

    // 监控线程跟随新管线（先等它开始轮询新管线）
    assert!(engine.wait_until_idle(IDLE));
    engine.emit(BusEvent::EndOfStream);
    assert!(engine.wait_until_idle(IDLE));
    assert!(input.eof());
}

#[test]
fn engine_errors_are_counted_not_recovered() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);

    engine.emit(BusEvent::Error {
        message: "Could not connect to server".to_string(),
        detail: Some("rtmpsrc0: connection refused".to_string()),
    });
    engine.emit(BusEvent::Warning {
        message: "late buffer".to_string(),
        detail: None,
    });
    engine.emit(BusEvent::Error {
        message: "Internal data stream error".to_string(),
        detail: None,
    });
    engine.emit(BusEvent::Other("Tag".to_string()));
    assert!(engine.wait_until_idle(IDLE));

    assert_eq!(input.engine_errors(), 2);
    assert!(input.is_initialized());
    assert!(!input.eof());
    assert_eq!(engine.launches(), 1);
}

#[test]
fn monitor_panic_does_not_take_down_the_input() {
    let engine = ScriptedEngine::new();
    engine.panic_on_next_poll();
    let input = open(&engine, None);

    // 监控线程已退出，但队列和控制操作仍然可用
    thread::sleep(Duration::from_millis(50));
    assert!(engine.push_video());
    assert!(input.try_pop_video().is_some());
    input.start();
    assert_eq!(engine.state(), EngineState::Playing);

    drop(input);
    assert_eq!(engine.state(), EngineState::Null);
}

#[test]
fn abort_stops_promptly_under_event_flood() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, Some(true));
    input.start();

    let running = Arc::new(AtomicBool::new(true));
    let flood = {
        let engine = engine.clone();
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                engine.emit(BusEvent::Other("Qos".to_string()));
                engine.push_video();
                thread::yield_now();
            }
        })
    };
    thread::sleep(Duration::from_millis(30));

    let started = Instant::now();
    input.abort();
    assert_eq!(engine.state(), EngineState::Null);
    assert!(!engine.has_callback(SinkKind::Video));
    assert!(!engine.has_callback(SinkKind::Audio));

    // 中止后生产端仍在投递，队列必须保持为空
    thread::sleep(Duration::from_millis(20));
    assert_eq!(input.buffered(), (0, 0));
    drop(input);
    assert!(started.elapsed() < Duration::from_secs(2));

    running.store(false, Ordering::SeqCst);
    flood.join().unwrap();
}

#[test]
fn abort_is_idempotent() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);
    engine.push_video();

    input.abort();
    input.abort();

    assert_eq!(input.buffered(), (0, 0));
    assert_eq!(engine.released_samples(), 1);
    assert!(!engine.push_video());
    assert!(!engine.push_audio());
    assert_eq!(input.buffered(), (0, 0));
}

#[test]
fn diagnostics_track_backpressure_and_colors() {
    let engine = ScriptedEngine::new();
    let config = InputConfig {
        video_capacity: 4,
        ..test_config()
    };
    let (input, graph) = open_with(&engine, None, config);

    assert_eq!(graph.color("seek"), Some(Color::rgb(1.0, 0.5, 0.0)));
    assert_eq!(graph.color("input"), Some(Color::rgb(0.7, 0.4, 0.4)));

    engine.push_video();
    engine.push_video();
    assert_eq!(graph.value("input"), Some(0.5));

    drop(input.try_pop_video());
    assert_eq!(graph.value("input"), Some(0.25));

    input.seek(0, true);
    assert_eq!(graph.value("input"), Some(0.0));
}

#[test]
fn drop_releases_pipeline_and_buffers() {
    let engine = ScriptedEngine::new();
    let input = open(&engine, None);
    input.start();
    engine.push_video();
    engine.push_audio();

    drop(input);

    assert_eq!(engine.state(), EngineState::Null);
    assert_eq!(engine.released_samples(), 2);
    assert!(!engine.has_callback(SinkKind::Video));
    assert!(!engine.has_callback(SinkKind::Audio));
}
