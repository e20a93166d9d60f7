//! GStreamer 后端
//!
//! 管线由 gst-launch 语法的描述构建，视频/音频 sink 是两个 appsink。
//! playbin 的 sink 作为属性设置，所以在管线里找不到时再从 `video-sink` /
//! `audio-sink` 属性里的 bin 中查找。

use crate::core::{EngineState, InputError, Result};
use crate::engine::{
    BusEvent, Engine, EngineRuntime, EventSource, LaunchedPipeline, NegotiatedCaps,
    PipelineControl, SampleCallback, SampleSink, StateChangeOutcome,
};
use crate::input::pipeline::{PipelineDescription, SinkKind, SinkSpec};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_audio as gst_audio;
use gstreamer_video as gst_video;
use log::{debug, info};
use parking_lot::Mutex;
use std::str::FromStr;
use std::time::Duration;

/// 当前安装的日志桥接函数
static LOG_FUNCTION: Mutex<Option<gst::log::DebugLogFunction>> = parking_lot::const_mutex(None);

fn to_gst_state(state: EngineState) -> gst::State {
    match state {
        EngineState::Null => gst::State::Null,
        EngineState::Ready => gst::State::Ready,
        EngineState::Paused => gst::State::Paused,
        EngineState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> Option<EngineState> {
    match state {
        gst::State::Null => Some(EngineState::Null),
        gst::State::Ready => Some(EngineState::Ready),
        gst::State::Paused => Some(EngineState::Paused),
        gst::State::Playing => Some(EngineState::Playing),
        _ => None,
    }
}

fn to_clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

fn debug_level(level: u32) -> gst::DebugLevel {
    match level {
        0 => gst::DebugLevel::None,
        1 => gst::DebugLevel::Error,
        2 => gst::DebugLevel::Warning,
        3 => gst::DebugLevel::Fixme,
        4 => gst::DebugLevel::Info,
        5 => gst::DebugLevel::Debug,
        6 => gst::DebugLevel::Log,
        7 => gst::DebugLevel::Trace,
        _ => gst::DebugLevel::Memdump,
    }
}

/// GStreamer 调试输出转发到 log
fn forward_log(level: gst::DebugLevel, message: &gst::DebugMessage) {
    let Some(text) = message.get() else {
        return;
    };

    let level = match level {
        gst::DebugLevel::Error => log::Level::Error,
        gst::DebugLevel::Warning => log::Level::Warn,
        gst::DebugLevel::Info => log::Level::Info,
        gst::DebugLevel::Debug | gst::DebugLevel::Fixme => log::Level::Debug,
        _ => log::Level::Trace,
    };
    log::log!(target: "gstreamer", level, "[gstreamer] {}", text);
}

/// GStreamer 引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct GstEngine;

impl GstEngine {
    /// 找到命名 appsink
    fn find_sink(pipeline: &gst::Pipeline, kind: SinkKind) -> Option<gst_app::AppSink> {
        if let Some(element) = pipeline.by_name(kind.element_name()) {
            return element.downcast::<gst_app::AppSink>().ok();
        }

        let property = kind.playbin_property();
        pipeline.find_property(property)?;
        let element = pipeline.property::<Option<gst::Element>>(property)?;

        match element.downcast::<gst_app::AppSink>() {
            Ok(sink) => Some(sink),
            Err(element) => element
                .downcast::<gst::Bin>()
                .ok()?
                .by_name(kind.element_name())?
                .downcast::<gst_app::AppSink>()
                .ok(),
        }
    }

    /// 按描述设置 appsink：caps、丢帧策略、容量、时钟同步
    fn configure_sink(sink: &gst_app::AppSink, spec: &SinkSpec) -> Result<()> {
        let caps = gst::Caps::from_str(&spec.caps)
            .map_err(|e| InputError::EngineInit(format!("无效的 caps '{}': {}", spec.caps, e)))?;

        sink.set_property("emit-signals", false);
        sink.set_caps(Some(&caps));
        sink.set_drop(spec.drop);
        sink.set_max_buffers(spec.max_buffers);
        sink.set_property("sync", spec.sync);
        Ok(())
    }

    fn prepare_sink(
        pipeline: &gst::Pipeline,
        description: &PipelineDescription,
        kind: SinkKind,
    ) -> Result<Option<GstSink>> {
        let Some(appsink) = Self::find_sink(pipeline, kind) else {
            return Ok(None);
        };
        Self::configure_sink(&appsink, description.sink(kind))?;
        Ok(Some(GstSink { appsink, kind }))
    }
}

impl Engine for GstEngine {
    type Sample = gst::Sample;
    type Pipeline = GstPipeline;
    type Sink = GstSink;

    fn launch(
        &self,
        description: &PipelineDescription,
    ) -> Result<LaunchedPipeline<GstPipeline, GstSink>> {
        let line = description.launch_line();
        debug!("🔧 gst::parse::launch: {}", line);

        let element = gst::parse::launch(&line)
            .map_err(|e| InputError::EngineInit(format!("{} ({})", e, line)))?;
        let pipeline = element
            .downcast::<gst::Pipeline>()
            .map_err(|_| InputError::EngineInit("顶层元素不是 pipeline".to_string()))?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| InputError::EngineInit("管线没有总线".to_string()))?;

        let video_sink = Self::prepare_sink(&pipeline, description, SinkKind::Video)?;
        let audio_sink = Self::prepare_sink(&pipeline, description, SinkKind::Audio)?;

        Ok(LaunchedPipeline {
            pipeline: GstPipeline { pipeline, bus },
            video_sink,
            audio_sink,
        })
    }
}

impl EngineRuntime for GstEngine {
    fn init(level: u32) -> Result<String> {
        gst::init().map_err(|e| InputError::Runtime(format!("GStreamer 初始化失败: {}", e)))?;

        gst::log::remove_default_log_function();
        let function = gst::log::add_log_function(
            |_category, level, _file, _function, _line, _object, message| {
                forward_log(level, message)
            },
        );
        *LOG_FUNCTION.lock() = Some(function);
        gst::log::set_default_threshold(debug_level(level));

        let version = gst::version_string().to_string();
        info!("🎞️  {} 已加载", version);
        Ok(version)
    }

    fn shutdown() {
        if let Some(function) = LOG_FUNCTION.lock().take() {
            gst::log::remove_log_function(function);
        }
        // 调用方保证此时已没有任何管线存活
        unsafe {
            gst::deinit();
        }
    }
}

/// GStreamer 管线和它的总线
pub struct GstPipeline {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
}

impl GstPipeline {
    fn translate(&self, message: &gst::Message) -> BusEvent {
        use gst::MessageView;

        match message.view() {
            MessageView::Eos(_) => BusEvent::EndOfStream,
            MessageView::Error(err) => BusEvent::Error {
                message: err.error().to_string(),
                detail: err.debug().map(|d| d.to_string()),
            },
            MessageView::Warning(warning) => BusEvent::Warning {
                message: warning.error().to_string(),
                detail: warning.debug().map(|d| d.to_string()),
            },
            MessageView::StateChanged(changed) => {
                let source = match changed.src() {
                    Some(src) if src == self.pipeline.upcast_ref::<gst::Object>() => {
                        EventSource::Pipeline
                    }
                    Some(src) => EventSource::Element(src.name().to_string()),
                    None => EventSource::Element(String::new()),
                };
                BusEvent::StateChanged {
                    source,
                    old: from_gst_state(changed.old()).unwrap_or(EngineState::Null),
                    new: from_gst_state(changed.current()).unwrap_or(EngineState::Null),
                    pending: from_gst_state(changed.pending()),
                }
            }
            _ => BusEvent::Other(format!("{:?}", message.type_())),
        }
    }
}

impl PipelineControl for GstPipeline {
    fn set_state(&self, state: EngineState) -> Result<StateChangeOutcome> {
        match self.pipeline.set_state(to_gst_state(state)) {
            Ok(gst::StateChangeSuccess::Success) => Ok(StateChangeOutcome::Success),
            Ok(gst::StateChangeSuccess::Async) => Ok(StateChangeOutcome::Async),
            Ok(gst::StateChangeSuccess::NoPreroll) => Ok(StateChangeOutcome::NoPreroll),
            Err(e) => Err(InputError::StateChange {
                target: state,
                reason: format!("{:?}", e),
            }),
        }
    }

    fn wait_for_state(&self, timeout: Duration) -> Result<EngineState> {
        let (result, current, pending) = self.pipeline.state(to_clock_time(timeout));
        let current = from_gst_state(current).unwrap_or(EngineState::Null);

        result.map_err(|e| InputError::StateChange {
            target: from_gst_state(pending).unwrap_or(current),
            reason: format!("{:?}", e),
        })?;
        Ok(current)
    }

    fn query_duration(&self) -> Option<Duration> {
        self.pipeline
            .query_duration::<gst::ClockTime>()
            .map(|duration| Duration::from_nanos(duration.nseconds()))
    }

    fn seek(&self, position: Duration) -> Result<()> {
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                to_clock_time(position),
            )
            .map_err(|e| InputError::SeekRejected(e.to_string()))
    }

    fn poll_event(&self, timeout: Duration) -> Option<BusEvent> {
        let message = self.bus.timed_pop(to_clock_time(timeout))?;
        Some(self.translate(&message))
    }
}

/// 取出新样本交给回调；取样失败向管线报告流错误
fn deliver_sample(
    sink: &gst_app::AppSink,
    callback: &SampleCallback<gst::Sample>,
) -> std::result::Result<gst::FlowSuccess, gst::FlowError> {
    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
    callback(sample);
    Ok(gst::FlowSuccess::Ok)
}

/// appsink 封装
pub struct GstSink {
    appsink: gst_app::AppSink,
    kind: SinkKind,
}

impl SampleSink for GstSink {
    type Sample = gst::Sample;

    fn connect_new_sample(&self, callback: SampleCallback<gst::Sample>) {
        self.appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| deliver_sample(sink, &callback))
                .build(),
        );
    }

    fn disconnect(&self) {
        self.appsink
            .set_callbacks(gst_app::AppSinkCallbacks::builder().build());
    }

    fn negotiated_caps(&self) -> Option<NegotiatedCaps> {
        let caps = self.appsink.static_pad("sink")?.current_caps()?;

        match self.kind {
            SinkKind::Video => {
                let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
                Some(NegotiatedCaps::Video {
                    width: info.width(),
                    height: info.height(),
                })
            }
            SinkKind::Audio => {
                let info = gst_audio::AudioInfo::from_caps(&caps).ok()?;
                Some(NegotiatedCaps::Audio {
                    channels: info.channels(),
                    rate: info.rate(),
                })
            }
        }
    }
}
