// 解码引擎能力接口
//
// 输入适配器只通过这里的 trait 操作引擎：构建管线、注册 sink 回调、
// 切换状态、查询时长、seek、轮询总线消息。

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod scripted;

use crate::core::{EngineState, Result};
use crate::input::pipeline::PipelineDescription;
use std::time::Duration;

/// 新样本回调（在引擎内部线程上调用，样本所有权转移给回调）
pub type SampleCallback<S> = Box<dyn Fn(S) + Send + Sync + 'static>;

/// 解码引擎
pub trait Engine: Send + Sync + 'static {
    /// 解码后的样本（视频帧或音频块），drop 即释放引用
    type Sample: Send + 'static;
    type Pipeline: PipelineControl;
    type Sink: SampleSink<Sample = Self::Sample>;

    /// 按拓扑描述构建管线，并取出两个命名 sink
    fn launch(
        &self,
        description: &PipelineDescription,
    ) -> Result<LaunchedPipeline<Self::Pipeline, Self::Sink>>;
}

/// `Engine::launch` 的结果；找不到的 sink 为 `None`
pub struct LaunchedPipeline<P, S> {
    pub pipeline: P,
    pub video_sink: Option<S>,
    pub audio_sink: Option<S>,
}

/// 状态切换请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeOutcome {
    Success,
    /// 切换在后台进行，需要等待
    Async,
    /// 直播源，PAUSED 下不会预滚
    NoPreroll,
}

/// 运行中的管线
pub trait PipelineControl: Send + Sync + 'static {
    fn set_state(&self, state: EngineState) -> Result<StateChangeOutcome>;

    /// 等待进行中的状态切换完成，返回当前状态
    fn wait_for_state(&self, timeout: Duration) -> Result<EngineState>;

    /// 查询流时长，引擎未知时返回 `None`
    fn query_duration(&self) -> Option<Duration>;

    /// 刷新 + 关键帧对齐的 seek
    fn seek(&self, position: Duration) -> Result<()>;

    /// 带超时地从总线取一条消息
    fn poll_event(&self, timeout: Duration) -> Option<BusEvent>;
}

/// 管线末端的 sink
pub trait SampleSink: Send + Sync + 'static {
    type Sample: Send + 'static;

    fn connect_new_sample(&self, callback: SampleCallback<Self::Sample>);

    /// 注销回调；返回时进行中的回调已结束，之后也不会再有回调进入
    fn disconnect(&self);

    /// 当前协商好的 caps
    fn negotiated_caps(&self) -> Option<NegotiatedCaps>;
}

/// 协商结果中适配器关心的部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedCaps {
    Video { width: u32, height: u32 },
    Audio { channels: u32, rate: u32 },
}

/// 总线消息来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSource {
    /// 管线自身
    Pipeline,
    /// 管线内部的子元素
    Element(String),
}

/// 总线消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    EndOfStream,
    Error {
        message: String,
        detail: Option<String>,
    },
    Warning {
        message: String,
        detail: Option<String>,
    },
    StateChanged {
        source: EventSource,
        old: EngineState,
        new: EngineState,
        pending: Option<EngineState>,
    },
    Other(String),
}

/// 进程级引擎运行时（初始化/反初始化、调试日志桥接）
pub trait EngineRuntime {
    /// 初始化引擎，返回版本字符串
    fn init(debug_level: u32) -> Result<String>;

    fn shutdown();
}
