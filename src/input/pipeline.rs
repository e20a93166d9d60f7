use crate::core::{EngineState, InputConfig, InputError, MediaSource, Result};
use crate::engine::{Engine, LaunchedPipeline, PipelineControl, SampleSink};
use log::warn;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

/// sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Video,
    Audio,
}

impl SinkKind {
    /// sink 在管线中的元素名
    pub fn element_name(&self) -> &'static str {
        match self {
            SinkKind::Video => "video_sink",
            SinkKind::Audio => "audio_sink",
        }
    }

    /// playbin 上对应的属性名
    pub fn playbin_property(&self) -> &'static str {
        match self {
            SinkKind::Video => "video-sink",
            SinkKind::Audio => "audio-sink",
        }
    }

    fn converter(&self) -> &'static str {
        match self {
            SinkKind::Video => "videoconvert",
            SinkKind::Audio => "audioconvert ! audioresample",
        }
    }
}

/// sink 的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSpec {
    pub kind: SinkKind,
    pub max_buffers: u32,
    /// 满了以后是否丢弃旧帧
    pub drop: bool,
    /// 是否与管线时钟同步
    pub sync: bool,
    pub caps: String,
}

impl SinkSpec {
    pub fn video(config: &InputConfig) -> Self {
        Self {
            kind: SinkKind::Video,
            max_buffers: config.video_capacity as u32,
            drop: true,
            sync: true,
            caps: format!("video/x-raw,format={}", config.video_format),
        }
    }

    pub fn audio(config: &InputConfig) -> Self {
        Self {
            kind: SinkKind::Audio,
            max_buffers: config.audio_capacity as u32,
            drop: false,
            sync: true,
            caps: format!(
                "audio/x-raw,format={},rate={},channels={},layout=interleaved",
                config.audio_format, config.audio_rate, config.audio_channels
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.element_name()
    }

    fn appsink_fragment(&self) -> String {
        format!(
            "appsink name={} max-buffers={} drop={} sync={} caps={}",
            self.name(),
            self.max_buffers,
            self.drop,
            self.sync,
            self.caps
        )
    }

    fn branch(&self) -> String {
        format!("{} ! {}", self.kind.converter(), self.appsink_fragment())
    }
}

/// 管线拓扑
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// 网络源直接喂给 decodebin（RTMP/RTMPS）
    NetworkSource { location: String },
    /// 通用 playbin，网络源带缓冲窗口
    Play {
        uri: String,
        buffer_duration: Option<Duration>,
    },
}

/// 按 URI 选出的完整管线描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    pub source: MediaSource,
    pub topology: Topology,
    pub video_sink: SinkSpec,
    pub audio_sink: SinkSpec,
}

impl PipelineDescription {
    /// 根据 URI 协议选择拓扑
    ///
    /// - `rtmp`/`rtmps` → 网络源 + decodebin
    /// - `http`/`https` → playbin + 缓冲窗口
    /// - 存在的本地路径 → playbin + `file://` URI
    /// - 其他 → playbin，URI 原样使用
    pub fn for_uri(uri: &str, config: &InputConfig) -> Result<Self> {
        let source = MediaSource::from_uri(uri)?;

        let topology = match &source {
            MediaSource::NetworkStream { url, protocol } if protocol.is_rtmp() => {
                Topology::NetworkSource {
                    location: url.clone(),
                }
            }
            MediaSource::NetworkStream { url, .. } => Topology::Play {
                uri: url.clone(),
                buffer_duration: Some(config.http_buffer_duration()),
            },
            MediaSource::LocalFile(path) => Topology::Play {
                uri: file_uri(path)?,
                buffer_duration: None,
            },
            MediaSource::Other(uri) => Topology::Play {
                uri: uri.clone(),
                buffer_duration: None,
            },
        };

        Ok(Self {
            source,
            topology,
            video_sink: SinkSpec::video(config),
            audio_sink: SinkSpec::audio(config),
        })
    }

    pub fn sink(&self, kind: SinkKind) -> &SinkSpec {
        match kind {
            SinkKind::Video => &self.video_sink,
            SinkKind::Audio => &self.audio_sink,
        }
    }

    /// gst-launch 语法的管线描述
    pub fn launch_line(&self) -> String {
        match &self.topology {
            Topology::NetworkSource { location } => format!(
                "rtmpsrc location=\"{}\" ! decodebin name=decode \
                 decode. ! queue ! {} \
                 decode. ! queue ! {}",
                escape_quotes(location),
                self.video_sink.branch(),
                self.audio_sink.branch()
            ),
            Topology::Play {
                uri,
                buffer_duration,
            } => {
                let mut line = format!("playbin uri=\"{}\"", escape_quotes(uri));
                if let Some(duration) = buffer_duration {
                    line.push_str(&format!(" buffer-duration={}", duration.as_nanos()));
                }
                line.push_str(&format!(
                    " video-sink=\"{}\" audio-sink=\"{}\"",
                    self.video_sink.branch(),
                    self.audio_sink.branch()
                ));
                line
            }
        }
    }
}

/// 本地路径转成百分号编码的 `file://` URI
fn file_uri(path: &Path) -> Result<String> {
    let absolute = match std::fs::canonicalize(path) {
        Ok(absolute) => absolute,
        Err(_) if path.is_absolute() => path.to_path_buf(),
        Err(_) => std::env::current_dir()?.join(path),
    };

    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| InputError::InvalidInput(format!("无法转换为 file URI: {}", absolute.display())))
}

fn escape_quotes(value: &str) -> String {
    value.replace('"', "\\\"")
}

/// 引擎管线句柄
///
/// 独占持有管线和两个 sink。`release()` 把管线切到 NULL 并注销回调，
/// 不管从哪条路径退出都只执行一次。
pub struct PipelineHandle<E: Engine> {
    pipeline: E::Pipeline,
    video_sink: Option<E::Sink>,
    audio_sink: Option<E::Sink>,
    released: AtomicBool,
}

impl<E: Engine> PipelineHandle<E> {
    pub fn new(launched: LaunchedPipeline<E::Pipeline, E::Sink>) -> Self {
        Self {
            pipeline: launched.pipeline,
            video_sink: launched.video_sink,
            audio_sink: launched.audio_sink,
            released: AtomicBool::new(false),
        }
    }

    pub fn pipeline(&self) -> &E::Pipeline {
        &self.pipeline
    }

    pub fn video_sink(&self) -> Option<&E::Sink> {
        self.video_sink.as_ref()
    }

    pub fn audio_sink(&self) -> Option<&E::Sink> {
        self.audio_sink.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// 停止管线并注销 sink 回调（幂等）
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.pipeline.set_state(EngineState::Null) {
            warn!("⚠️  管线切换到 NULL 失败: {}", e);
        }
        self.disconnect_sinks();
    }

    /// 注销两个 sink 的回调，返回后不会再有样本进入队列
    pub fn disconnect_sinks(&self) {
        for sink in self.video_sink.iter().chain(self.audio_sink.iter()) {
            sink.disconnect();
        }
    }
}

impl<E: Engine> Drop for PipelineHandle<E> {
    fn drop(&mut self) {
        self.release();
    }
}
