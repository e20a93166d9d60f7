use crate::core::{
    Color, Diagnostics, EngineState, Graph, InputConfig, InputError, MediaSource, Result, StreamInfo,
    TagSeverity,
};
use crate::engine::{Engine, NegotiatedCaps, PipelineControl, SampleSink, StateChangeOutcome};
use crate::input::bus_monitor::BusMonitor;
use crate::input::frame_buffer::FrameBuffer;
use crate::input::log_ctx;
use crate::input::pipeline::{PipelineDescription, PipelineHandle};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 背压仪表名
const INPUT_GAUGE: &str = "input";
/// seek 事件标签名
const SEEK_TAG: &str = "seek";

/// 视频 sink 回调：入队失败时立即释放样本
fn on_video_sample<S>(buffer: &FrameBuffer<S>, diagnostics: &dyn Diagnostics, sample: S) {
    if let Err(rejected) = buffer.try_push(sample) {
        drop(rejected);
        return;
    }
    diagnostics.set_value(INPUT_GAUGE, buffer.fill_ratio());
}

/// 音频 sink 回调
fn on_audio_sample<S>(buffer: &FrameBuffer<S>, sample: S) {
    if let Err(rejected) = buffer.try_push(sample) {
        drop(rejected);
    }
}

/// 适配器、总线监控线程共享的状态
///
/// 标量字段只由所属线程或监控线程写入，消费者每个周期轮询读取（acquire/release）。
/// 管线槽位只有 `reset()` 和析构会替换。
pub(crate) struct InputShared<E: Engine> {
    engine: E,
    uri: String,
    loop_playback: Option<bool>,
    config: InputConfig,
    diagnostics: Arc<dyn Diagnostics>,

    video_buffer: Arc<FrameBuffer<E::Sample>>,
    audio_buffer: Arc<FrameBuffer<E::Sample>>,

    pipeline: RwLock<Option<Arc<PipelineHandle<E>>>>,
    reset_lock: Mutex<()>,

    abort_request: Arc<AtomicBool>,
    eof: AtomicBool,
    initialized: AtomicBool,
    duration_ms: AtomicI64,
    width: AtomicU32,
    height: AtomicU32,
    audio_channels: AtomicU32,
    audio_sample_rate: AtomicU32,
    engine_errors: AtomicU64,
}

impl<E: Engine> InputShared<E> {
    pub(crate) fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn config(&self) -> &InputConfig {
        &self.config
    }

    pub(crate) fn loop_playback(&self) -> Option<bool> {
        self.loop_playback
    }

    pub(crate) fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort_request)
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort_request.load(Ordering::Acquire)
    }

    /// 当前管线（克隆一份引用，调用期间即使被 reset 替换也保持有效）
    pub(crate) fn pipeline(&self) -> Option<Arc<PipelineHandle<E>>> {
        self.pipeline.read().clone()
    }

    /// `handle` 是否仍是当前管线
    pub(crate) fn is_current(&self, handle: &Arc<PipelineHandle<E>>) -> bool {
        self.pipeline
            .read()
            .as_ref()
            .map(|current| Arc::ptr_eq(current, handle))
            .unwrap_or(false)
    }

    pub(crate) fn mark_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    pub(crate) fn count_engine_error(&self) {
        self.engine_errors.fetch_add(1, Ordering::AcqRel);
    }

    /// 构建管线、注册 sink 回调并切到 PAUSED
    ///
    /// 失败时只记录日志，管线槽位保持为空（未初始化）
    pub(crate) fn initialize_pipeline(&self) -> bool {
        let description = match PipelineDescription::for_uri(&self.uri, &self.config) {
            Ok(description) => description,
            Err(e) => {
                error!("{} ❌ 无法为 {} 生成管线描述: {}", log_ctx(), self.uri, e);
                return false;
            }
        };
        if let MediaSource::NetworkStream { protocol, .. } = &description.source {
            info!("{} 🌐 网络流 ({}): {}", log_ctx(), protocol.as_str(), self.uri);
        }
        debug!("{} 管线描述: {}", log_ctx(), description.launch_line());

        let launched = match self.engine.launch(&description) {
            Ok(launched) => launched,
            Err(e) => {
                error!("{} ❌ 创建管线失败 ({}): {}", log_ctx(), self.uri, e);
                return false;
            }
        };

        let handle = PipelineHandle::<E>::new(launched);
        if handle.video_sink().is_none() {
            warn!("{} ⚠️  管线中没有找到视频 sink", log_ctx());
        }
        if handle.audio_sink().is_none() {
            warn!("{} ⚠️  管线中没有找到音频 sink", log_ctx());
        }
        self.connect_sinks(&handle);

        if let Err(e) = self.bring_to_paused(&handle) {
            error!("{} ❌ 管线无法进入 PAUSED 状态: {}", log_ctx(), e);
            handle.release();
            return false;
        }

        self.refresh_stream_info(&handle);
        *self.pipeline.write() = Some(Arc::new(handle));
        self.initialized.store(true, Ordering::Release);

        info!(
            "{} ✅ 管线初始化完成: {} ({}x{}, {} 声道 @ {} Hz)",
            log_ctx(),
            self.uri,
            self.width.load(Ordering::Acquire),
            self.height.load(Ordering::Acquire),
            self.audio_channels.load(Ordering::Acquire),
            self.audio_sample_rate.load(Ordering::Acquire)
        );
        true
    }

    fn connect_sinks(&self, handle: &PipelineHandle<E>) {
        if let Some(sink) = handle.video_sink() {
            let buffer = Arc::clone(&self.video_buffer);
            let diagnostics = Arc::clone(&self.diagnostics);
            sink.connect_new_sample(Box::new(move |sample| {
                on_video_sample(&buffer, diagnostics.as_ref(), sample)
            }));
        }

        if let Some(sink) = handle.audio_sink() {
            let buffer = Arc::clone(&self.audio_buffer);
            sink.connect_new_sample(Box::new(move |sample| on_audio_sample(&buffer, sample)));
        }
    }

    fn bring_to_paused(&self, handle: &PipelineHandle<E>) -> Result<()> {
        match handle.pipeline().set_state(EngineState::Paused)? {
            StateChangeOutcome::Success => {}
            StateChangeOutcome::NoPreroll => {
                info!("{} 📡 直播源，PAUSED 状态下不预滚", log_ctx());
            }
            StateChangeOutcome::Async => {
                let timeout = self.config.preroll_timeout();
                let state = handle.pipeline().wait_for_state(timeout)?;
                if state != EngineState::Paused {
                    warn!(
                        "{} ⚠️  预滚未在 {}ms 内完成（当前状态 {:?}）",
                        log_ctx(),
                        timeout.as_millis(),
                        state
                    );
                }
            }
        }
        Ok(())
    }

    /// 从 sink 读取协商好的宽高/声道/采样率
    pub(crate) fn refresh_stream_info(&self, handle: &PipelineHandle<E>) {
        if let Some(NegotiatedCaps::Video { width, height }) =
            handle.video_sink().and_then(|sink| sink.negotiated_caps())
        {
            self.width.store(width, Ordering::Release);
            self.height.store(height, Ordering::Release);
        }

        if let Some(NegotiatedCaps::Audio { channels, rate }) =
            handle.audio_sink().and_then(|sink| sink.negotiated_caps())
        {
            self.audio_channels.store(channels, Ordering::Release);
            self.audio_sample_rate.store(rate, Ordering::Release);
        }
    }

    /// 管线进入 PLAYING：查询时长（毫秒）并刷新流信息
    pub(crate) fn on_playing(&self, handle: &PipelineHandle<E>) {
        if let Some(duration) = handle.pipeline().query_duration() {
            let duration_ms = duration.as_millis() as i64;
            self.duration_ms.store(duration_ms, Ordering::Release);
            debug!("{} ⏱️  流时长: {} ms", log_ctx(), duration_ms);
        }
        self.refresh_stream_info(handle);
    }

    /// 清空两个队列并释放样本
    pub(crate) fn drain_buffers(&self) -> (usize, usize) {
        let video = self.video_buffer.drain();
        let audio = self.audio_buffer.drain();
        self.report_input_level();
        (video, audio)
    }

    fn report_input_level(&self) {
        self.diagnostics
            .set_value(INPUT_GAUGE, self.video_buffer.fill_ratio());
    }

    /// seek 到指定位置（毫秒，负数按 0 处理）
    pub(crate) fn seek(&self, position_ms: i64, flush: bool) {
        let Some(handle) = self.pipeline() else {
            return;
        };

        let position_ms = position_ms.max(0);
        debug!("{} 🎯 Seek 到: {} ms (flush: {})", log_ctx(), position_ms, flush);

        if flush {
            let (video, audio) = self.drain_buffers();
            if video > 0 || audio > 0 {
                debug!("{} 🧹 Seek 清空队列: {} 视频帧, {} 音频块", log_ctx(), video, audio);
            }
        }

        let position = Duration::from_millis(position_ms as u64);
        if let Err(e) = handle.pipeline().seek(position) {
            warn!("{} ⚠️  Seek 失败: {}", log_ctx(), e);
        }

        self.eof.store(false, Ordering::Release);
        self.diagnostics.set_tag(TagSeverity::Info, SEEK_TAG);
    }
}

/// 媒体输入适配器
///
/// 驱动一条引擎管线，把解码后的视频帧/音频块放进两个有界队列，
/// 消费者线程通过 `try_pop_video` / `try_pop_audio` 非阻塞取用。
/// 总线消息（EOS、错误、状态切换）由后台监控线程处理。
pub struct MediaInput<E: Engine> {
    shared: Arc<InputShared<E>>,
    monitor: Option<BusMonitor>,
}

impl<E: Engine> MediaInput<E> {
    /// 使用默认配置打开输入
    pub fn open(engine: E, uri: &str, loop_playback: Option<bool>) -> Result<Self> {
        Self::with_config(
            engine,
            uri,
            loop_playback,
            InputConfig::default(),
            Arc::new(Graph::new()),
        )
    }

    /// 打开输入
    ///
    /// 空 URI 在启动任何线程之前返回 `InvalidInput`。管线构建失败不会返回错误：
    /// 适配器进入未初始化状态，所有操作退化为空操作，可以用 `reset()` 重试。
    pub fn with_config(
        engine: E,
        uri: &str,
        loop_playback: Option<bool>,
        config: InputConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        if uri.trim().is_empty() {
            return Err(InputError::InvalidInput("URI 不能为空".to_string()));
        }

        info!("{} 🎬 创建媒体输入: {} (loop: {:?})", log_ctx(), uri, loop_playback);

        diagnostics.set_color(SEEK_TAG, Color::rgb(1.0, 0.5, 0.0));
        diagnostics.set_color(INPUT_GAUGE, Color::rgb(0.7, 0.4, 0.4));

        let shared = Arc::new(InputShared {
            engine,
            uri: uri.to_string(),
            loop_playback,
            video_buffer: Arc::new(FrameBuffer::new(config.video_capacity)),
            audio_buffer: Arc::new(FrameBuffer::new(config.audio_capacity)),
            config,
            diagnostics,
            pipeline: RwLock::new(None),
            reset_lock: Mutex::new(()),
            abort_request: Arc::new(AtomicBool::new(false)),
            eof: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            duration_ms: AtomicI64::new(0),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            audio_channels: AtomicU32::new(0),
            audio_sample_rate: AtomicU32::new(0),
            engine_errors: AtomicU64::new(0),
        });

        shared.initialize_pipeline();

        let monitor = BusMonitor::spawn(Arc::clone(&shared))?;

        Ok(Self {
            shared,
            monitor: Some(monitor),
        })
    }

    pub fn uri(&self) -> &str {
        self.shared.uri()
    }

    /// 开始播放（PLAYING）
    pub fn start(&self) {
        self.request_state(EngineState::Playing);
    }

    /// 暂停（PAUSED）
    pub fn stop(&self) {
        self.request_state(EngineState::Paused);
    }

    fn request_state(&self, state: EngineState) {
        let Some(handle) = self.shared.pipeline() else {
            return;
        };
        if let Err(e) = handle.pipeline().set_state(state) {
            warn!("{} ⚠️  请求 {:?} 状态失败: {}", log_ctx(), state, e);
        }
    }

    /// seek 到 `position_ms`；`flush` 为真时先丢弃所有已缓冲的样本
    pub fn seek(&self, position_ms: i64, flush: bool) {
        self.shared.seek(position_ms, flush);
    }

    /// 取一帧视频，同时刷新背压仪表
    pub fn try_pop_video(&self) -> Option<E::Sample> {
        let sample = self.shared.video_buffer.try_pop();
        self.shared.report_input_level();
        sample
    }

    /// 取一块音频
    pub fn try_pop_audio(&self) -> Option<E::Sample> {
        self.shared.audio_buffer.try_pop()
    }

    /// 拆掉当前管线并为同一 URI 重新构建
    ///
    /// 同步执行：返回时新管线已进入 PAUSED 或构建失败。返回是否初始化成功。
    /// 不能与自身并发调用。
    pub fn reset(&self) -> bool {
        let _guard = self.shared.reset_lock.lock();
        info!("{} 🔄 重置管线: {}", log_ctx(), self.shared.uri());

        let previous = self.shared.pipeline.write().take();
        if let Some(previous) = previous {
            previous.release();
        }

        let (video, audio) = self.shared.drain_buffers();
        if video > 0 || audio > 0 {
            debug!("{} 🗑️  重置清空队列: {} 视频帧, {} 音频块", log_ctx(), video, audio);
        }

        self.shared.eof.store(false, Ordering::Release);
        self.shared.initialized.store(false, Ordering::Release);

        self.shared.initialize_pipeline()
    }

    /// 请求中止：通知监控线程退出，管线切到 NULL，注销 sink 回调，清空队列（幂等）
    pub fn abort(&self) {
        self.shared.abort_request.store(true, Ordering::Release);

        if let Some(handle) = self.shared.pipeline() {
            if let Err(e) = handle.pipeline().set_state(EngineState::Null) {
                warn!("{} ⚠️  中止时切换到 NULL 失败: {}", log_ctx(), e);
            }
            handle.disconnect_sinks();
        }

        self.shared.drain_buffers();
    }

    pub fn eof(&self) -> bool {
        self.shared.eof.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    pub fn width(&self) -> u32 {
        self.shared.width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u32 {
        self.shared.height.load(Ordering::Acquire)
    }

    pub fn audio_channels(&self) -> u32 {
        self.shared.audio_channels.load(Ordering::Acquire)
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.shared.audio_sample_rate.load(Ordering::Acquire)
    }

    /// 流时长（毫秒），管线第一次进入 PLAYING 之前为 0
    pub fn duration(&self) -> i64 {
        self.shared.duration_ms.load(Ordering::Acquire)
    }

    pub fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            duration_ms: self.duration(),
            width: self.width(),
            height: self.height(),
            audio_channels: self.audio_channels(),
            audio_sample_rate: self.audio_sample_rate(),
        }
    }

    /// 已观察到的引擎错误次数
    pub fn engine_errors(&self) -> u64 {
        self.shared.engine_errors.load(Ordering::Acquire)
    }

    /// 视频 sink 当前协商的 caps
    pub fn video_caps(&self) -> Option<NegotiatedCaps> {
        self.shared
            .pipeline()
            .and_then(|handle| handle.video_sink().and_then(|sink| sink.negotiated_caps()))
    }

    /// 音频 sink 当前协商的 caps
    pub fn audio_caps(&self) -> Option<NegotiatedCaps> {
        self.shared
            .pipeline()
            .and_then(|handle| handle.audio_sink().and_then(|sink| sink.negotiated_caps()))
    }

    /// 两个队列当前的长度（视频, 音频）
    pub fn buffered(&self) -> (usize, usize) {
        (self.shared.video_buffer.size(), self.shared.audio_buffer.size())
    }
}

impl<E: Engine> Drop for MediaInput<E> {
    fn drop(&mut self) {
        self.shared.abort_request.store(true, Ordering::Release);

        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }

        let handle = self.shared.pipeline.write().take();
        if let Some(handle) = handle {
            handle.release();
        }

        let (video, audio) = self.shared.drain_buffers();
        info!(
            "{} ✅ 媒体输入已关闭: {}（释放 {} 视频帧, {} 音频块）",
            log_ctx(),
            self.shared.uri(),
            video,
            audio
        );
    }
}
