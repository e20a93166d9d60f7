//! 脚本化的进程内引擎
//!
//! 不依赖任何真实解码器：总线消息、样本投递、失败注入都由调用方控制。
//! 样本 drop 时计数，可以验证每个样本恰好释放一次。

use crate::core::{EngineState, InputError, Result};
use crate::engine::{
    BusEvent, Engine, EngineRuntime, LaunchedPipeline, NegotiatedCaps, PipelineControl,
    SampleCallback, SampleSink, StateChangeOutcome,
};
use crate::input::pipeline::{PipelineDescription, SinkKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type SharedCallback = SampleCallback<ScriptedSample>;

/// 脚本化样本
#[derive(Debug)]
pub struct ScriptedSample {
    id: u64,
    kind: SinkKind,
    released: Arc<AtomicUsize>,
}

impl ScriptedSample {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }
}

impl Drop for ScriptedSample {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptInner {
    generation: AtomicU64,
    launches: AtomicUsize,
    failing_launches: AtomicUsize,
    failing_states: Mutex<Vec<EngineState>>,
    pause_outcome: Mutex<StateChangeOutcome>,
    reject_seeks: AtomicBool,
    panic_on_poll: AtomicBool,

    state: Mutex<EngineState>,
    state_requests: Mutex<Vec<EngineState>>,
    duration: Mutex<Option<Duration>>,
    seeks: Mutex<Vec<Duration>>,
    descriptions: Mutex<Vec<PipelineDescription>>,
    video_caps: Mutex<Option<NegotiatedCaps>>,
    audio_caps: Mutex<Option<NegotiatedCaps>>,

    events_tx: Sender<BusEvent>,
    events_rx: Receiver<BusEvent>,
    polls_started: AtomicU64,

    // 投递期间持有读锁，disconnect 取写锁时等待进行中的回调结束
    video_callback: RwLock<Option<(u64, SharedCallback)>>,
    audio_callback: RwLock<Option<(u64, SharedCallback)>>,
    next_sample_id: AtomicU64,
    released_samples: Arc<AtomicUsize>,
}

impl ScriptInner {
    fn callback_slot(&self, kind: SinkKind) -> &RwLock<Option<(u64, SharedCallback)>> {
        match kind {
            SinkKind::Video => &self.video_callback,
            SinkKind::Audio => &self.audio_callback,
        }
    }

    fn caps_slot(&self, kind: SinkKind) -> &Mutex<Option<NegotiatedCaps>> {
        match kind {
            SinkKind::Video => &self.video_caps,
            SinkKind::Audio => &self.audio_caps,
        }
    }
}

/// 脚本化引擎（克隆共享同一份脚本状态）
#[derive(Clone)]
pub struct ScriptedEngine {
    inner: Arc<ScriptInner>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            inner: Arc::new(ScriptInner {
                generation: AtomicU64::new(0),
                launches: AtomicUsize::new(0),
                failing_launches: AtomicUsize::new(0),
                failing_states: Mutex::new(Vec::new()),
                pause_outcome: Mutex::new(StateChangeOutcome::Success),
                reject_seeks: AtomicBool::new(false),
                panic_on_poll: AtomicBool::new(false),
                state: Mutex::new(EngineState::Null),
                state_requests: Mutex::new(Vec::new()),
                duration: Mutex::new(None),
                seeks: Mutex::new(Vec::new()),
                descriptions: Mutex::new(Vec::new()),
                video_caps: Mutex::new(None),
                audio_caps: Mutex::new(None),
                events_tx,
                events_rx,
                polls_started: AtomicU64::new(0),
                video_callback: RwLock::new(None),
                audio_callback: RwLock::new(None),
                next_sample_id: AtomicU64::new(0),
                released_samples: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    // ========== 失败注入 ==========

    /// 接下来 `count` 次 launch 失败
    pub fn fail_next_launches(&self, count: usize) {
        self.inner.failing_launches.store(count, Ordering::SeqCst);
    }

    /// 请求切换到 `state` 时返回失败
    pub fn fail_state(&self, state: EngineState) {
        self.inner.failing_states.lock().push(state);
    }

    pub fn clear_state_failures(&self) {
        self.inner.failing_states.lock().clear();
    }

    /// 切到 PAUSED 时返回的结果
    pub fn set_pause_outcome(&self, outcome: StateChangeOutcome) {
        *self.inner.pause_outcome.lock() = outcome;
    }

    pub fn reject_seeks(&self, reject: bool) {
        self.inner.reject_seeks.store(reject, Ordering::SeqCst);
    }

    /// 下一次总线轮询 panic
    pub fn panic_on_next_poll(&self) {
        self.inner.panic_on_poll.store(true, Ordering::SeqCst);
    }

    // ========== 流属性 ==========

    pub fn set_duration(&self, duration: Option<Duration>) {
        *self.inner.duration.lock() = duration;
    }

    pub fn set_video_caps(&self, width: u32, height: u32) {
        *self.inner.video_caps.lock() = Some(NegotiatedCaps::Video { width, height });
    }

    pub fn set_audio_caps(&self, channels: u32, rate: u32) {
        *self.inner.audio_caps.lock() = Some(NegotiatedCaps::Audio { channels, rate });
    }

    // ========== 驱动 ==========

    /// 往总线投递一条消息
    pub fn emit(&self, event: BusEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    /// 通过视频 sink 回调投递一个新样本；没有注册回调时返回 false
    pub fn push_video(&self) -> bool {
        self.push(SinkKind::Video)
    }

    /// 通过音频 sink 回调投递一个新样本
    pub fn push_audio(&self) -> bool {
        self.push(SinkKind::Audio)
    }

    fn push(&self, kind: SinkKind) -> bool {
        let slot = self.inner.callback_slot(kind).read();
        let Some((_, callback)) = slot.as_ref() else {
            return false;
        };

        let sample = ScriptedSample {
            id: self.inner.next_sample_id.fetch_add(1, Ordering::SeqCst),
            kind,
            released: Arc::clone(&self.inner.released_samples),
        };
        callback(sample);
        true
    }

    /// 等待总线消息全部被取走并处理完（监控线程开始了下一次轮询）
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        while !self.inner.events_rx.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let polls = self.inner.polls_started.load(Ordering::SeqCst);
        while self.inner.polls_started.load(Ordering::SeqCst) <= polls {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    // ========== 观察 ==========

    pub fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    pub fn state_requests(&self) -> Vec<EngineState> {
        self.inner.state_requests.lock().clone()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.inner.seeks.lock().clone()
    }

    pub fn descriptions(&self) -> Vec<PipelineDescription> {
        self.inner.descriptions.lock().clone()
    }

    pub fn released_samples(&self) -> usize {
        self.inner.released_samples.load(Ordering::SeqCst)
    }

    pub fn has_callback(&self, kind: SinkKind) -> bool {
        self.inner.callback_slot(kind).read().is_some()
    }
}

impl Engine for ScriptedEngine {
    type Sample = ScriptedSample;
    type Pipeline = ScriptedPipeline;
    type Sink = ScriptedSink;

    fn launch(
        &self,
        description: &PipelineDescription,
    ) -> Result<LaunchedPipeline<ScriptedPipeline, ScriptedSink>> {
        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        self.inner.descriptions.lock().push(description.clone());

        let failing = self.inner.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_launches.store(failing - 1, Ordering::SeqCst);
            return Err(InputError::EngineInit(format!(
                "scripted launch failure: {}",
                description.launch_line()
            )));
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.state.lock() = EngineState::Ready;

        Ok(LaunchedPipeline {
            pipeline: ScriptedPipeline {
                inner: Arc::clone(&self.inner),
            },
            video_sink: Some(ScriptedSink {
                inner: Arc::clone(&self.inner),
                kind: SinkKind::Video,
                generation,
            }),
            audio_sink: Some(ScriptedSink {
                inner: Arc::clone(&self.inner),
                kind: SinkKind::Audio,
                generation,
            }),
        })
    }
}

impl EngineRuntime for ScriptedEngine {
    fn init(debug_level: u32) -> Result<String> {
        log::debug!("scripted engine runtime init (debug level {})", debug_level);
        Ok("scripted 1.0".to_string())
    }

    fn shutdown() {}
}

/// 脚本化管线
pub struct ScriptedPipeline {
    inner: Arc<ScriptInner>,
}

impl PipelineControl for ScriptedPipeline {
    fn set_state(&self, state: EngineState) -> Result<StateChangeOutcome> {
        self.inner.state_requests.lock().push(state);

        if self.inner.failing_states.lock().contains(&state) {
            return Err(InputError::StateChange {
                target: state,
                reason: "scripted failure".to_string(),
            });
        }

        *self.inner.state.lock() = state;
        if state == EngineState::Paused {
            Ok(*self.inner.pause_outcome.lock())
        } else {
            Ok(StateChangeOutcome::Success)
        }
    }

    fn wait_for_state(&self, _timeout: Duration) -> Result<EngineState> {
        Ok(*self.inner.state.lock())
    }

    fn query_duration(&self) -> Option<Duration> {
        *self.inner.duration.lock()
    }

    fn seek(&self, position: Duration) -> Result<()> {
        if self.inner.reject_seeks.load(Ordering::SeqCst) {
            return Err(InputError::SeekRejected(format!("{:?}", position)));
        }
        self.inner.seeks.lock().push(position);
        Ok(())
    }

    fn poll_event(&self, timeout: Duration) -> Option<BusEvent> {
        self.inner.polls_started.fetch_add(1, Ordering::SeqCst);
        if self.inner.panic_on_poll.swap(false, Ordering::SeqCst) {
            panic!("scripted bus poll failure");
        }
        self.inner.events_rx.recv_timeout(timeout).ok()
    }
}

/// 脚本化 sink
pub struct ScriptedSink {
    inner: Arc<ScriptInner>,
    kind: SinkKind,
    generation: u64,
}

impl SampleSink for ScriptedSink {
    type Sample = ScriptedSample;

    fn connect_new_sample(&self, callback: SampleCallback<ScriptedSample>) {
        *self.inner.callback_slot(self.kind).write() = Some((self.generation, callback));
    }

    fn disconnect(&self) {
        let mut slot = self.inner.callback_slot(self.kind).write();
        if matches!(slot.as_ref(), Some((generation, _)) if *generation == self.generation) {
            *slot = None;
        }
    }

    fn negotiated_caps(&self) -> Option<NegotiatedCaps> {
        *self.inner.caps_slot(self.kind).lock()
    }
}
