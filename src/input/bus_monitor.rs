use crate::core::{EngineState, Result};
use crate::engine::{BusEvent, Engine, EventSource, PipelineControl};
use crate::input::log_ctx;
use crate::input::pipeline::PipelineHandle;
use crate::input::source::InputShared;
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 总线监控线程
///
/// 每个周期带超时（默认 100ms）轮询一次总线，超时后重新检查中止标志，
/// 所以 `stop()` 最多等待一个轮询周期。
pub struct BusMonitor {
    thread_handle: Option<JoinHandle<()>>,
    abort_request: Arc<AtomicBool>,
}

impl BusMonitor {
    /// 启动监控线程
    pub(crate) fn spawn<E: Engine>(shared: Arc<InputShared<E>>) -> Result<Self> {
        let abort_request = shared.abort_flag();

        let thread_handle = thread::Builder::new()
            .name("media_input::bus".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| Self::monitor_loop(&shared)));
                if let Err(payload) = outcome {
                    error!(
                        "{} ❌ 总线监控线程异常退出，不再接收 EOS/错误/时长更新: {}",
                        log_ctx(),
                        panic_message(payload.as_ref())
                    );
                }
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            abort_request,
        })
    }

    /// 监控循环（在独立线程中运行）
    fn monitor_loop<E: Engine>(shared: &InputShared<E>) {
        info!("{} 🛰️  总线监控线程启动: {}", log_ctx(), shared.uri());

        let poll_interval = shared.config().bus_poll_interval();
        let mut event_count: u64 = 0;

        while !shared.abort_requested() {
            // 每个周期重新取管线：reset() 之后总线也换了
            let Some(handle) = shared.pipeline() else {
                thread::sleep(poll_interval);
                continue;
            };

            let Some(event) = handle.pipeline().poll_event(poll_interval) else {
                continue;
            };
            event_count += 1;

            if !shared.is_current(&handle) {
                debug!("{} 丢弃已替换管线的消息: {:?}", log_ctx(), event);
                continue;
            }

            Self::dispatch(shared, &handle, event);
        }

        info!("{} 🛑 总线监控线程退出（共处理 {} 条消息）", log_ctx(), event_count);
    }

    /// 处理一条总线消息
    pub(crate) fn dispatch<E: Engine>(
        shared: &InputShared<E>,
        handle: &PipelineHandle<E>,
        event: BusEvent,
    ) {
        match event {
            BusEvent::EndOfStream => {
                if shared.loop_playback().unwrap_or(false) {
                    info!("{} 🔁 到达流末尾，循环播放：回到起点", log_ctx());
                    shared.seek(0, true);
                } else {
                    info!("{} 📄 到达流末尾", log_ctx());
                    shared.mark_eof();
                }
            }
            BusEvent::Error { message, detail } => {
                shared.count_engine_error();
                error!(
                    "{} ❌ 引擎错误: {} {}",
                    log_ctx(),
                    message,
                    detail.unwrap_or_default()
                );
            }
            BusEvent::Warning { message, detail } => {
                warn!(
                    "{} ⚠️  引擎警告: {} {}",
                    log_ctx(),
                    message,
                    detail.unwrap_or_default()
                );
            }
            BusEvent::StateChanged {
                source: EventSource::Pipeline,
                old,
                new,
                ..
            } => {
                debug!("{} 管线状态: {:?} -> {:?}", log_ctx(), old, new);
                if new == EngineState::Playing {
                    shared.on_playing(handle);
                }
            }
            // 子元素的状态切换和其他消息都忽略
            BusEvent::StateChanged { .. } | BusEvent::Other(_) => {}
        }
    }

    /// 通知线程退出并等待结束
    pub fn stop(&mut self) {
        self.abort_request.store(true, Ordering::Release);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                warn!("{} ⚠️  总线监控线程 join 失败", log_ctx());
            }
        }
    }
}

impl Drop for BusMonitor {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
