// 媒体输入模块：帧队列、管线描述/句柄、总线监控线程、输入适配器

pub mod bus_monitor;
pub mod frame_buffer;
pub mod pipeline;
pub mod source;

pub use bus_monitor::BusMonitor;
pub use frame_buffer::FrameBuffer;
pub use pipeline::{PipelineDescription, PipelineHandle, SinkKind, SinkSpec, Topology};
pub use source::MediaInput;

use std::{process, thread};

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
