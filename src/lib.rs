//! 媒体输入适配器
//!
//! 把一个 URI（本地文件、RTMP/HTTP 流或引擎能识别的任何地址）交给解码引擎，
//! 解码后的视频帧和音频块放进两个有界队列，实时消费者非阻塞地取用。
//!
//! ```ignore
//! use media_input::engine::gst::GstEngine;
//! use media_input::{runtime, MediaInput};
//!
//! runtime::init::<GstEngine>()?;
//! let input = MediaInput::open(GstEngine, "rtmp://live.example.com/app/key", Some(false))?;
//! input.start();
//! while let Some(frame) = input.try_pop_video() {
//!     // ...
//! }
//! drop(input);
//! runtime::shutdown::<GstEngine>();
//! ```

pub mod core;
pub mod engine;
pub mod input;
pub mod runtime;

pub use crate::core::{
    Color, Diagnostics, EngineState, Graph, InputConfig, InputError, MediaSource, Result,
    StreamInfo, StreamProtocol, TagSeverity,
};
pub use crate::engine::{BusEvent, Engine, EngineRuntime, EventSource, NegotiatedCaps};
pub use crate::input::{FrameBuffer, MediaInput, PipelineDescription, SinkKind};
