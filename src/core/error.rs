use crate::core::EngineState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("引擎初始化失败: {0}")]
    EngineInit(String),

    #[error("状态切换失败 ({target:?}): {reason}")]
    StateChange {
        target: EngineState,
        reason: String,
    },

    #[error("Seek 被引擎拒绝: {0}")]
    SeekRejected(String),

    #[error("引擎运行时错误: {0}")]
    Runtime(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InputError>;
