// 核心数据结构和类型定义

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod types;

// 重新导出常用类型
pub use config::InputConfig;
pub use diagnostics::{Color, Diagnostics, Graph, TagSeverity};
pub use error::*;
pub use types::*;
