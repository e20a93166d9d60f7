// 进程级引擎运行时
//
// 在创建任何 MediaInput 之前调用一次 init，所有 MediaInput 销毁之后调用一次 shutdown。

use crate::core::{InputError, Result};
use crate::engine::EngineRuntime;
use log::{info, warn};
use parking_lot::Mutex;

/// 调试级别环境变量
pub const DEBUG_LEVEL_ENV: &str = "MEDIA_INPUT_GST_DEBUG_LEVEL";

/// 默认调试级别（2 = warning）
pub const DEFAULT_DEBUG_LEVEL: u32 = 2;

struct RuntimeState {
    engine: &'static str,
    debug_level: u32,
}

static RUNTIME: Mutex<Option<RuntimeState>> = parking_lot::const_mutex(None);

/// 解析调试级别；无法解析时使用默认值
pub fn parse_debug_level(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_DEBUG_LEVEL)
}

/// 从环境变量读取调试级别
pub fn debug_level_from_env() -> u32 {
    parse_debug_level(std::env::var(DEBUG_LEVEL_ENV).ok().as_deref())
}

/// 初始化引擎运行时（进程内只能初始化一次，直到 shutdown）
pub fn init<R: EngineRuntime>() -> Result<()> {
    init_with_level::<R>(debug_level_from_env())
}

pub fn init_with_level<R: EngineRuntime>(debug_level: u32) -> Result<()> {
    let mut runtime = RUNTIME.lock();
    if let Some(state) = runtime.as_ref() {
        return Err(InputError::Runtime(format!(
            "引擎运行时已经初始化 ({}, debug level {})",
            state.engine, state.debug_level
        )));
    }

    let version = R::init(debug_level)?;
    info!("✅ 引擎运行时初始化成功: {} (debug level {})", version, debug_level);

    *runtime = Some(RuntimeState {
        engine: std::any::type_name::<R>(),
        debug_level,
    });
    Ok(())
}

/// 关闭引擎运行时；未初始化时只记录警告
pub fn shutdown<R: EngineRuntime>() {
    let mut runtime = RUNTIME.lock();
    if runtime.take().is_none() {
        warn!("⚠️  引擎运行时未初始化，忽略 shutdown");
        return;
    }

    R::shutdown();
    info!("🛑 引擎运行时已关闭");
}

pub fn is_initialized() -> bool {
    RUNTIME.lock().is_some()
}
