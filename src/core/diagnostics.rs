use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;

/// 标签严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagSeverity {
    Info,
    Warning,
    Error,
}

/// RGBA 颜色（0.0 - 1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }
}

/// 诊断输出（仪表值 + 事件标签）
///
/// 实现必须可以被任意线程并发调用；上报失败不能影响调用方
pub trait Diagnostics: Send + Sync {
    /// 设置命名仪表值
    fn set_value(&self, name: &str, value: f64);

    /// 打一个命名事件标签
    fn set_tag(&self, severity: TagSeverity, name: &str);

    /// 为仪表/标签指定显示颜色
    fn set_color(&self, _name: &str, _color: Color) {}
}

/// 诊断图 - 记录最近的仪表值、标签次数和颜色
#[derive(Debug, Default)]
pub struct Graph {
    values: Mutex<HashMap<String, f64>>,
    tags: Mutex<HashMap<(TagSeverity, String), u64>>,
    colors: Mutex<HashMap<String, Color>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次的仪表值
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.lock().get(name).copied()
    }

    /// 某个标签被打过的次数
    pub fn tag_count(&self, severity: TagSeverity, name: &str) -> u64 {
        self.tags
            .lock()
            .get(&(severity, name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn color(&self, name: &str) -> Option<Color> {
        self.colors.lock().get(name).copied()
    }
}

impl Diagnostics for Graph {
    fn set_value(&self, name: &str, value: f64) {
        self.values.lock().insert(name.to_string(), value);
    }

    fn set_tag(&self, severity: TagSeverity, name: &str) {
        trace!("📍 诊断标签: {:?} {}", severity, name);
        *self.tags.lock().entry((severity, name.to_string())).or_insert(0) += 1;
    }

    fn set_color(&self, name: &str, color: Color) {
        self.colors.lock().insert(name.to_string(), color);
    }
}
