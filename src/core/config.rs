use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 输入适配器配置
///
/// 所有字段都有默认值，JSON 里只需写要覆盖的项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// 视频帧队列容量
    pub video_capacity: usize,
    /// 音频帧队列容量
    pub audio_capacity: usize,
    /// 总线轮询超时（毫秒），同时决定关闭延迟上限
    pub bus_poll_interval_ms: u64,
    /// HTTP 源的缓冲窗口（毫秒）
    pub http_buffer_duration_ms: u64,
    /// 初始 PAUSED 预滚等待上限（毫秒）
    pub preroll_timeout_ms: u64,
    /// 视频输出像素格式
    pub video_format: String,
    /// 音频输出采样格式
    pub audio_format: String,
    /// 音频输出采样率
    pub audio_rate: u32,
    /// 音频输出声道数
    pub audio_channels: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            video_capacity: 64,
            audio_capacity: 128,
            bus_poll_interval_ms: 100,
            http_buffer_duration_ms: 2000,
            preroll_timeout_ms: 5000,
            video_format: "BGRA".to_string(),
            audio_format: "S32LE".to_string(),
            audio_rate: 48000,
            audio_channels: 2,
        }
    }
}

impl InputConfig {
    /// 从 JSON 文件加载配置
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn bus_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bus_poll_interval_ms.max(1))
    }

    pub fn http_buffer_duration(&self) -> Duration {
        Duration::from_millis(self.http_buffer_duration_ms)
    }

    pub fn preroll_timeout(&self) -> Duration {
        Duration::from_millis(self.preroll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InputError;

    #[test]
    fn defaults_match_sink_constants() {
        let config = InputConfig::default();
        assert_eq!(config.video_capacity, 64);
        assert_eq!(config.audio_capacity, 128);
        assert_eq!(config.bus_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.http_buffer_duration(), Duration::from_secs(2));
        assert_eq!(config.audio_rate, 48000);
        assert_eq!(config.audio_channels, 2);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = InputConfig::from_json_str(r#"{ "video_capacity": 8, "audio_rate": 44100 }"#).unwrap();
        assert_eq!(config.video_capacity, 8);
        assert_eq!(config.audio_rate, 44100);
        assert_eq!(config.audio_capacity, 128);
        assert_eq!(config.video_format, "BGRA");
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = InputConfig::from_json_str("{ video_capacity: ").unwrap_err();
        assert!(matches!(err, InputError::Config(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = InputConfig::from_json_file("/no/such/media_input.json").unwrap_err();
        assert!(matches!(err, InputError::Io(_)));
    }
}
