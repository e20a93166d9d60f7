use crate::core::{InputError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 媒体源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 本地文件路径（已确认存在）
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },

    /// 其他 URI，原样交给引擎处理
    Other(String),
}

impl MediaSource {
    /// 从 URI 字符串解析媒体源
    ///
    /// 空 URI 返回 `InvalidInput`；协议名不区分大小写
    pub fn from_uri(uri: &str) -> Result<Self> {
        if uri.trim().is_empty() {
            return Err(InputError::InvalidInput("URI 不能为空".to_string()));
        }

        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());

        let protocol = match scheme.as_deref() {
            Some("rtmp") => Some(StreamProtocol::RTMP),
            Some("rtmps") => Some(StreamProtocol::RTMPS),
            Some("http") => Some(StreamProtocol::HTTP),
            Some("https") => Some(StreamProtocol::HTTPS),
            _ => None,
        };

        if let Some(protocol) = protocol {
            return Ok(MediaSource::NetworkStream {
                url: uri.to_string(),
                protocol,
            });
        }

        let path = Path::new(uri);
        if path.exists() {
            Ok(MediaSource::LocalFile(path.to_path_buf()))
        } else {
            Ok(MediaSource::Other(uri.to_string()))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// RTMPS - TLS 上的 RTMP
    RTMPS,
    /// HTTP - 普通 HTTP 流
    HTTP,
    /// HTTPS
    HTTPS,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::RTMPS => "RTMPS",
            StreamProtocol::HTTP => "HTTP",
            StreamProtocol::HTTPS => "HTTPS",
        }
    }

    /// RTMP 系协议走专用的网络源 + decodebin 拓扑
    pub fn is_rtmp(&self) -> bool {
        matches!(self, StreamProtocol::RTMP | StreamProtocol::RTMPS)
    }
}

/// 引擎管线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Null,
    Ready,
    Paused,
    Playing,
}

/// 流信息快照（消费者每个周期轮询一次）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub duration_ms: i64,
    pub width: u32,
    pub height: u32,
    pub audio_channels: u32,
    pub audio_sample_rate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_uri_is_invalid_input() {
        assert!(matches!(MediaSource::from_uri(""), Err(InputError::InvalidInput(_))));
        assert!(matches!(MediaSource::from_uri("   "), Err(InputError::InvalidInput(_))));
    }

    #[test]
    fn network_schemes_are_case_insensitive() {
        let source = MediaSource::from_uri("RTMP://live.example.com/app/key").unwrap();
        assert_eq!(
            source,
            MediaSource::NetworkStream {
                url: "RTMP://live.example.com/app/key".to_string(),
                protocol: StreamProtocol::RTMP,
            }
        );
        assert!(source.is_network_stream());

        let source = MediaSource::from_uri("https://cdn.example.com/clip.mp4").unwrap();
        assert!(matches!(
            source,
            MediaSource::NetworkStream { protocol: StreamProtocol::HTTPS, .. }
        ));
    }

    #[test]
    fn existing_path_is_local_file() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        assert_eq!(
            MediaSource::from_uri(manifest).unwrap(),
            MediaSource::LocalFile(PathBuf::from(manifest))
        );
    }

    #[test]
    fn unknown_uri_is_passed_through() {
        let source = MediaSource::from_uri("srt://127.0.0.1:9000").unwrap();
        assert_eq!(source, MediaSource::Other("srt://127.0.0.1:9000".to_string()));
        assert!(!source.is_network_stream());

        let missing = MediaSource::from_uri("/definitely/not/here.mov").unwrap();
        assert!(matches!(missing, MediaSource::Other(_)));
    }

    #[test]
    fn stream_info_serializes_as_flat_json() {
        let info = StreamInfo {
            duration_ms: 5000,
            width: 1920,
            height: 1080,
            audio_channels: 2,
            audio_sample_rate: 48000,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(
            json,
            r#"{"duration_ms":5000,"width":1920,"height":1080,"audio_channels":2,"audio_sample_rate":48000}"#
        );
        assert_eq!(serde_json::from_str::<StreamInfo>(&json).unwrap(), info);
    }
}
