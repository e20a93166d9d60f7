use anyhow::{bail, Context, Result};
use log::{info, warn};
use media_input::engine::gst::GstEngine;
use media_input::{runtime, Graph, InputConfig, MediaInput};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const USAGE: &str = "用法: media_input <uri> [--loop] [--config <file.json>] [--seconds <N>]";

/// 命令行参数
#[derive(Debug)]
struct Args {
    uri: String,
    loop_playback: bool,
    config: Option<PathBuf>,
    seconds: u64,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut uri = None;
        let mut loop_playback = false;
        let mut config = None;
        let mut seconds = 10;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--loop" => loop_playback = true,
                "--config" => {
                    let path = args.next().context("--config 需要一个文件路径")?;
                    config = Some(PathBuf::from(path));
                }
                "--seconds" => {
                    let value = args.next().context("--seconds 需要一个数字")?;
                    seconds = value
                        .parse()
                        .with_context(|| format!("无效的秒数: {}", value))?;
                }
                "-h" | "--help" => {
                    println!("{}", USAGE);
                    std::process::exit(0);
                }
                _ if uri.is_none() => uri = Some(arg),
                _ => bail!("多余的参数: {}\n{}", arg, USAGE),
            }
        }

        Ok(Self {
            uri: uri.context(USAGE)?,
            loop_playback,
            config,
            seconds,
        })
    }
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse()?;
    info!("🎬 media_input 启动: {:?}", args);

    let config = match &args.config {
        Some(path) => InputConfig::from_json_file(path)
            .with_context(|| format!("读取配置失败: {}", path.display()))?,
        None => InputConfig::default(),
    };

    runtime::init::<GstEngine>().context("GStreamer 初始化失败")?;
    let outcome = run(&args, config);
    runtime::shutdown::<GstEngine>();
    outcome
}

fn run(args: &Args, config: InputConfig) -> Result<()> {
    let graph = Arc::new(Graph::new());
    let input = MediaInput::with_config(
        GstEngine,
        &args.uri,
        Some(args.loop_playback),
        config,
        graph.clone(),
    )?;

    if !input.is_initialized() {
        warn!("⚠️  管线初始化失败，尝试重置一次");
        if !input.reset() {
            bail!("无法为 {} 构建管线", args.uri);
        }
    }

    input.start();

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut last_report = Instant::now();
    let (mut video_frames, mut audio_chunks) = (0u64, 0u64);

    while Instant::now() < deadline && !input.eof() {
        while input.try_pop_video().is_some() {
            video_frames += 1;
        }
        while input.try_pop_audio().is_some() {
            audio_chunks += 1;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let (video_buffered, audio_buffered) = input.buffered();
            info!(
                "📊 视频 {} 帧, 音频 {} 块, 队列 {}/{}, 背压 {:.2}, 引擎错误 {}",
                video_frames,
                audio_chunks,
                video_buffered,
                audio_buffered,
                graph.value("input").unwrap_or(0.0),
                input.engine_errors()
            );
            last_report = Instant::now();
        }

        thread::sleep(Duration::from_millis(5));
    }

    let info = serde_json::to_string(&input.stream_info())?;
    info!(
        "✅ 结束: {}，共 {} 视频帧 / {} 音频块 (eof: {})",
        info,
        video_frames,
        audio_chunks,
        input.eof()
    );

    input.stop();
    drop(input);
    Ok(())
}
