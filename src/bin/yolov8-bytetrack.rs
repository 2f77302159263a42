/// 视频检测 + 身份关联 + ByteTrack 追踪
///
/// 处理流程:
/// 1. 解码线程: 视频解码, 按顺序送出 RGB 帧与关键帧标记
/// 2. 主线程:   检测 → 身份关联 → 追踪 → 输出 (逐帧串行)
///
/// 直接运行: cargo run --bin yolov8-bytetrack --release -- videos/sample.mp4
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use yolov8_bytetrack::detection::{ByteTracker, IdentityReconciler};
use yolov8_bytetrack::renderer::{AnnotatedFrameWriter, LogRenderer, Renderer};
use yolov8_bytetrack::{load_class_list, Args, PipelineConfig, StreamProcessor, VideoDecoder, YOLOv8};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 解码线程与处理循环之间的队列深度
const FRAME_QUEUE: usize = 16;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    args.apply(&mut config);
    config.print_summary();

    let classes = load_class_list(&args.classes)?;
    info!("📦 类别数: {} ({})", classes.len(), args.classes);

    let mut detector = YOLOv8::new(args.ort_config(), classes, config.detector.clone())?;
    detector.set_profile(args.profile);
    detector.summary();
    info!(
        "🧠 检测器: {}类 | 输入 {}x{}",
        detector.names().len(),
        detector.config().input_width,
        detector.config().input_height
    );

    let mut decoder = VideoDecoder::open(&args.source, FRAME_QUEUE)?;
    let (width, height) = decoder.dimensions();
    info!("📹 输入: {} | {}x{}", decoder.source(), width, height);
    let tracker_config = config.tracker.clone().with_frame_rate(decoder.fps());
    info!(
        "🎯 ByteTrack: {:.1}fps → 最大丢失帧 {}",
        decoder.fps(),
        tracker_config.max_lost_frames
    );

    let renderer: Box<dyn Renderer> = match &args.save_dir {
        Some(dir) => {
            info!("💾 标注帧输出: {}", dir);
            Box::new(AnnotatedFrameWriter::new(dir, args.font.as_deref().map(Path::new))?)
        }
        None => Box::new(LogRenderer),
    };

    let mut processor = StreamProcessor::new(
        detector,
        IdentityReconciler::new(config.reconciler),
        ByteTracker::new(tracker_config),
        renderer,
    );
    let summary = processor.run(&mut decoder, args.max_frames);
    decoder.finish();

    let summary = summary?;
    info!(
        "📊 共 {} 帧 | 关键帧 {} | 检测 {} | 身份 {} | 跳过 {}",
        summary.frames,
        summary.key_frames,
        summary.detections,
        summary.identities_issued,
        summary.skipped_frames
    );
    Ok(())
}
