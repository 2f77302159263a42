/// 逐帧处理循环 (Stream Processor)
///
/// 单线程, 严格按解码顺序处理每一帧:
/// 关键帧重置 → 检测 → 身份关联 → 时序追踪 → 输出
///
/// 身份计数器与保留集合由本循环独占, 不跨流共享.
use std::time::Instant;

use tracing::{info, warn};

use crate::detection::{IdentityReconciler, ReconcileSummary, TrackedObject, Tracker};
use crate::error::Result;
use crate::input::{DecodedFrame, FrameSource};
use crate::models::ObjectDetector;
use crate::renderer::Renderer;

/// 一次运行的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub frames: u64,
    pub key_frames: u64,
    pub detections: u64,
    pub identities_issued: u64,
    /// 因检测异常按空结果处理的帧
    pub skipped_frames: u64,
}

/// 单帧处理结果
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub index: u64,
    pub detections: usize,
    pub reconcile: ReconcileSummary,
    pub tracked: Vec<TrackedObject>,
}

pub struct StreamProcessor<D, T, R> {
    detector: D,
    reconciler: IdentityReconciler,
    tracker: T,
    renderer: R,
    summary: RunSummary,

    // 每秒统计
    count: u64,
    last: Instant,
}

impl<D: ObjectDetector, T: Tracker, R: Renderer> StreamProcessor<D, T, R> {
    pub fn new(detector: D, reconciler: IdentityReconciler, tracker: T, renderer: R) -> Self {
        Self {
            detector,
            reconciler,
            tracker,
            renderer,
            summary: RunSummary::default(),
            count: 0,
            last: Instant::now(),
        }
    }

    pub fn reconciler(&self) -> &IdentityReconciler {
        &self.reconciler
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// 处理单帧; 只有不可恢复的错误才返回 Err
    pub fn process_frame(&mut self, frame: &DecodedFrame) -> Result<FrameOutput> {
        self.summary.frames += 1;
        if frame.is_key_frame {
            self.summary.key_frames += 1;
            self.reconciler.reset();
        }

        let detections = match self.detector.detect(&frame.image) {
            Ok(objects) => objects,
            Err(e) if e.is_recoverable() => {
                warn!("⚠️ 帧 {} 检测失败, 按无检测处理: {}", frame.index, e);
                self.summary.skipped_frames += 1;
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let detection_count = detections.len();
        self.summary.detections += detection_count as u64;

        let reconcile = self.reconciler.reconcile(detections);
        self.summary.identities_issued = self.reconciler.counter().issued();

        let tracked = self.tracker.update(self.reconciler.objects());

        if let Err(e) = self.renderer.render(frame, &tracked) {
            warn!("⚠️ 帧 {} 输出失败: {:#}", frame.index, e);
        }

        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            info!(
                "🎯 处理统计: {:.1}fps | 检测{} | 追踪{} | 已签发ID {}",
                self.count as f64 / elapsed,
                detection_count,
                self.tracker.track_count(),
                self.summary.identities_issued
            );
            self.count = 0;
            self.last = Instant::now();
        }

        Ok(FrameOutput {
            index: frame.index,
            detections: detection_count,
            reconcile,
            tracked,
        })
    }

    /// 处理到流结束或达到帧数上限
    pub fn run<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        max_frames: Option<u64>,
    ) -> Result<RunSummary> {
        let mut processed = 0u64;
        while max_frames.map_or(true, |max| processed < max) {
            let Some(frame) = source.next_frame() else {
                break;
            };
            self.process_frame(&frame)?;
            processed += 1;
        }
        info!(
            "✅ 处理结束: {}帧 (关键帧 {}) | 检测 {} | 签发ID {} | 跳过 {}",
            self.summary.frames,
            self.summary.key_frames,
            self.summary.detections,
            self.summary.identities_issued,
            self.summary.skipped_frames
        );
        Ok(self.summary)
    }

    pub fn into_parts(self) -> (D, IdentityReconciler, T, R) {
        (self.detector, self.reconciler, self.tracker, self.renderer)
    }
}
