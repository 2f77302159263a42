// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数 (CLI + JSON)
pub mod detection; // 身份关联与目标追踪
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod models; // 检测模型
pub mod ort_backend; // ONNX Runtime 推理后端
pub mod pipeline; // 逐帧处理循环
pub mod renderer; // 结果输出

pub use crate::config::{load_class_list, Args, DetectorConfig, PipelineConfig};
pub use crate::detection::{
    ByteTrackConfig, ByteTracker, IdentityReconciler, Object, ReconcilerConfig, RetentionPolicy,
    TrackId, TrackedObject, Tracker,
};
pub use crate::error::{PipelineError, Result};
pub use crate::input::{DecodedFrame, FrameSource, VideoDecoder};
pub use crate::models::{ObjectDetector, YOLOv8};
pub use crate::ort_backend::{InferenceEngine, OrtBackend, OrtConfig, OrtEP};
pub use crate::pipeline::{FrameOutput, RunSummary, StreamProcessor};
pub use crate::renderer::{AnnotatedFrameWriter, LogRenderer, Renderer};

use serde::{Deserialize, Serialize};

/// 贪心 NMS, 返回保留框的下标 (按置信度降序)
///
/// 置信度 `<= score_threshold` 的框直接丢弃; 与已保留框 IOU 大于
/// `iou_threshold` 的框被抑制. 同分框保持输入顺序.
pub fn non_max_suppression(
    boxes: &[Rect],
    scores: &[f32],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
        .filter(|&i| scores[i] > score_threshold)
        .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep: Vec<usize> = Vec::with_capacity(order.len());
    for index in order {
        let drop = keep
            .iter()
            .any(|&prev| boxes[prev].iou(&boxes[index]) > iou_threshold);
        if !drop {
            keep.push(index);
        }
    }
    keep
}

/// 轴对齐矩形 (左上角 + 宽高, 像素坐标)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2., cy - height / 2., width, height)
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2., self.y + self.height / 2.)
    }

    pub fn intersection_area(&self, another: &Rect) -> f32 {
        let l = self.x.max(another.x);
        let t = self.y.max(another.y);
        let r = self.right().min(another.right());
        let b = self.bottom().min(another.bottom());
        if r <= l || b <= t {
            return 0.0;
        }
        (r - l) * (b - t)
    }

    pub fn union(&self, another: &Rect) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    /// 交并比, 不相交或并集面积为 0 时返回 0
    pub fn iou(&self, another: &Rect) -> f32 {
        let inter = self.intersection_area(another);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.union(another);
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}
