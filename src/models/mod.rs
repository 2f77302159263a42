/// 检测模型
///
/// ## 流程
/// ```text
/// 原始帧 → letterbox (右/下补零到正方形) → resize → NCHW 张量
///          ↓
///     推理引擎 InferenceEngine::run
///          ↓
///     原始输出 → decode_output (转置判定 + 逐行解码 + NMS) → Vec<Object>
/// ```
///
/// `ObjectDetector` 是逐帧处理循环使用的接口, 测试中可替换为脚本化实现.
use image::RgbImage;

use crate::detection::Object;

pub mod yolov8;

pub use yolov8::{decode_output, letterbox, YOLOv8};

/// 单帧目标检测接口
pub trait ObjectDetector {
    /// 检测结果的 `label` 均为 `None`, 顺序为 NMS 保留顺序
    fn detect(&mut self, image: &RgbImage) -> crate::Result<Vec<Object>>;
}

impl<D: ObjectDetector + ?Sized> ObjectDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> crate::Result<Vec<Object>> {
        (**self).detect(image)
    }
}
