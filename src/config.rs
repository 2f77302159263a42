// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 配置参数: 命令行 (clap) + JSON 配置文件 (serde)

use std::fs;
use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detection::{ByteTrackConfig, ReconcilerConfig};
use crate::error::{PipelineError, Result};
use crate::ort_backend::{OrtConfig, OrtEP};

/// 视频目标检测 + 身份关联 + ByteTrack 追踪
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 视频检测与身份追踪", long_about = None)]
pub struct Args {
    /// 视频文件或流地址
    #[arg(default_value = "videos/sample.mp4")]
    pub source: String,

    /// ONNX 模型路径
    #[arg(short, long, default_value = "models/yolov8s.onnx")]
    pub model: String,

    /// 类别列表 (每行一个)
    #[arg(long, default_value = "yolo_v5_model/classes.txt")]
    pub classes: String,

    /// JSON 配置文件, 不存在时写入默认值
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub cuda: bool,

    /// TensorRT (失败时回退)
    #[arg(long)]
    pub trt: bool,

    #[arg(long)]
    pub fp16: bool,

    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 覆盖置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// 覆盖 NMS IOU 阈值
    #[arg(long)]
    pub nms: Option<f32>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// 标注帧输出目录, 不指定时只打印日志
    #[arg(long)]
    pub save_dir: Option<String>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<String>,

    /// 最多处理的帧数
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// 打印每帧耗时
    #[arg(long)]
    pub profile: bool,
}

impl Args {
    /// 命令行参数覆盖配置文件
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(conf) = self.conf {
            config.detector.confidence_threshold = conf;
        }
        if let Some(nms) = self.nms {
            config.detector.nms_threshold = nms;
        }
        if let Some(width) = self.width {
            config.detector.input_width = width;
        }
        if let Some(height) = self.height {
            config.detector.input_height = height;
        }
    }

    pub fn ort_config(&self) -> OrtConfig {
        let ep = if self.trt {
            OrtEP::Trt(self.device_id)
        } else if self.cuda {
            OrtEP::CUDA(self.device_id)
        } else {
            OrtEP::CPU
        };
        OrtConfig {
            model: self.model.clone(),
            ep,
            trt_fp16: self.fp16,
            ..Default::default()
        }
    }
}

/// 检测器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// 保留每个类别的得分
    pub keep_class_scores: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 480,
            confidence_threshold: 0.4,
            nms_threshold: 0.4,
            keep_class_scores: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub reconciler: ReconcilerConfig,
    pub tracker: ByteTrackConfig,
}

impl PipelineConfig {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("📝 配置文件不存在, 创建默认配置: {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let json = fs::read_to_string(path)
            .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
        let config = serde_json::from_str(&json)
            .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
        fs::write(path, json)
            .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    pub fn print_summary(&self) {
        info!(
            "🎛️  检测: 输入 {}x{} | 置信度 {:.2} | NMS {:.2}",
            self.detector.input_width,
            self.detector.input_height,
            self.detector.confidence_threshold,
            self.detector.nms_threshold
        );
        info!(
            "🎛️  身份关联: 同身份 IOU {:.2} | 强重叠 IOU {:.2} | 保留策略 {:?}",
            self.reconciler.thresholds.same_identity_iou,
            self.reconciler.thresholds.strong_overlap_iou,
            self.reconciler.retention
        );
        info!(
            "🎛️  ByteTrack: 最大丢失帧 {} | 高分 {:.2} | 低分 {:.2}",
            self.tracker.max_lost_frames,
            self.tracker.high_score_threshold,
            self.tracker.low_score_threshold
        );
    }
}

/// 读取类别列表 (每行一个类别, 行号即类别下标)
pub fn load_class_list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
    let classes: Vec<String> = text
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();
    if classes.iter().all(|c| c.trim().is_empty()) {
        return Err(PipelineError::source_open(
            path.display().to_string(),
            "class list is empty",
        ));
    }
    Ok(classes)
}
