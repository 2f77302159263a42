// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Pipeline errors)
//!
//! 资源类错误 (视频/模型/类别文件) 在处理任何帧之前直接终止;
//! 单帧的推理/解码异常降级为 "本帧无检测", 不中断视频流.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// 视频、模型或类别列表无法打开
    #[error("failed to open {resource}: {reason}")]
    SourceOpen { resource: String, reason: String },

    /// 容器中没有可用的视频流
    #[error("no usable video stream: {0}")]
    StreamInfo(String),

    /// 模型输出的秩/形状不符合预期
    #[error("unexpected model output: {0}")]
    ModelOutput(String),

    /// 单个数据包/帧解码失败
    #[error("decode error: {0}")]
    Decode(String),

    /// 推理引擎执行失败
    #[error("inference failed: {0}")]
    Inference(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn source_open(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceOpen {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// 帧级错误可以跳过当前帧继续处理
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModelOutput(_) | Self::Decode(_) | Self::Inference(_)
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
