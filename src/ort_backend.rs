// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理后端

use anyhow::Result;
use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tracing::{info, warn};

use crate::error::PipelineError;

/// 推理引擎接口: NCHW 张量进, 原始输出张量出 (按会话输出顺序)
pub trait InferenceEngine {
    fn run(&mut self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>>;
}

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrtEP {
    #[default]
    CPU,
    CUDA(i32),
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub model: String,
    pub ep: OrtEP,
    pub intra_threads: usize,
    pub trt_fp16: bool,
}

impl Default for OrtConfig {
    fn default() -> Self {
        Self {
            model: String::from("models/yolov8s.onnx"),
            ep: OrtEP::CPU,
            intra_threads: 4,
            trt_fp16: false,
        }
    }
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    model: String,
    output_names: Vec<String>,
}

impl OrtBackend {
    /// 加载模型; 加速设备注册失败时回退到 CPU
    pub fn build(config: OrtConfig) -> crate::Result<Self> {
        let mut builder = Session::builder()
            .map_err(|e| PipelineError::source_open(&config.model, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::source_open(&config.model, e))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| PipelineError::source_open(&config.model, e))?;

        let mut ep = config.ep;
        let registered = match config.ep {
            OrtEP::CPU => Ok(builder.clone()),
            OrtEP::CUDA(id) => builder.clone().with_execution_providers([
                CUDAExecutionProvider::default().with_device_id(id).build(),
            ]),
            OrtEP::Trt(id) => builder.clone().with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(id)
                    .with_fp16(config.trt_fp16)
                    .build(),
                CUDAExecutionProvider::default().with_device_id(id).build(),
            ]),
        };
        match registered {
            Ok(b) => builder = b,
            Err(e) => {
                warn!("⚠️  执行设备 {:?} 注册失败, 回退到 CPU: {}", config.ep, e);
                ep = OrtEP::CPU;
            }
        }

        let session = builder
            .commit_from_file(&config.model)
            .map_err(|e| PipelineError::source_open(&config.model, e))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        info!(
            "✅ 模型已加载: {} | EP: {:?} | 输出: {:?}",
            config.model, ep, output_names
        );

        Ok(Self {
            session,
            ep,
            model: config.model,
            output_names,
        })
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

impl InferenceEngine for OrtBackend {
    fn run(&mut self, input: ArrayD<f32>) -> Result<Vec<ArrayD<f32>>> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data = input.into_iter().collect::<Vec<f32>>();
        let tensor = Value::from_array((shape, data))?;

        let outputs = self.session.run(ort::inputs![tensor])?;
        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            ys.push(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?);
        }
        Ok(ys)
    }
}
