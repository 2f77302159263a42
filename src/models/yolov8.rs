// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型
// 包含: letterbox、预处理、推理、输出解码 + NMS

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Context;
use fast_image_resize as fr;
use image::{imageops, RgbImage};
use ndarray::{s, Array4, ArrayD, ArrayView2, Axis, Ix2};
use tracing::info;

use super::ObjectDetector;
use crate::config::DetectorConfig;
use crate::detection::Object;
use crate::error::PipelineError;
use crate::ort_backend::{InferenceEngine, OrtBackend, OrtConfig};
use crate::{non_max_suppression, Rect};

/// 前4列为 cx, cy, w, h
const CXYWH_OFFSET: usize = 4;

pub struct YOLOv8<E: InferenceEngine = OrtBackend> {
    engine: E,
    names: Vec<String>,
    config: DetectorConfig,
    resizer: fr::Resizer,
    profile: bool,
}

impl YOLOv8<OrtBackend> {
    /// 加载 ONNX 模型
    pub fn new(
        ort: OrtConfig,
        names: Vec<String>,
        config: DetectorConfig,
    ) -> crate::Result<Self> {
        let engine = OrtBackend::build(ort)?;
        Ok(Self::with_engine(engine, names, config))
    }

    pub fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Model: {}\n\
            > EP: {:?}\n\
            > Outputs: {:?}\n\
            > Input: {}x{}\n\
            > nc: {}, conf: {}, nms: {}\n",
            self.engine.model(),
            self.engine.ep(),
            self.engine.output_names(),
            self.config.input_width,
            self.config.input_height,
            self.names.len(),
            self.config.confidence_threshold,
            self.config.nms_threshold,
        );
    }
}

impl<E: InferenceEngine> YOLOv8<E> {
    pub fn with_engine(engine: E, names: Vec<String>, config: DetectorConfig) -> Self {
        Self {
            engine,
            names,
            config,
            resizer: fr::Resizer::new(),
            profile: false,
        }
    }

    pub fn set_profile(&mut self, profile: bool) {
        self.profile = profile;
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// letterbox → 双线性缩放到输入尺寸 (不保持宽高比) → NCHW / 255
    pub fn preprocess(&mut self, image: &RgbImage) -> anyhow::Result<ArrayD<f32>> {
        let (width, height) = (self.config.input_width, self.config.input_height);
        let padded = letterbox(image);

        let src = fr::images::Image::from_vec_u8(
            padded.width(),
            padded.height(),
            padded.into_raw(),
            fr::PixelType::U8x3,
        )
        .context("letterbox 图像缓冲区无效")?;
        let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        let (w, h) = (width as usize, height as usize);
        let mut xs = Array4::<f32>::zeros((1, 3, h, w));
        for (i, rgb) in dst.buffer().chunks_exact(3).enumerate() {
            let (y, x) = (i / w, i % w);
            xs[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
            xs[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
            xs[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
        }
        Ok(xs.into_dyn())
    }

    pub fn postprocess(
        &self,
        outputs: &[ArrayD<f32>],
        image_width: u32,
        image_height: u32,
    ) -> crate::Result<Vec<Object>> {
        decode_output(outputs, &self.names, image_width, image_height, &self.config)
    }
}

impl<E: InferenceEngine> ObjectDetector for YOLOv8<E> {
    fn detect(&mut self, image: &RgbImage) -> crate::Result<Vec<Object>> {
        let t_pre = Instant::now();
        let xs = self.preprocess(image)?;
        if self.profile {
            info!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = Instant::now();
        let ys = self.engine.run(xs)?;
        if self.profile {
            info!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = Instant::now();
        let objects = self.postprocess(&ys, image.width(), image.height())?;
        if self.profile {
            info!("[Model Postprocess]: {:?}", t_post.elapsed());
        }
        Ok(objects)
    }
}

/// 右/下补零到 max(w, h) 正方形, 原图位于左上角
pub fn letterbox(image: &RgbImage) -> RgbImage {
    let side = image.width().max(image.height());
    let mut canvas = RgbImage::new(side, side);
    imageops::replace(&mut canvas, image, 0, 0);
    canvas
}

/// 解码模型输出为检测目标 (坐标为原图像素)
///
/// 输出形如 `[batch, rows, dims]` 或 `[batch, dims, rows]`, `dims = 4 + C`.
/// 第二维大于第一维时视为转置布局. `rows == 0` 返回空列表.
pub fn decode_output(
    outputs: &[ArrayD<f32>],
    class_names: &[String],
    image_width: u32,
    image_height: u32,
    config: &DetectorConfig,
) -> crate::Result<Vec<Object>> {
    let output = outputs
        .first()
        .ok_or_else(|| PipelineError::ModelOutput("inference produced no outputs".into()))?;
    if output.ndim() != 3 || output.shape()[0] == 0 {
        return Err(PipelineError::ModelOutput(format!(
            "expected [batch, rows, dims], got {:?}",
            output.shape()
        )));
    }

    let batch = output.index_axis(Axis(0), 0);
    let mut preds: ArrayView2<f32> = batch
        .into_dimensionality::<Ix2>()
        .map_err(|e| PipelineError::ModelOutput(e.to_string()))?;
    if preds.is_empty() {
        return Ok(Vec::new());
    }
    if preds.ncols() > preds.nrows() {
        preds = preds.reversed_axes();
    }

    let dims = preds.ncols();
    if dims <= CXYWH_OFFSET {
        return Err(PipelineError::ModelOutput(format!(
            "no class scores in output {:?}",
            output.shape()
        )));
    }

    let nc = (dims - CXYWH_OFFSET).min(class_names.len());
    let side = image_width.max(image_height) as f32;
    let x_factor = side / config.input_width as f32;
    let y_factor = side / config.input_height as f32;
    let (img_w, img_h) = (image_width as f32, image_height as f32);

    let mut class_ids = Vec::new();
    let mut confidences = Vec::new();
    let mut boxes = Vec::new();
    let mut row_indices = Vec::new();
    for (row_idx, pred) in preds.outer_iter().enumerate() {
        let scores = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);
        let Some((class_id, &confidence)) = scores
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };
        if confidence <= config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
        let left = ((cx - 0.5 * w) * x_factor).trunc().max(0.0);
        let top = ((cy - 0.5 * h) * y_factor).trunc().max(0.0);
        let mut width = (w * x_factor).trunc();
        let mut height = (h * y_factor).trunc();
        if left + width > img_w - 1.0 {
            width = img_w - left - 1.0;
        }
        if top + height > img_h - 1.0 {
            height = img_h - top - 1.0;
        }

        class_ids.push(class_id);
        confidences.push(confidence);
        boxes.push(Rect::new(left, top, width.max(0.0), height.max(0.0)));
        row_indices.push(row_idx);
    }

    let keep = non_max_suppression(
        &boxes,
        &confidences,
        config.confidence_threshold,
        config.nms_threshold,
    );

    let objects = keep
        .into_iter()
        .map(|i| {
            let class_id = class_ids[i];
            let object = Object::new(boxes[i], confidences[i], class_id, &class_names[class_id]);
            if config.keep_class_scores {
                let pred = preds.row(row_indices[i]);
                let scores: BTreeMap<String, f32> = class_names[..nc]
                    .iter()
                    .enumerate()
                    .map(|(c, name)| (name.clone(), pred[CXYWH_OFFSET + c]))
                    .collect();
                object.with_class_scores(scores)
            } else {
                object
            }
        })
        .collect();
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array3, IxDyn};

    struct FixedEngine {
        outputs: Vec<ArrayD<f32>>,
        seen_shape: Option<Vec<usize>>,
    }

    impl InferenceEngine for FixedEngine {
        fn run(&mut self, input: ArrayD<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            self.seen_shape = Some(input.shape().to_vec());
            Ok(self.outputs.clone())
        }
    }

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    /// 8 行候选, 第3行为 cx=100 cy=120 w=40 h=60, 类别 b 得分 0.9
    fn canonical_rows() -> Array3<f32> {
        let mut rows = Array3::<f32>::zeros((1, 8, 6));
        rows[[0, 3, 0]] = 100.0;
        rows[[0, 3, 1]] = 120.0;
        rows[[0, 3, 2]] = 40.0;
        rows[[0, 3, 3]] = 60.0;
        rows[[0, 3, 4]] = 0.1;
        rows[[0, 3, 5]] = 0.9;
        rows
    }

    fn assert_single_b(objects: &[Object]) {
        assert_eq!(objects.len(), 1);
        let obj = &objects[0];
        assert_eq!(obj.class_name, "b");
        assert_eq!(obj.class_id, 1);
        assert_eq!(obj.label, None);
        assert_relative_eq!(obj.prob, 0.9);
        assert_relative_eq!(obj.rect.x(), 80.0);
        assert_relative_eq!(obj.rect.y(), 120.0);
        assert_relative_eq!(obj.rect.width(), 40.0);
        assert_relative_eq!(obj.rect.height(), 80.0);
    }

    #[test]
    fn test_decode_transposed_layout() {
        // [1, dims, rows] = [1, 6, 8]
        let transposed = canonical_rows().permuted_axes([0, 2, 1]).to_owned().into_dyn();
        assert_eq!(transposed.shape(), &[1, 6, 8]);
        let objects =
            decode_output(&[transposed], &names(), 640, 480, &DetectorConfig::default()).unwrap();
        assert_single_b(&objects);
    }

    #[test]
    fn test_decode_canonical_layout() {
        let objects = decode_output(
            &[canonical_rows().into_dyn()],
            &names(),
            640,
            480,
            &DetectorConfig::default(),
        )
        .unwrap();
        assert_single_b(&objects);
    }

    #[test]
    fn test_decode_clamps_to_image() {
        let mut rows = Array3::<f32>::zeros((1, 8, 6));
        // 左上越界
        rows[[0, 0, 0]] = 5.0;
        rows[[0, 0, 1]] = 5.0;
        rows[[0, 0, 2]] = 40.0;
        rows[[0, 0, 3]] = 30.0;
        rows[[0, 0, 4]] = 0.8;
        // 右下越界
        rows[[0, 1, 0]] = 620.0;
        rows[[0, 1, 1]] = 350.0;
        rows[[0, 1, 2]] = 60.0;
        rows[[0, 1, 3]] = 30.0;
        rows[[0, 1, 5]] = 0.7;
        let config = DetectorConfig {
            input_width: 640,
            input_height: 640,
            ..Default::default()
        };
        let objects = decode_output(&[rows.into_dyn()], &names(), 640, 480, &config).unwrap();
        assert_eq!(objects.len(), 2);

        let a = &objects[0];
        assert_eq!(a.class_name, "a");
        assert_eq!((a.rect.x(), a.rect.y()), (0.0, 0.0));
        assert_eq!((a.rect.width(), a.rect.height()), (40.0, 30.0));

        let b = &objects[1];
        assert_eq!((b.rect.x(), b.rect.y()), (590.0, 335.0));
        assert_eq!(b.rect.width(), 640.0 - 590.0 - 1.0);
        assert_eq!(b.rect.height(), 30.0);
        assert!(b.rect.right() < 640.0);
    }

    #[test]
    fn test_decode_threshold_and_nms() {
        let mut rows = Array3::<f32>::zeros((1, 8, 6));
        for (r, (cx, score)) in [(100.0, 0.6), (102.0, 0.8), (300.0, 0.4)].iter().enumerate() {
            rows[[0, r, 0]] = *cx;
            rows[[0, r, 1]] = 100.0;
            rows[[0, r, 2]] = 50.0;
            rows[[0, r, 3]] = 50.0;
            rows[[0, r, 4]] = *score;
        }
        let config = DetectorConfig {
            input_width: 640,
            input_height: 640,
            ..Default::default()
        };
        let objects = decode_output(&[rows.into_dyn()], &names(), 640, 640, &config).unwrap();
        // 0.4 不超过阈值; 0.6 被 0.8 抑制
        assert_eq!(objects.len(), 1);
        assert_relative_eq!(objects[0].prob, 0.8);
    }

    #[test]
    fn test_decode_fewer_rows_than_dims_reads_as_transposed() {
        // [1, 3, 6] 按转置布局解读为 dims = 3, 没有类别列
        let mut short = Array3::<f32>::zeros((1, 3, 6));
        short[[0, 0, 0]] = 100.0;
        short[[0, 0, 1]] = 100.0;
        short[[0, 0, 2]] = 50.0;
        short[[0, 0, 3]] = 50.0;
        short[[0, 0, 4]] = 0.9;
        let err = decode_output(&[short.into_dyn()], &names(), 640, 480, &DetectorConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelOutput(_)));
    }

    #[test]
    fn test_decode_keeps_class_scores() {
        let config = DetectorConfig {
            keep_class_scores: true,
            ..Default::default()
        };
        let objects =
            decode_output(&[canonical_rows().into_dyn()], &names(), 640, 480, &config).unwrap();
        let scores = objects[0].class_scores.as_ref().unwrap();
        assert_relative_eq!(scores["a"], 0.1);
        assert_relative_eq!(scores["b"], 0.9);
    }

    #[test]
    fn test_decode_errors() {
        let config = DetectorConfig::default();
        let err = decode_output(&[], &names(), 640, 480, &config).unwrap_err();
        assert!(matches!(err, PipelineError::ModelOutput(_)));
        assert!(err.is_recoverable());

        let no_classes = ArrayD::<f32>::zeros(IxDyn(&[1, 8, 4]));
        assert!(matches!(
            decode_output(&[no_classes], &names(), 640, 480, &config),
            Err(PipelineError::ModelOutput(_))
        ));

        let rank2 = ArrayD::<f32>::zeros(IxDyn(&[8, 6]));
        assert!(matches!(
            decode_output(&[rank2], &names(), 640, 480, &config),
            Err(PipelineError::ModelOutput(_))
        ));
    }

    #[test]
    fn test_decode_zero_rows_is_empty() {
        let empty = ArrayD::<f32>::zeros(IxDyn(&[1, 0, 6]));
        let objects =
            decode_output(&[empty], &names(), 640, 480, &DetectorConfig::default()).unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn test_letterbox_pads_bottom_right() {
        let image = RgbImage::from_pixel(4, 2, image::Rgb([255, 255, 255]));
        let padded = letterbox(&image);
        assert_eq!(padded.dimensions(), (4, 4));
        assert_eq!(padded.get_pixel(3, 1).0, [255, 255, 255]);
        assert_eq!(padded.get_pixel(0, 2).0, [0, 0, 0]);
        assert_eq!(padded.get_pixel(3, 3).0, [0, 0, 0]);
    }

    #[test]
    fn test_detect_with_engine() {
        let engine = FixedEngine {
            outputs: vec![canonical_rows().permuted_axes([0, 2, 1]).to_owned().into_dyn()],
            seen_shape: None,
        };
        let mut model = YOLOv8::with_engine(engine, names(), DetectorConfig::default());
        assert_eq!(model.names(), names().as_slice());
        assert_eq!(model.config().input_width, 640);
        let frame = RgbImage::new(640, 480);
        let objects = model.detect(&frame).unwrap();
        assert_single_b(&objects);
        assert_eq!(model.engine_mut().seen_shape, Some(vec![1, 3, 480, 640]));
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let engine = FixedEngine {
            outputs: vec![],
            seen_shape: None,
        };
        let config = DetectorConfig {
            input_width: 4,
            input_height: 4,
            ..Default::default()
        };
        let mut model = YOLOv8::with_engine(engine, names(), config);
        let image = RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 0]));
        let xs = model.preprocess(&image).unwrap();
        assert_eq!(xs.shape(), &[1, 3, 4, 4]);
        assert_relative_eq!(xs[[0, 0, 0, 0]], 1.0, epsilon = 1e-3);
        assert_relative_eq!(xs[[0, 1, 0, 0]], 0.0, epsilon = 1e-3);
        assert_relative_eq!(xs[[0, 0, 3, 3]], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_detect_without_outputs_is_model_output_error() {
        let engine = FixedEngine {
            outputs: vec![],
            seen_shape: None,
        };
        let mut model = YOLOv8::with_engine(engine, names(), DetectorConfig::default());
        let err = model.detect(&RgbImage::new(64, 48)).unwrap_err();
        assert!(matches!(err, PipelineError::ModelOutput(_)));
    }
}
