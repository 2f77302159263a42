/// FFmpeg解码过滤器模块
/// FFmpeg decode filter module
use std::time::Instant;

use crossbeam_channel::Sender;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbImage;
use tracing::{info, warn};

use super::DecodedFrame;
use crate::error::PipelineError;

/// FFmpeg解码过滤器: RGB24 帧 → DecodedFrame → 处理队列
#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<DecodedFrame>,
    count: usize,
    last: Instant,
    current_fps: f64,
    /// 已送出的帧数 (即下一帧序号)
    emitted: u64,
    dropped_frames: usize,
    total_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecodedFrame>) -> Self {
        Self {
            tx,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            emitted: 0,
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    fn drop_frame(&mut self, err: PipelineError) {
        self.dropped_frames += 1;
        if self.dropped_frames <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.total_frames, err);
        }
    }

    /// 拷贝 RGB24 平面 (去掉行尾填充)
    fn copy_rgb(&self, frame: &Frame) -> Result<RgbImage, PipelineError> {
        unsafe {
            let raw = frame.as_ptr();
            if raw.is_null() {
                return Err(PipelineError::Decode("null frame".into()));
            }
            let w = (*raw).width;
            let h = (*raw).height;
            if w <= 0 || h <= 0 {
                return Err(PipelineError::Decode(format!("invalid size {}x{}", w, h)));
            }
            let (w, h) = (w as usize, h as usize);
            let data = (*raw).data[0];
            let stride = (*raw).linesize[0];
            if data.is_null() || stride < 0 || (stride as usize) < w * 3 {
                return Err(PipelineError::Decode(format!(
                    "unexpected rgb24 plane (stride {})",
                    stride
                )));
            }

            let mut buffer = Vec::with_capacity(w * h * 3);
            for y in 0..h {
                let row = std::slice::from_raw_parts(data.add(y * stride as usize), w * 3);
                buffer.extend_from_slice(row);
            }
            RgbImage::from_raw(w as u32, h as u32, buffer)
                .ok_or_else(|| PipelineError::Decode("rgb buffer size mismatch".into()))
        }
    }

    fn log_stats(&mut self) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current_fps = self.count as f64 / elapsed;
            let drop_rate = self.dropped_frames as f64 / self.total_frames.max(1) as f64 * 100.0;
            info!(
                "📺 解码统计: 解码{}帧 | 实际{:.1}fps | 总帧{} | 丢弃{} ({:.1}%)",
                self.count, self.current_fps, self.total_frames, self.dropped_frames, drop_rate
            );
            self.last = Instant::now();
            self.count = 0;
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        self.total_frames += 1;

        if frame.is_empty() || frame.is_corrupt() {
            self.drop_frame(PipelineError::Decode("empty or corrupt frame".into()));
            return Ok(None);
        }
        let image = match self.copy_rgb(&frame) {
            Ok(image) => image,
            Err(e) => {
                self.drop_frame(e);
                return Ok(None);
            }
        };

        let decoded = DecodedFrame {
            image,
            index: self.emitted,
            is_key_frame: frame.is_key(),
            pts: frame.pts(),
        };
        self.emitted += 1;
        self.count += 1;
        self.log_stats();

        // 处理循环已退出 → 停止解码
        self.tx
            .send(decoded)
            .map_err(|_| "frame receiver closed".to_string())?;
        Ok(Some(frame))
    }
}
