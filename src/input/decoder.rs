/// 视频解码器 (文件或网络流)
/// Video decoder running ffmpeg on a worker thread
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use tracing::{info, warn};

use super::decode_filter::DecodeFilter;
use super::{DecodedFrame, FrameSource};
use crate::error::{PipelineError, Result};

pub struct VideoDecoder {
    source: String,
    frames: Receiver<DecodedFrame>,
    worker: Option<JoinHandle<()>>,
    fps: f64,
    width: u32,
    height: u32,
}

impl VideoDecoder {
    /// 探测视频流并启动解码线程, `queue` 为解码线程与处理循环之间的队列深度
    pub fn open(source: &str, queue: usize) -> Result<Self> {
        let info = find_video_stream_info(source.to_string())
            .map_err(|e| PipelineError::source_open(source, e))?;
        let Some(StreamInfo::Video {
            fps, width, height, ..
        }) = info
        else {
            return Err(PipelineError::StreamInfo(format!(
                "{} contains no video stream",
                source
            )));
        };
        info!("📹 视频流: {} | {}x{} | {:.2}fps", source, width, height, fps);

        let (tx, rx) = bounded::<DecodedFrame>(queue.max(1));
        let (status_tx, status_rx) = bounded::<std::result::Result<(), String>>(1);
        let url = source.to_string();
        let worker = thread::Builder::new()
            .name("video-decode".into())
            .spawn(move || run_decoder(url, DecodeFilter::new(tx), status_tx))
            .map_err(|e| PipelineError::source_open(source, e))?;

        // 启动失败在处理任何帧之前报告
        match status_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = worker.join();
                return Err(PipelineError::source_open(source, reason));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(PipelineError::source_open(source, "decoder thread exited"));
            }
        }

        Ok(Self {
            source: source.to_string(),
            frames: rx,
            worker: Some(worker),
            fps,
            width: width as u32,
            height: height as u32,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 关闭队列并等待解码线程退出
    pub fn finish(self) {
        let VideoDecoder { frames, worker, .. } = self;
        drop(frames);
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("❌ 解码线程异常退出");
            }
        }
        info!("✅ 解码线程已退出");
    }
}

impl FrameSource for VideoDecoder {
    fn next_frame(&mut self) -> Option<DecodedFrame> {
        self.frames.recv().ok()
    }
}

fn run_decoder(
    url: String,
    filter: DecodeFilter,
    status: Sender<std::result::Result<(), String>>,
) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let ctx = FfmpegContext::builder()
        .input(Input::new(url.as_str()))
        .filter_descs(["format=rgb24"].into())
        .output(out)
        .build();
    let ctx = match ctx {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = status.send(Err(format!("构建失败: {}", e)));
            return;
        }
    };

    let sch = match ctx.start() {
        Ok(sch) => sch,
        Err(e) => {
            let _ = status.send(Err(format!("启动失败: {}", e)));
            return;
        }
    };
    let _ = status.send(Ok(()));
    info!("✅ 解码启动成功: {}", url);

    // 接收端关闭时过滤器返回错误, 解码随之结束
    if let Err(e) = sch.wait() {
        warn!("⚠️ 解码结束: {}", e);
    }
}
