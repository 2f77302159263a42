// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 结果输出: 日志 / 标注帧保存

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as PixelRect;
use tracing::debug;

use crate::detection::TrackedObject;
use crate::error::PipelineError;
use crate::input::DecodedFrame;

/// 边框线宽
const LINE_WIDTH: i32 = 3;

pub trait Renderer {
    fn render(&mut self, frame: &DecodedFrame, tracked: &[TrackedObject]) -> Result<()>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, frame: &DecodedFrame, tracked: &[TrackedObject]) -> Result<()> {
        (**self).render(frame, tracked)
    }
}

/// 仅打印追踪结果
#[derive(Debug, Default)]
pub struct LogRenderer;

impl Renderer for LogRenderer {
    fn render(&mut self, frame: &DecodedFrame, tracked: &[TrackedObject]) -> Result<()> {
        for t in tracked {
            debug!(
                "帧 {} ({}x{}) | {}({}) {:.2} @ [{:.0}, {:.0}, {:.0}x{:.0}]",
                frame.index,
                frame.width(),
                frame.height(),
                t.class_name,
                t.id,
                t.score,
                t.rect.x(),
                t.rect.y(),
                t.rect.width(),
                t.rect.height()
            );
        }
        Ok(())
    }
}

/// 绘制追踪框并保存为 `frame_{index:06}.jpg`
pub struct AnnotatedFrameWriter {
    dir: PathBuf,
    font: Option<FontVec>,
    scale: PxScale,
}

impl AnnotatedFrameWriter {
    pub fn new(dir: impl AsRef<Path>, font: Option<&Path>) -> crate::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| PipelineError::source_open(dir.display().to_string(), e))?;
        let font = match font {
            Some(path) => {
                let bytes = fs::read(path)
                    .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
                let font = FontVec::try_from_vec(bytes)
                    .map_err(|e| PipelineError::source_open(path.display().to_string(), e))?;
                Some(font)
            }
            None => None,
        };
        Ok(Self {
            dir,
            font,
            scale: PxScale::from(18.0),
        })
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.jpg", index))
    }

    pub fn annotate(&self, frame: &DecodedFrame, tracked: &[TrackedObject]) -> RgbImage {
        let mut canvas = frame.image.clone();
        for t in tracked {
            let color = Rgb([t.color.0, t.color.1, t.color.2]);
            let (x, y) = (t.rect.x().round() as i32, t.rect.y().round() as i32);
            let (w, h) = (t.rect.width().round() as i32, t.rect.height().round() as i32);
            for k in 0..LINE_WIDTH {
                let (bw, bh) = (w - 2 * k, h - 2 * k);
                if bw < 1 || bh < 1 {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut canvas,
                    PixelRect::at(x + k, y + k).of_size(bw as u32, bh as u32),
                    color,
                );
            }

            if let Some(font) = &self.font {
                let label = format!("{}({})", t.class_name, t.id);
                let (tw, th) = text_size(self.scale, font, &label);
                let bar_y = (y - th as i32 - 4).max(0);
                draw_filled_rect_mut(
                    &mut canvas,
                    PixelRect::at(x, bar_y).of_size(tw + 4, th + 4),
                    color,
                );
                draw_text_mut(
                    &mut canvas,
                    Rgb([0, 0, 0]),
                    x + 2,
                    bar_y + 2,
                    self.scale,
                    font,
                    &label,
                );
            }
        }

        if let Some(font) = &self.font {
            draw_text_mut(
                &mut canvas,
                Rgb([255, 255, 255]),
                10,
                10,
                self.scale,
                font,
                &format!("frame {}", frame.index),
            );
        }
        canvas
    }
}

impl Renderer for AnnotatedFrameWriter {
    fn render(&mut self, frame: &DecodedFrame, tracked: &[TrackedObject]) -> Result<()> {
        let canvas = self.annotate(frame, tracked);
        let path = self.frame_path(frame.index);
        canvas
            .save(&path)
            .with_context(|| format!("保存标注帧失败: {}", path.display()))?;
        Ok(())
    }
}
