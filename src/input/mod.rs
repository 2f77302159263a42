/// 视频输入系统 (Video Input System)
///
/// 独立解码线程, 帧按解码顺序经有界队列送往处理循环
/// - VideoDecoder: 视频文件/流解码器 (ez-ffmpeg)
/// - DecodeFilter: 帧过滤与 RGB 转换
use image::RgbImage;

pub mod decode_filter;
pub mod decoder;

pub use decode_filter::DecodeFilter;
pub use decoder::VideoDecoder;

/// 解码后的单帧
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub image: RgbImage,
    /// 从0开始的帧序号
    pub index: u64,
    /// 关键帧 (身份关联器在此清空保留集合)
    pub is_key_frame: bool,
    pub pts: Option<i64>,
}

impl DecodedFrame {
    pub fn new(image: RgbImage, index: u64, is_key_frame: bool) -> Self {
        Self {
            image,
            index,
            is_key_frame,
            pts: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 帧来源, `None` 表示流结束
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<DecodedFrame>;
}

impl FrameSource for std::vec::IntoIter<DecodedFrame> {
    fn next_frame(&mut self) -> Option<DecodedFrame> {
        self.next()
    }
}
