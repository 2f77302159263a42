// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多目标跟踪公共组件
//! Common components for multi-object tracking

use super::types::{Object, TrackId};
use crate::Rect;

/// 跟踪点 (用于绘制轨迹)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackPoint {
    pub x: f32,
    pub y: f32,
}

/// 跟踪对象 (追踪器对外输出)
#[derive(Clone, Debug)]
pub struct TrackedObject {
    /// 持久身份ID
    pub id: TrackId,

    pub class_id: usize,
    pub class_name: String,

    /// 当前边界框 (滤波平滑后)
    pub rect: Rect,

    /// 最近一次匹配的检测置信度
    pub score: f32,

    /// 历史轨迹 (中心点)
    pub trajectory: Vec<TrackPoint>,

    /// 连续丢失帧数
    pub frames_lost: u32,

    /// 总共被跟踪的帧数
    pub total_frames: u32,

    pub color: (u8, u8, u8),
}

/// 简化卡尔曼滤波器 (单个边界框的位置和尺寸平滑)
/// 状态向量: [cx, cy, w, h, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],

    /// 估计误差协方差 (对角阵)
    p: [f32; 8],

    /// 过程噪声
    q: f32,

    /// 观测噪声
    r: f32,

    /// 速度衰减因子
    velocity_decay: f32,

    /// 静止阈值 (像素/帧)
    stationary_threshold: f32,

    stationary_count: u32,
}

impl KalmanBoxFilter {
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (越大越相信预测)
    pub fn new(rect: &Rect, q: f32, r: f32) -> Self {
        let (cx, cy) = rect.center();
        Self {
            state: [cx, cy, rect.width(), rect.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay: 0.95,
            stationary_threshold: 2.0,
            stationary_count: 0,
        }
    }

    /// 预测下一帧状态 (匀速模型 + 速度衰减)
    pub fn predict(&mut self) {
        let speed = (self.state[4] * self.state[4] + self.state[5] * self.state[5]).sqrt();
        let is_stationary = speed < self.stationary_threshold;

        let (pos_decay, size_decay) = if is_stationary {
            self.stationary_count += 1;
            // 连续静止3帧后大幅衰减速度
            let decay = if self.stationary_count > 3 {
                0.7
            } else {
                self.velocity_decay
            };
            (decay, decay)
        } else {
            self.stationary_count = 0;
            (self.velocity_decay, 0.98)
        };
        self.state[4] *= pos_decay;
        self.state[5] *= pos_decay;
        self.state[6] *= size_decay;
        self.state[7] *= size_decay;

        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }

        let q = if is_stationary { self.q * 0.5 } else { self.q };
        for p in self.p.iter_mut() {
            *p += q;
        }
    }

    /// 融合观测值 (残差越大越相信预测)
    pub fn update(&mut self, rect: &Rect) {
        let (cx, cy) = rect.center();
        let y = [
            cx - self.state[0],
            cy - self.state[1],
            rect.width() - self.state[2],
            rect.height() - self.state[3],
        ];

        let residual = (y[0] * y[0] + y[1] * y[1]).sqrt();
        let r = if residual < self.stationary_threshold {
            self.r * 0.3
        } else if residual < 10.0 {
            self.r
        } else {
            self.r * 3.0
        };

        let mut k = [0.0f32; 8];
        for i in 0..8 {
            let noise = if i < 4 { r } else { r * 10.0 };
            k[i] = self.p[i] / (self.p[i] + noise);
        }

        let velocity_gain = if residual < self.stationary_threshold {
            0.3
        } else {
            1.0
        };
        for i in 0..4 {
            self.state[i] += k[i] * y[i];
            self.state[i + 4] += k[i + 4] * y[i] * velocity_gain;
        }

        for i in 0..8 {
            self.p[i] *= 1.0 - k[i];
        }

        if residual >= self.stationary_threshold {
            self.stationary_count = 0;
        }
    }

    /// 当前状态的边界框
    pub fn state_rect(&self) -> Rect {
        Rect::from_center(
            self.state[0],
            self.state[1],
            self.state[2].max(1.0),
            self.state[3].max(1.0),
        )
    }

    /// 预测的边界框 (用于匹配)
    pub fn predicted_rect(&self) -> Rect {
        Rect::from_center(
            self.state[0] + self.state[4],
            self.state[1] + self.state[5],
            (self.state[2] + self.state[6]).max(1.0),
            (self.state[3] + self.state[7]).max(1.0),
        )
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4], self.state[5])
    }
}

/// 多目标跟踪器接口
///
/// 输入为身份关联后的目标列表, 输出为带持久身份的跟踪对象.
pub trait Tracker {
    fn update(&mut self, objects: &[Object]) -> Vec<TrackedObject>;

    fn track_count(&self) -> usize;
}

/// 根据ID生成不同颜色 (黄金角度采样)
pub fn id_to_color(id: TrackId) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.8, 0.9)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kalman_starts_at_observation() {
        let rect = Rect::new(10.0, 20.0, 40.0, 80.0);
        let kf = KalmanBoxFilter::new(&rect, 0.1, 0.5);
        assert_eq!(kf.state_rect(), rect);
        assert_eq!(kf.velocity(), (0.0, 0.0));
    }

    #[test]
    fn test_kalman_follows_moving_box() {
        let mut kf = KalmanBoxFilter::new(&Rect::new(0.0, 0.0, 20.0, 20.0), 0.1, 0.5);
        for step in 1..=10 {
            kf.predict();
            kf.update(&Rect::new(step as f32 * 5.0, 0.0, 20.0, 20.0));
        }
        let (cx, _) = kf.state_rect().center();
        assert!((cx - 60.0).abs() < 10.0, "cx = {}", cx);
        assert!(kf.velocity().0 > 0.0);
        assert!(kf.predicted_rect().x() > kf.state_rect().x());
    }

    #[test]
    fn test_kalman_size_never_collapses() {
        let kf = KalmanBoxFilter::new(&Rect::new(5.0, 5.0, 0.0, 0.0), 0.1, 0.5);
        assert_relative_eq!(kf.state_rect().width(), 1.0);
        assert_relative_eq!(kf.predicted_rect().height(), 1.0);
    }

    #[test]
    fn test_id_colors_differ() {
        assert_ne!(id_to_color(1), id_to_color(2));
        assert_eq!(id_to_color(7), id_to_color(7));
    }
}
