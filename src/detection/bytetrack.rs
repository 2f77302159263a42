// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ByteTrack 算法实现
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 新轨迹沿用身份关联器分配的ID

use serde::{Deserialize, Serialize};

use super::tracker::{id_to_color, KalmanBoxFilter, TrackPoint, TrackedObject, Tracker};
use super::types::{Object, TrackId};

/// 轨迹最多保留的中心点数量
const MAX_TRAJECTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByteTrackConfig {
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
    pub high_score_threshold: f32,
    /// 低于此分数的检测直接忽略
    pub low_score_threshold: f32,
    pub high_iou_threshold: f32,
    pub low_iou_threshold: f32,
    /// 卡尔曼过程噪声
    pub process_noise: f32,
    /// 卡尔曼观测噪声
    pub observation_noise: f32,
}

impl Default for ByteTrackConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.4,
            low_iou_threshold: 0.3,
            process_noise: 0.1,
            observation_noise: 0.5,
        }
    }
}

impl ByteTrackConfig {
    /// 按视频帧率推导丢失缓冲: frame_rate / 30 * track_buffer, track_buffer = 帧率
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        if fps.is_finite() && fps > 0.0 {
            self.max_lost_frames = ((fps / 30.0 * fps) as u32).max(1);
        }
        self
    }
}

#[derive(Clone, Debug)]
struct STrack {
    id: TrackId,
    class_id: usize,
    class_name: String,
    kalman: KalmanBoxFilter,
    trajectory: Vec<TrackPoint>,
    frames_lost: u32,
    total_frames: u32,
    score: f32,
}

impl STrack {
    fn new(id: TrackId, object: &Object, config: &ByteTrackConfig) -> Self {
        let kalman = KalmanBoxFilter::new(
            &object.rect,
            config.process_noise,
            config.observation_noise,
        );
        let (x, y) = object.rect.center();
        Self {
            id,
            class_id: object.class_id,
            class_name: object.class_name.clone(),
            kalman,
            trajectory: vec![TrackPoint { x, y }],
            frames_lost: 0,
            total_frames: 1,
            score: object.prob,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
    }

    fn update(&mut self, object: &Object) {
        self.kalman.update(&object.rect);
        self.frames_lost = 0;
        self.total_frames += 1;
        self.score = object.prob;
        self.class_id = object.class_id;
        self.class_name.clone_from(&object.class_name);

        let (x, y) = self.kalman.state_rect().center();
        self.trajectory.push(TrackPoint { x, y });
        if self.trajectory.len() > MAX_TRAJECTORY {
            self.trajectory.remove(0);
        }
    }

    fn snapshot(&self) -> TrackedObject {
        TrackedObject {
            id: self.id,
            class_id: self.class_id,
            class_name: self.class_name.clone(),
            rect: self.kalman.state_rect(),
            score: self.score,
            trajectory: self.trajectory.clone(),
            frames_lost: self.frames_lost,
            total_frames: self.total_frames,
            color: id_to_color(self.id),
        }
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<STrack>,
    config: ByteTrackConfig,
    /// 输入未带ID时使用的内部编号
    next_id: TrackId,
}

impl ByteTracker {
    pub fn new(config: ByteTrackConfig) -> Self {
        Self {
            tracks: Vec::new(),
            config,
            next_id: 1,
        }
    }

    pub fn config(&self) -> &ByteTrackConfig {
        &self.config
    }

    /// 贪心 IOU 匹配, 返回 (检测下标, 轨迹下标)
    fn match_detections_to_tracks(
        &self,
        objects: &[Object],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            for &track_idx in track_indices {
                let predicted = self.tracks[track_idx].kalman.predicted_rect();
                let iou = objects[det_idx].rect.iou(&predicted);
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, det_idx, track_idx));
                }
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut used_det = vec![false; objects.len()];
        let mut used_track = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                assignments.push((det_idx, track_idx));
                used_det[det_idx] = true;
                used_track[track_idx] = true;
            }
        }
        assignments
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(ByteTrackConfig::default())
    }
}

impl Tracker for ByteTracker {
    /// 更新跟踪 (ByteTrack 两轮匹配), 只返回本帧匹配到的轨迹
    fn update(&mut self, objects: &[Object]) -> Vec<TrackedObject> {
        // 匹配使用上一帧状态的外推框, predict 放在匹配之后
        let (high, low): (Vec<usize>, Vec<usize>) = (0..objects.len())
            .filter(|&i| objects[i].prob >= self.config.low_score_threshold)
            .partition(|&i| objects[i].prob >= self.config.high_score_threshold);

        let mut matched_det = vec![false; objects.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        // 第一轮: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let first =
            self.match_detections_to_tracks(objects, &high, &all_tracks, self.config.high_iou_threshold);
        for &(det_idx, track_idx) in &first {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
        }

        // 第二轮: 低分检测 + 未匹配轨迹 (救援)
        let unmatched_tracks: Vec<usize> = all_tracks
            .iter()
            .copied()
            .filter(|&idx| !matched_track[idx])
            .collect();
        let second = self.match_detections_to_tracks(
            objects,
            &low,
            &unmatched_tracks,
            self.config.low_iou_threshold,
        );
        for &(det_idx, track_idx) in &second {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
        }

        for track in self.tracks.iter_mut() {
            track.predict();
        }
        for (det_idx, track_idx) in first.into_iter().chain(second) {
            self.tracks[track_idx].update(&objects[det_idx]);
        }
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].frames_lost += 1;
            }
        }

        // 未匹配的高分检测 → 新建轨迹, 沿用身份关联器的ID
        for &det_idx in &high {
            if matched_det[det_idx] {
                continue;
            }
            let object = &objects[det_idx];
            let id = match object.label {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            self.tracks.push(STrack::new(id, object, &self.config));
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        self.tracks
            .iter()
            .filter(|t| t.frames_lost == 0)
            .map(STrack::snapshot)
            .collect()
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
