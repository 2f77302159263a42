// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 身份关联器 (Identity Reconciler)
//!
//! 把检测器输出的未分配身份的目标, 与上一帧保留下来的目标进行匹配:
//! 1. 同类别且 IOU >= 0.1 → 继承旧身份, 旧目标被消耗 (不能再匹配第二个新目标)
//! 2. IOU >= 0.5 但不满足 1 → 仅分类, 当前版本不做任何处理 (预留扩展点)
//! 3. 其余 → 无匹配
//!
//! 仍未分配身份的新目标从计数器领取新ID. 关键帧到来时清空保留集合.
//! 默认未被匹配的旧目标继续保留, 空检测帧 (含检测失败的帧) 不会丢失身份.
//!
//! 匹配结果依赖新目标的遍历顺序: 靠前的新目标优先消耗旧目标.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Object, TrackId};

/// 重叠判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapOutcome {
    /// 同类别且重叠足够 → 继承身份
    SameIdentity,
    /// 强重叠但类别不同 (或未满足同身份条件); 暂不处理, 保留为策略扩展点
    StrongOverlapNoAction,
    NoMatch,
}

/// 重叠判定阈值 (两端均为闭区间)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    pub same_identity_iou: f32,
    pub strong_overlap_iou: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            same_identity_iou: 0.1,
            strong_overlap_iou: 0.5,
        }
    }
}

/// 判定新检测与已知目标的关系, 同身份优先于强重叠
pub fn classify_overlap(
    candidate: &Object,
    known: &Object,
    thresholds: &MatchThresholds,
) -> OverlapOutcome {
    let iou = candidate.rect.iou(&known.rect);
    if candidate.class_name == known.class_name && iou >= thresholds.same_identity_iou {
        OverlapOutcome::SameIdentity
    } else if iou >= thresholds.strong_overlap_iou {
        OverlapOutcome::StrongOverlapNoAction
    } else {
        OverlapOutcome::NoMatch
    }
}

/// 保留集合的更新策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// 下一帧只用本帧的检测结果匹配
    CurrentFrame,
    /// 未被匹配的旧目标一直保留到下一个关键帧, 排在本帧检测之前
    #[default]
    Accumulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub thresholds: MatchThresholds,
    pub retention: RetentionPolicy,
}

/// 单调递增的身份计数器, 从1开始, 不复用不回退
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCounter {
    next: TrackId,
}

impl IdentityCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn mint(&mut self) -> TrackId {
        let id = self.next;
        self.next += 1;
        id
    }

    /// 下一个将被签发的ID
    pub fn peek(&self) -> TrackId {
        self.next
    }

    /// 已签发的ID数量
    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

impl Default for IdentityCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// 单帧关联统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    pub transferred: usize,
    pub minted: usize,
    pub strong_overlaps: usize,
}

pub struct IdentityReconciler {
    counter: IdentityCounter,
    retained: Vec<Object>,
    config: ReconcilerConfig,
}

impl IdentityReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            counter: IdentityCounter::new(),
            retained: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// 保留集合 (同时也是交给追踪器的目标列表)
    pub fn objects(&self) -> &[Object] {
        &self.retained
    }

    pub fn counter(&self) -> &IdentityCounter {
        &self.counter
    }

    /// 关键帧: 丢弃所有保留目标, 计数器不变
    pub fn reset(&mut self) {
        if !self.retained.is_empty() {
            debug!("🔑 关键帧: 清空 {} 个保留目标", self.retained.len());
        }
        self.retained.clear();
    }

    /// 关联本帧检测, 结果写入保留集合
    pub fn reconcile(&mut self, mut detections: Vec<Object>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut consumed = vec![false; self.retained.len()];

        for detection in detections.iter_mut() {
            // 上游可能带着ID, 一律重新关联
            detection.label = None;
            for (idx, known) in self.retained.iter().enumerate() {
                if consumed[idx] {
                    continue;
                }
                match classify_overlap(detection, known, &self.config.thresholds) {
                    OverlapOutcome::SameIdentity => {
                        detection.label = known.label;
                        consumed[idx] = true;
                        summary.transferred += 1;
                        break;
                    }
                    OverlapOutcome::StrongOverlapNoAction => {
                        summary.strong_overlaps += 1;
                    }
                    OverlapOutcome::NoMatch => {}
                }
            }
        }

        for detection in detections.iter_mut() {
            if detection.label.is_none() {
                detection.label = Some(self.counter.mint());
                summary.minted += 1;
            }
        }

        let previous = std::mem::take(&mut self.retained);
        self.retained = match self.config.retention {
            RetentionPolicy::CurrentFrame => detections,
            RetentionPolicy::Accumulate => {
                let mut next: Vec<Object> = previous
                    .into_iter()
                    .zip(consumed)
                    .filter_map(|(obj, used)| (!used).then_some(obj))
                    .collect();
                next.extend(detections);
                next
            }
        };

        debug!(
            "🔗 身份关联: 继承{} 新建{} 强重叠{} | 保留{}",
            summary.transferred,
            summary.minted,
            summary.strong_overlaps,
            self.retained.len()
        );
        summary
    }
}

impl Default for IdentityReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rect;

    fn car(x: f32, y: f32, w: f32, h: f32) -> Object {
        Object::new(Rect::new(x, y, w, h), 0.9, 2, "car")
    }

    fn current_frame() -> IdentityReconciler {
        IdentityReconciler::new(ReconcilerConfig {
            retention: RetentionPolicy::CurrentFrame,
            ..Default::default()
        })
    }

    fn labels(objects: &[Object]) -> Vec<TrackId> {
        objects.iter().filter_map(|o| o.label).collect()
    }

    #[test]
    fn test_classify_precedence() {
        let th = MatchThresholds::default();
        let known = car(0.0, 0.0, 10.0, 10.0).with_label(3);

        assert_eq!(
            classify_overlap(&car(0.0, 0.0, 10.0, 10.0), &known, &th),
            OverlapOutcome::SameIdentity
        );

        let mut person = car(0.0, 0.0, 10.0, 10.0);
        person.class_name = "person".into();
        assert_eq!(
            classify_overlap(&person, &known, &th),
            OverlapOutcome::StrongOverlapNoAction
        );

        person.rect = Rect::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(classify_overlap(&person, &known, &th), OverlapOutcome::NoMatch);
    }

    #[test]
    fn test_same_identity_boundary_is_inclusive() {
        let mut reconciler = IdentityReconciler::default();
        reconciler.retained = vec![car(0.0, 0.0, 10.0, 10.0).with_label(7)];

        // 交集10, 并集100 → IOU 恰好 0.1
        let candidate = car(0.0, 0.0, 1.0, 10.0);
        assert_eq!(candidate.rect.iou(&reconciler.retained[0].rect), 0.1);

        reconciler.reconcile(vec![candidate]);
        assert_eq!(labels(reconciler.objects()), vec![7]);
    }

    #[test]
    fn test_minting_is_monotonic_and_unique() {
        let mut reconciler = IdentityReconciler::default();
        let frame: Vec<Object> = (0..5).map(|i| car(i as f32 * 100.0, 0.0, 10.0, 10.0)).collect();
        let summary = reconciler.reconcile(frame);
        assert_eq!(summary.minted, 5);
        assert_eq!(labels(reconciler.objects()), vec![1, 2, 3, 4, 5]);

        reconciler.reset();
        let frame: Vec<Object> = (0..3).map(|i| car(i as f32 * 100.0, 0.0, 10.0, 10.0)).collect();
        reconciler.reconcile(frame);
        assert_eq!(labels(reconciler.objects()), vec![6, 7, 8]);
        assert_eq!(reconciler.counter().peek(), 9);
        assert_eq!(reconciler.counter().issued(), 8);
    }

    #[test]
    fn test_retained_object_matches_at_most_once() {
        let mut reconciler = IdentityReconciler::default();
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(labels(reconciler.objects()), vec![1]);

        let summary = reconciler.reconcile(vec![car(1.0, 0.0, 10.0, 10.0), car(0.0, 1.0, 10.0, 10.0)]);
        assert_eq!(summary.transferred, 1);
        assert_eq!(summary.minted, 1);
        // 靠前的新目标继承身份
        assert_eq!(labels(reconciler.objects()), vec![1, 2]);
    }

    #[test]
    fn test_new_detection_matches_at_most_one_retained() {
        let mut reconciler = IdentityReconciler::default();
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0), car(5.0, 0.0, 10.0, 10.0)]);
        assert_eq!(labels(reconciler.objects()), vec![1, 2]);

        // 一个大框同时覆盖两个旧目标, 只继承第一个; 第二个继续保留
        let summary = reconciler.reconcile(vec![car(0.0, 0.0, 15.0, 10.0)]);
        assert_eq!(summary.transferred, 1);
        assert_eq!(summary.minted, 0);
        assert_eq!(labels(reconciler.objects()), vec![2, 1]);
    }

    #[test]
    fn test_match_outcome_depends_on_iteration_order() {
        let wide = car(0.0, 0.0, 20.0, 10.0);
        let narrow = car(0.0, 0.0, 10.0, 10.0);

        let mut first = IdentityReconciler::default();
        first.reconcile(vec![car(0.0, 0.0, 10.0, 10.0)]);
        first.reconcile(vec![wide.clone(), narrow.clone()]);
        assert_eq!(labels(first.objects()), vec![1, 2]);

        let mut second = IdentityReconciler::default();
        second.reconcile(vec![car(0.0, 0.0, 10.0, 10.0)]);
        second.reconcile(vec![narrow, wide]);
        // 同一组检测换个顺序, 继承身份的是另一个目标
        assert_eq!(second.objects()[0].rect.width(), 10.0);
        assert_eq!(labels(second.objects()), vec![1, 2]);
        assert_eq!(first.objects()[0].rect.width(), 20.0);
    }

    #[test]
    fn test_class_mismatch_never_transfers() {
        let mut reconciler = IdentityReconciler::default();
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0)]);

        let mut truck = car(0.0, 0.0, 10.0, 10.0);
        truck.class_name = "truck".into();
        let summary = reconciler.reconcile(vec![truck]);
        assert_eq!(summary.transferred, 0);
        assert_eq!(summary.strong_overlaps, 1);
        // 旧的车未被消耗, 卡车领取新ID
        assert_eq!(labels(reconciler.objects()), vec![1, 2]);
    }

    #[test]
    fn test_reset_clears_retained() {
        let mut reconciler = IdentityReconciler::default();
        let frame: Vec<Object> = (0..4).map(|i| car(i as f32 * 50.0, 0.0, 10.0, 10.0)).collect();
        reconciler.reconcile(frame);
        assert_eq!(reconciler.objects().len(), 4);

        reconciler.reset();
        assert!(reconciler.objects().is_empty());

        let summary = reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(summary.transferred, 0);
        assert_eq!(labels(reconciler.objects()), vec![5]);
    }

    #[test]
    fn test_incoming_labels_are_discarded() {
        let mut reconciler = IdentityReconciler::default();
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0).with_label(42)]);
        assert_eq!(labels(reconciler.objects()), vec![1]);
    }

    #[test]
    fn test_accumulate_keeps_unmatched_until_reset() {
        let mut reconciler = IdentityReconciler::default();
        assert_eq!(reconciler.config().retention, RetentionPolicy::Accumulate);
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0), car(100.0, 0.0, 10.0, 10.0)]);

        // 第二帧只看到第一个目标, 第二个目标继续保留
        reconciler.reconcile(vec![car(1.0, 0.0, 10.0, 10.0)]);
        assert_eq!(labels(reconciler.objects()), vec![2, 1]);

        // 第三帧第二个目标重新出现, 继承原身份
        let summary = reconciler.reconcile(vec![car(101.0, 0.0, 10.0, 10.0)]);
        assert_eq!(summary.transferred, 1);
        assert_eq!(labels(reconciler.objects()), vec![1, 2]);

        reconciler.reset();
        assert!(reconciler.objects().is_empty());
    }

    #[test]
    fn test_current_frame_policy_drops_unmatched() {
        let mut reconciler = current_frame();
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0), car(100.0, 0.0, 10.0, 10.0)]);
        reconciler.reconcile(vec![car(1.0, 0.0, 10.0, 10.0)]);
        assert_eq!(labels(reconciler.objects()), vec![1]);

        reconciler.reconcile(vec![car(101.0, 0.0, 10.0, 10.0)]);
        assert_eq!(labels(reconciler.objects()), vec![3]);
    }

    #[test]
    fn test_empty_frame_keeps_identity() {
        let mut reconciler = IdentityReconciler::default();
        reconciler.reconcile(vec![car(10.0, 0.0, 40.0, 30.0)]);
        let summary = reconciler.reconcile(Vec::new());
        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(labels(reconciler.objects()), vec![1]);

        let summary = reconciler.reconcile(vec![car(11.0, 0.0, 40.0, 30.0)]);
        assert_eq!(summary.transferred, 1);
        assert_eq!(labels(reconciler.objects()), vec![1]);
        assert_eq!(reconciler.counter().issued(), 1);
    }

    #[test]
    fn test_empty_frame_clears_current_frame_retention() {
        let mut reconciler = current_frame();
        reconciler.reconcile(vec![car(0.0, 0.0, 10.0, 10.0)]);
        let summary = reconciler.reconcile(Vec::new());
        assert_eq!(summary, ReconcileSummary::default());
        assert!(reconciler.objects().is_empty());
    }
}
