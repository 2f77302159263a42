// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测记录数据结构
/// Detection record shared by detector, reconciler and tracker
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Rect;

/// 身份ID (由身份关联器签发, 从1开始单调递增)
pub type TrackId = u64;

/// 单个检测目标 (Detection Record)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Object {
    pub rect: Rect,

    /// 身份ID, `None` 表示尚未分配
    pub label: Option<TrackId>,

    /// 置信度 [0, 1]
    pub prob: f32,

    /// 类别下标 (对应类别列表的行号)
    pub class_id: usize,

    pub class_name: String,

    /// 每个类别的得分 (可选)
    pub class_scores: Option<BTreeMap<String, f32>>,
}

impl Object {
    pub fn new(rect: Rect, prob: f32, class_id: usize, class_name: impl Into<String>) -> Self {
        Self {
            rect,
            label: None,
            prob,
            class_id,
            class_name: class_name.into(),
            class_scores: None,
        }
    }

    pub fn with_label(mut self, label: TrackId) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_class_scores(mut self, scores: BTreeMap<String, f32>) -> Self {
        self.class_scores = Some(scores);
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.label.is_some()
    }
}
