/// 身份与追踪系统 (Identity & Tracking System)
///
/// - types:      检测记录 (Object) 与身份ID
/// - reconciler: 跨帧身份关联 (IOU + 同类别), 关键帧重置
/// - tracker:    追踪器接口与卡尔曼滤波
/// - bytetrack:  ByteTrack 时序追踪器
pub mod bytetrack;
pub mod reconciler;
pub mod tracker;
pub mod types;

pub use bytetrack::{ByteTrackConfig, ByteTracker};
pub use reconciler::{
    classify_overlap, IdentityCounter, IdentityReconciler, MatchThresholds, OverlapOutcome,
    ReconcileSummary, ReconcilerConfig, RetentionPolicy,
};
pub use tracker::{id_to_color, KalmanBoxFilter, TrackPoint, TrackedObject, Tracker};
pub use types::{Object, TrackId};
