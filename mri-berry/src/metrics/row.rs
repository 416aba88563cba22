use super::{MetricKind, Skipped};
use crate::LabelId;

/// Dice 结果行.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiceRow {
    /// 标签值.
    pub label: LabelId,
    /// 结构名. 不在词汇表中时为 `"UNKNOWN"`.
    pub name: String,
    /// Dice 系数, `[0, 1]`; 两个掩膜均为空时为 NaN.
    pub dice: f64,
}

/// 边界距离结果行. 距离单位为毫米.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistanceRow {
    /// 标签值.
    pub label: LabelId,
    /// 结构名. 不在词汇表中时为 `"UNKNOWN"`.
    pub name: String,
    /// 参考标签体中的体素数.
    pub n_voxels_ref: usize,
    /// 候选标签体中的体素数.
    pub n_voxels_pred: usize,
    /// 参考标签体中的表面体素数.
    pub n_surface_voxels_ref: usize,
    /// 候选标签体中的表面体素数.
    pub n_surface_voxels_pred: usize,
    /// 双向距离的第 50 百分位数.
    pub hd50_mm: f64,
    /// 双向距离的第 95 百分位数.
    pub hd95_mm: f64,
    /// 双向距离的最大值.
    pub hdmax_mm: f64,
}

/// 同一种度量的若干结果行, 按标签值升序.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetricRows {
    /// Dice.
    Dice(Vec<DiceRow>),
    /// 边界距离.
    Distance(Vec<DistanceRow>),
}

impl MetricRows {
    /// 指定度量的空结果.
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Dice => Self::Dice(vec![]),
            MetricKind::SurfaceDistance => Self::Distance(vec![]),
        }
    }

    /// 度量种类.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Dice(_) => MetricKind::Dice,
            Self::Distance(_) => MetricKind::SurfaceDistance,
        }
    }

    /// 行数.
    pub fn len(&self) -> usize {
        match self {
            Self::Dice(v) => v.len(),
            Self::Distance(v) => v.len(),
        }
    }

    /// 是否没有任何行.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 各行的标签值.
    pub fn labels(&self) -> Vec<LabelId> {
        match self {
            Self::Dice(v) => v.iter().map(|r| r.label).collect(),
            Self::Distance(v) => v.iter().map(|r| r.label).collect(),
        }
    }
}

/// 一对标签体在一种度量下的完整结果.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricTable {
    /// 结果行.
    pub rows: MetricRows,
    /// 被跳过的标签.
    pub skipped: Vec<Skipped>,
}
