//! 逐结构的一致性指标: Dice 重叠度与双向表面距离 (HD50 / HD95 / HDmax).
//!
//! 两种指标共用同一套标签集合解析规则, 见 [`resolve_labels`].

use std::fmt;

use crate::lut::{Lut, ResolveError};
use crate::{LabelId, LabelVolume, ShapeMismatch};

mod dice;
mod distance;
mod row;
mod select;

pub use dice::{dice, dice_by_label, dice_coefficient, dice_rows};
pub use distance::{
    directed_distances, distance_rows, distances, hd_bidirectional, surface_distance,
    surface_points_mm,
};
pub use row::{DiceRow, DistanceRow, MetricRows, MetricTable};
pub use select::{
    resolve_labels, InvalidMode, LabelPair, LabelPolicy, LabelSelection, SelectMode, SkipReason,
    Skipped,
};

/// 计算指标时可能出现的错误. 对批处理而言, 这些错误只影响当前体对.
#[derive(thiserror::Error, Debug)]
pub enum MetricError {
    /// 两个标签体形状不一致.
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    /// 选择器中存在无法解析的名称.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// 两侧均非空的标签得到了 NaN Dice, 说明标签集合解析有误.
    #[error("dice of label {0} is NaN although both masks should be non-empty")]
    NanDice(LabelId),
}

/// 指标种类.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetricKind {
    /// Dice 重叠度.
    Dice,

    /// 双向表面距离.
    SurfaceDistance,
}

impl MetricKind {
    /// 用于文件名的短标记: `dice` 或 `hd`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Dice => "dice",
            Self::SurfaceDistance => "hd",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 对一对标签体计算一种指标.
///
/// # 返回值
///
/// 按标签值升序的结果行, 以及所有被跳过的标签 (含跳过原因).
/// 没有任何标签可计算时返回空表而不是错误.
pub fn evaluate(
    kind: MetricKind,
    reference: &LabelVolume,
    candidate: &LabelVolume,
    policy: &LabelPolicy,
    lut: &Lut,
) -> Result<MetricTable, MetricError> {
    let selection = resolve_labels(reference, candidate, policy, lut)?;
    let (rows, extra) = match kind {
        MetricKind::Dice => {
            let rows = dice_rows(reference, candidate, &selection, policy, lut)?;
            (MetricRows::Dice(rows), vec![])
        }
        MetricKind::SurfaceDistance => {
            let (rows, skipped) = distance_rows(reference, candidate, &selection, lut)?;
            (MetricRows::Distance(rows), skipped)
        }
    };

    let mut skipped = selection.skipped;
    skipped.extend(extra);
    skipped.sort_by_key(|s| s.label);
    Ok(MetricTable { rows, skipped })
}
