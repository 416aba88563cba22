use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::MetricError;
use crate::consts::{BACKGROUND, DEFAULT_MIN_VOXELS};
use crate::lut::{Lut, Selector};
use crate::{LabelId, LabelStats, LabelVolume};

/// 非法的选择模式字符串.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid selection mode {0:?}, expected one of: all, include, exclude")]
pub struct InvalidMode(pub String);

/// 在有效标签集合上进一步筛选的方式.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SelectMode {
    /// 不再筛选.
    #[default]
    All,

    /// 只保留选择器给出的标签.
    Include,

    /// 去掉选择器给出的标签.
    Exclude,
}

impl FromStr for SelectMode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            _ => Err(InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for SelectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Include => "include",
            Self::Exclude => "exclude",
        })
    }
}

/// 标签集合的筛选策略, Dice 与边界距离两种度量共用.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelPolicy {
    /// 是否去掉背景 (标签 0).
    pub exclude_background: bool,

    /// 任一标签体中体素数低于该值的标签被丢弃.
    pub min_voxels: usize,

    /// 是否要求标签同时出现在两个标签体中.
    pub require_both: bool,

    /// 选择器. `mode` 为 [`SelectMode::All`] 时被忽略.
    pub select: Option<Vec<Selector>>,

    /// 选择模式.
    pub mode: SelectMode,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            exclude_background: true,
            min_voxels: DEFAULT_MIN_VOXELS,
            require_both: true,
            select: None,
            mode: SelectMode::All,
        }
    }
}

impl LabelPolicy {
    /// 并集模式: 两个标签体中出现过的所有标签 (含背景), 不做存在性与大小筛选.
    pub fn union() -> Self {
        Self {
            exclude_background: false,
            min_voxels: 0,
            require_both: false,
            select: None,
            mode: SelectMode::All,
        }
    }

    /// 设置选择器与模式.
    pub fn with_selection<I, S>(mut self, mode: SelectMode, select: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selector>,
    {
        self.mode = mode;
        self.select = Some(select.into_iter().map(Into::into).collect());
        self
    }
}

/// 标签未参与度量的原因.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipReason {
    /// 背景标签.
    Background,

    /// 参考标签体中不存在.
    MissingInReference,

    /// 候选标签体中不存在.
    MissingInCandidate,

    /// 体素数低于阈值.
    TooSmall {
        /// 参考标签体中的体素数.
        reference: usize,
        /// 候选标签体中的体素数.
        candidate: usize,
    },

    /// 被 include / exclude 选择排除.
    Deselected,

    /// 掩膜非空但表面为空.
    EmptySurface,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => f.write_str("background"),
            Self::MissingInReference => f.write_str("absent in reference"),
            Self::MissingInCandidate => f.write_str("absent in candidate"),
            Self::TooSmall {
                reference,
                candidate,
            } => write!(f, "too small ({reference} / {candidate} voxels)"),
            Self::Deselected => f.write_str("not selected"),
            Self::EmptySurface => f.write_str("empty surface"),
        }
    }
}

/// 被跳过的标签.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Skipped {
    /// 标签值.
    pub label: LabelId,
    /// 原因.
    pub reason: SkipReason,
}

impl Skipped {
    /// 构造并以 `info` 级别记录.
    pub(crate) fn logged(label: LabelId, reason: SkipReason, lut: &Lut) -> Self {
        log::info!(
            "label {label} ({}) skipped: {reason}",
            lut.name_or_unknown(label)
        );
        Self { label, reason }
    }
}

/// 单个标签在两个标签体中的统计. 并集模式下某一侧可能不存在.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LabelPair {
    /// 参考标签体中的统计.
    pub reference: Option<LabelStats>,
    /// 候选标签体中的统计.
    pub candidate: Option<LabelStats>,
}

impl LabelPair {
    /// 参考标签体中的体素数.
    #[inline]
    pub fn count_ref(&self) -> usize {
        self.reference.map_or(0, |s| s.count)
    }

    /// 候选标签体中的体素数.
    #[inline]
    pub fn count_pred(&self) -> usize {
        self.candidate.map_or(0, |s| s.count)
    }
}

/// 一对标签体的最终标签集合.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelection {
    /// 参与度量的标签, 按标签值升序.
    pub labels: BTreeMap<LabelId, LabelPair>,

    /// 被跳过的标签, 按标签值升序.
    pub skipped: Vec<Skipped>,
}

impl LabelSelection {
    /// 参与度量的标签值.
    pub fn ids(&self) -> BTreeSet<LabelId> {
        self.labels.keys().copied().collect()
    }

    /// 是否没有任何标签参与度量.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// 按选择模式解析选择器. `None` 表示不做筛选.
fn requested(
    policy: &LabelPolicy,
    lut: &Lut,
) -> Result<Option<BTreeSet<LabelId>>, MetricError> {
    let select = policy.select.as_deref().unwrap_or_default();
    match policy.mode {
        SelectMode::All => Ok(None),
        SelectMode::Include if select.is_empty() => {
            log::warn!("mode=include with an empty selection: no label will be evaluated");
            Ok(Some(BTreeSet::new()))
        }
        SelectMode::Exclude if select.is_empty() => Ok(None),
        SelectMode::Include | SelectMode::Exclude => Ok(Some(lut.resolve(select)?)),
    }
}

/// 计算一对标签体参与度量的标签集合.
///
/// 1. 候选集合为两个标签体中出现过的标签的并集;
/// 2. 按需去掉背景;
/// 3. `require_both` 时去掉只在一侧出现的标签, 再去掉任一侧体素数低于 `min_voxels` 的标签,
///    得到有效集合;
/// 4. 按 `mode` 与选择器在有效集合上筛选.
///
/// 每个被跳过的标签都会以 `info` 级别记录原因.
///
/// # 注意
///
/// 两个标签体形状不一致时返回 [`MetricError::Shape`]. 结果为空不是错误,
/// 只会记录一条警告.
pub fn resolve_labels(
    reference: &LabelVolume,
    candidate: &LabelVolume,
    policy: &LabelPolicy,
    lut: &Lut,
) -> Result<LabelSelection, MetricError> {
    reference.check_same_shape(candidate)?;
    let requested = requested(policy, lut)?;

    let stats_ref = reference.label_stats();
    let stats_pred = candidate.label_stats();
    let union = stats_ref
        .keys()
        .chain(stats_pred.keys())
        .copied()
        .collect::<BTreeSet<_>>();

    let mut selection = LabelSelection::default();
    for label in union {
        let pair = LabelPair {
            reference: stats_ref.get(&label).copied(),
            candidate: stats_pred.get(&label).copied(),
        };
        let (n_ref, n_pred) = (pair.count_ref(), pair.count_pred());

        let reason = if policy.exclude_background && label == BACKGROUND {
            Some(SkipReason::Background)
        } else if policy.require_both && n_ref == 0 {
            Some(SkipReason::MissingInReference)
        } else if policy.require_both && n_pred == 0 {
            Some(SkipReason::MissingInCandidate)
        } else if n_ref < policy.min_voxels || n_pred < policy.min_voxels {
            Some(SkipReason::TooSmall {
                reference: n_ref,
                candidate: n_pred,
            })
        } else {
            match (&requested, policy.mode) {
                (Some(set), SelectMode::Include) if !set.contains(&label) => {
                    Some(SkipReason::Deselected)
                }
                (Some(set), SelectMode::Exclude) if set.contains(&label) => {
                    Some(SkipReason::Deselected)
                }
                _ => None,
            }
        };

        match reason {
            Some(reason) => selection.skipped.push(Skipped::logged(label, reason, lut)),
            None => {
                selection.labels.insert(label, pair);
            }
        }
    }

    if selection.is_empty() {
        log::warn!("no label left to evaluate after filtering");
    }
    Ok(selection)
}
