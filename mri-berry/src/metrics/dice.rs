use std::collections::BTreeMap;

use ndarray::{ArrayView3, Zip};

use super::{resolve_labels, DiceRow, LabelPolicy, LabelSelection, MetricError};
use crate::lut::Lut;
use crate::{LabelId, LabelVolume, ShapeMismatch};

/// `2|A∩B| / (|A| + |B|)`. 两者均为空时为 NaN.
#[inline]
fn dice_from_counts(inter: usize, a: usize, b: usize) -> f64 {
    let sum = a + b;
    if sum == 0 {
        f64::NAN
    } else {
        2.0 * inter as f64 / sum as f64
    }
}

/// 两个同形二值掩膜的 Dice 系数. 两者均为空时为 NaN.
///
/// # 注意
///
/// 形状不一致时 panic.
pub fn dice_coefficient(a: ArrayView3<bool>, b: ArrayView3<bool>) -> f64 {
    let (mut inter, mut na, mut nb) = (0usize, 0usize, 0usize);
    Zip::from(a).and(b).for_each(|&x, &y| {
        na += x as usize;
        nb += y as usize;
        inter += (x && y) as usize;
    });
    dice_from_counts(inter, na, nb)
}

/// 单次遍历统计 `labels` 中各标签在两个标签体中的交集体素数.
fn intersections<I>(
    reference: &LabelVolume,
    candidate: &LabelVolume,
    labels: I,
) -> BTreeMap<LabelId, usize>
where
    I: IntoIterator<Item = LabelId>,
{
    let mut inter = labels.into_iter().map(|l| (l, 0)).collect::<BTreeMap<_, _>>();
    Zip::from(reference.data())
        .and(candidate.data())
        .for_each(|&r, &c| {
            if r == c {
                if let Some(n) = inter.get_mut(&r) {
                    *n += 1;
                }
            }
        });
    inter
}

/// 按标签计算 Dice. `selection` 由 [`resolve_labels`] 给出.
///
/// # 注意
///
/// `require_both` 为真时, 参与度量的标签在两侧都非空, Dice 不可能为 NaN;
/// 一旦出现则说明标签集合解析有误, 返回 [`MetricError::NanDice`].
pub fn dice_rows(
    reference: &LabelVolume,
    candidate: &LabelVolume,
    selection: &LabelSelection,
    policy: &LabelPolicy,
    lut: &Lut,
) -> Result<Vec<DiceRow>, MetricError> {
    reference.check_same_shape(candidate)?;
    let inter = intersections(reference, candidate, selection.labels.keys().copied());

    let mut rows = Vec::with_capacity(selection.labels.len());
    for (&label, pair) in selection.labels.iter() {
        let n = inter.get(&label).copied().unwrap_or(0);
        let dice = dice_from_counts(n, pair.count_ref(), pair.count_pred());
        if dice.is_nan() && policy.require_both {
            return Err(MetricError::NanDice(label));
        }
        rows.push(DiceRow {
            label,
            name: lut.name_or_unknown(label).to_string(),
            dice,
        });
    }
    Ok(rows)
}

/// 按 `policy` 解析标签集合后计算 Dice.
pub fn dice(
    reference: &LabelVolume,
    candidate: &LabelVolume,
    policy: &LabelPolicy,
    lut: &Lut,
) -> Result<Vec<DiceRow>, MetricError> {
    let selection = resolve_labels(reference, candidate, policy, lut)?;
    dice_rows(reference, candidate, &selection, policy, lut)
}

/// 并集模式 Dice 的字典形式: 两个标签体中出现过的每个标签 (含背景) 到 Dice 的映射.
pub fn dice_by_label(
    reference: &LabelVolume,
    candidate: &LabelVolume,
) -> Result<BTreeMap<LabelId, f64>, ShapeMismatch> {
    reference.check_same_shape(candidate)?;
    let stats_ref = reference.label_stats();
    let stats_pred = candidate.label_stats();
    let labels = stats_ref.keys().chain(stats_pred.keys()).copied();
    let inter = intersections(reference, candidate, labels);

    Ok(inter
        .into_iter()
        .map(|(label, n)| {
            let a = stats_ref.get(&label).map_or(0, |s| s.count);
            let b = stats_pred.get(&label).map_or(0, |s| s.count);
            (label, dice_from_counts(n, a, b))
        })
        .collect())
}
