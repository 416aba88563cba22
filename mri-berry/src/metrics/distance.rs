use either::Either;
use itertools::Itertools;

use super::{resolve_labels, DistanceRow, LabelPair, LabelPolicy, LabelSelection, MetricError};
use super::{SkipReason, Skipped};
use crate::lut::Lut;
use crate::morph::surface_positions;
use crate::spatial::KdTree;
use crate::stats::HdStats;
use crate::{LabelId, LabelStats, LabelVolume, Point3};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// 标签 `label` 的表面体素在物理空间中的坐标 (mm), 使用该标签体自身的仿射变换.
/// `stats` 为该标签在此标签体中的统计, 不存在时返回空.
pub fn surface_points_mm(
    vol: &LabelVolume,
    label: LabelId,
    stats: Option<LabelStats>,
) -> Vec<Point3> {
    let Some(stats) = stats else {
        return vec![];
    };
    let affine = vol.affine();
    surface_positions(vol.data(), label, stats.bounds)
        .into_iter()
        .map(|p| affine.apply(p))
        .collect()
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        /// `from` 中每个点到 `to` 中最近点的距离. `to` 为空时距离为 NaN.
        pub fn directed_distances(from: &[Point3], to: &KdTree) -> Vec<f64> {
            from.par_iter()
                .map(|p| to.nearest(p).unwrap_or(f64::NAN))
                .collect()
        }
    } else {
        /// `from` 中每个点到 `to` 中最近点的距离. `to` 为空时距离为 NaN.
        pub fn directed_distances(from: &[Point3], to: &KdTree) -> Vec<f64> {
            from.iter()
                .map(|p| to.nearest(p).unwrap_or(f64::NAN))
                .collect()
        }
    }
}

/// 两组表面点之间的双向距离统计.
///
/// 分别以两组点建树, 计算 `a -> b` 与 `b -> a` 的最近距离, 合并后取
/// 第 50, 95 百分位数与最大值. 任一点集为空时返回 [`HdStats::NAN`].
pub fn hd_bidirectional(a: &[Point3], b: &[Point3]) -> HdStats {
    if a.is_empty() || b.is_empty() {
        return HdStats::NAN;
    }
    let tree_a = KdTree::new(a.to_vec());
    let tree_b = KdTree::new(b.to_vec());
    let mut pooled = directed_distances(a, &tree_b);
    pooled.extend(directed_distances(b, &tree_a));
    HdStats::from_samples(pooled)
}

/// 单个标签的双向表面距离统计. 该标签在任一标签体中不存在时返回 [`HdStats::NAN`].
///
/// # 注意
///
/// 该函数会完整遍历两个标签体以获得包围盒. 批量计算请使用 [`distance_rows`].
pub fn distances(label: LabelId, reference: &LabelVolume, candidate: &LabelVolume) -> HdStats {
    let a = surface_points_mm(reference, label, reference.label_stats().remove(&label));
    let b = surface_points_mm(candidate, label, candidate.label_stats().remove(&label));
    hd_bidirectional(&a, &b)
}

fn label_row(
    label: LabelId,
    pair: &LabelPair,
    reference: &LabelVolume,
    candidate: &LabelVolume,
    lut: &Lut,
) -> Either<DistanceRow, Skipped> {
    let a = surface_points_mm(reference, label, pair.reference);
    let b = surface_points_mm(candidate, label, pair.candidate);
    if a.is_empty() || b.is_empty() {
        return Either::Right(Skipped::logged(label, SkipReason::EmptySurface, lut));
    }

    let stats = hd_bidirectional(&a, &b);
    log::debug!(
        "label {label}: {} / {} surface voxels, hd95 = {:.3} mm",
        a.len(),
        b.len(),
        stats.hd95
    );
    Either::Left(DistanceRow {
        label,
        name: lut.name_or_unknown(label).to_string(),
        n_voxels_ref: pair.count_ref(),
        n_voxels_pred: pair.count_pred(),
        n_surface_voxels_ref: a.len(),
        n_surface_voxels_pred: b.len(),
        hd50_mm: stats.hd50,
        hd95_mm: stats.hd95,
        hdmax_mm: stats.hdmax,
    })
}

/// 按标签计算双向表面距离. `selection` 由 [`resolve_labels`] 给出.
///
/// 表面为空的标签被跳过并记录原因. 各标签相互独立, 启用 `rayon` 时并行计算;
/// 结果总是按标签值升序排列.
pub fn distance_rows(
    reference: &LabelVolume,
    candidate: &LabelVolume,
    selection: &LabelSelection,
    lut: &Lut,
) -> Result<(Vec<DistanceRow>, Vec<Skipped>), MetricError> {
    reference.check_same_shape(candidate)?;
    let labels = selection.labels.iter().collect::<Vec<_>>();

    #[cfg(feature = "rayon")]
    let outcomes = labels
        .par_iter()
        .map(|(&label, pair)| label_row(label, pair, reference, candidate, lut))
        .collect::<Vec<_>>();
    #[cfg(not(feature = "rayon"))]
    let outcomes = labels
        .iter()
        .map(|(&label, pair)| label_row(label, pair, reference, candidate, lut))
        .collect::<Vec<_>>();

    // `labels` 已升序, `collect` 保持原有顺序.
    let (rows, skipped): (Vec<_>, Vec<_>) = outcomes.into_iter().partition_map(|o| o);
    Ok((rows, skipped))
}

/// 按 `policy` 解析标签集合后计算双向表面距离.
pub fn surface_distance(
    reference: &LabelVolume,
    candidate: &LabelVolume,
    policy: &LabelPolicy,
    lut: &Lut,
) -> Result<(Vec<DistanceRow>, Vec<Skipped>), MetricError> {
    let selection = resolve_labels(reference, candidate, policy, lut)?;
    let (rows, mut skipped) = distance_rows(reference, candidate, &selection, lut)?;
    skipped.splice(0..0, selection.skipped);
    skipped.sort_by_key(|s| s.label);
    Ok((rows, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Affine;
    use ndarray::{s, Array3};

    fn f64_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn cube(n: usize, lo: [usize; 3], side: usize, label: LabelId) -> Array3<LabelId> {
        let mut data = Array3::<LabelId>::zeros((n, n, n));
        data.slice_mut(s![lo[0]..lo[0] + side, lo[1]..lo[1] + side, lo[2]..lo[2] + side])
            .fill(label);
        data
    }

    fn small_policy() -> LabelPolicy {
        LabelPolicy {
            min_voxels: 1,
            ..LabelPolicy::default()
        }
    }

    #[test]
    fn test_identical_cube_is_zero() {
        let data = cube(10, [3, 3, 3], 3, 5);
        let a = LabelVolume::from_parts(data.clone(), Affine::IDENTITY);
        let b = LabelVolume::from_parts(data, Affine::IDENTITY);

        let (rows, skipped) = surface_distance(&a, &b, &small_policy(), &Lut::fallback()).unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!((r.label, r.n_voxels_ref, r.n_voxels_pred), (5, 27, 27));
        assert_eq!((r.n_surface_voxels_ref, r.n_surface_voxels_pred), (26, 26));
        assert_eq!((r.hd50_mm, r.hd95_mm, r.hdmax_mm), (0.0, 0.0, 0.0));

        let hd = distances(5, &a, &a);
        assert_eq!((hd.hd50, hd.hd95, hd.hdmax), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_shifted_cube_uses_affine() {
        let a = cube(12, [2, 2, 2], 4, 3);
        let b = cube(12, [3, 2, 2], 4, 3);
        // 第一轴体素间距 2mm.
        let affine = Affine::from_spacing([2.0, 1.0, 1.0]);
        let a = LabelVolume::from_parts(a, affine);
        let b = LabelVolume::from_parts(b, affine);

        let hd = distances(3, &a, &b);
        assert!(hd.hd50 <= hd.hd95 && hd.hd95 <= hd.hdmax);
        assert!(f64_eq(hd.hdmax, 2.0));
        assert!(f64_eq(hd.hd50, 0.0));
    }

    #[test]
    fn test_missing_label_is_nan() {
        let a = LabelVolume::from_parts(cube(6, [1, 1, 1], 2, 4), Affine::IDENTITY);
        let b = LabelVolume::from_parts(cube(6, [1, 1, 1], 2, 8), Affine::IDENTITY);
        assert!(distances(4, &a, &b).is_nan());
        assert!(hd_bidirectional(&[], &[[0.0; 3]]).is_nan());
    }

    #[test]
    fn test_rows_sorted_and_named() {
        let mut a = cube(16, [1, 1, 1], 4, 10);
        a.slice_mut(s![8..12, 8..12, 8..12]).fill(49);
        a.slice_mut(s![1..5, 10..14, 1..5]).fill(17);
        let mut b = a.clone();
        b.slice_mut(s![1..5, 10..14, 1..5]).fill(0);
        b.slice_mut(s![1..5, 10..14, 2..6]).fill(17);

        let a = LabelVolume::from_parts(a, Affine::IDENTITY);
        let b = LabelVolume::from_parts(b, Affine::IDENTITY);
        let lut = Lut::parse("17 Left-Hippocampus 1 1 1 0\n49 Right-Thalamus 1 1 1 0\n");
        let (rows, _) = surface_distance(&a, &b, &small_policy(), &lut).unwrap();

        assert_eq!(rows.iter().map(|r| r.label).collect::<Vec<_>>(), vec![10, 17, 49]);
        assert_eq!(rows[0].name, "UNKNOWN");
        assert_eq!(rows[1].name, "Left-Hippocampus");
        assert!(rows[1].hdmax_mm > 0.0);
        for r in &rows {
            assert!(r.hd50_mm <= r.hd95_mm && r.hd95_mm <= r.hdmax_mm);
        }
    }
}
