//! 三维二值形态学: 26-邻域单次腐蚀与表面体素提取.
//!
//! 表面定义为 `mask & !erode(mask)`. 网格之外一律视为背景,
//! 因此贴着网格边界的前景体素总是表面体素.

use ndarray::{s, Array3, ArrayView3, Zip};

use crate::{Bounds, Idx3d, LabelId};

/// 26-邻域偏移量 (3x3x3 结构元去掉中心).
pub const OFFSETS_26: [(isize, isize, isize); 26] = offsets_26();

const fn offsets_26() -> [(isize, isize, isize); 26] {
    let mut out = [(0, 0, 0); 26];
    let mut n = 0;
    let mut di = -1;
    while di <= 1 {
        let mut dj = -1;
        while dj <= 1 {
            let mut dk = -1;
            while dk <= 1 {
                if !(di == 0 && dj == 0 && dk == 0) {
                    out[n] = (di, dj, dk);
                    n += 1;
                }
                dk += 1;
            }
            dj += 1;
        }
        di += 1;
    }
    out
}

/// `pos + off`. 越界 (包括负数) 时返回 `None`.
#[inline]
fn shifted(
    (i, j, k): Idx3d,
    (di, dj, dk): (isize, isize, isize),
    shape: Idx3d,
) -> Option<Idx3d> {
    Some((
        i.checked_add_signed(di).filter(|&v| v < shape.0)?,
        j.checked_add_signed(dj).filter(|&v| v < shape.1)?,
        k.checked_add_signed(dk).filter(|&v| v < shape.2)?,
    ))
}

/// `pos` 的 26 个邻居是否全部为前景. 网格外的邻居视为背景.
#[inline]
fn neighbours_all<F: Fn(Idx3d) -> bool>(pos: Idx3d, shape: Idx3d, fg: F) -> bool {
    OFFSETS_26
        .iter()
        .all(|&off| shifted(pos, off, shape).map_or(false, &fg))
}

/// 26-邻域单次二值腐蚀, 网格外为背景.
pub fn erode_26(mask: ArrayView3<bool>) -> Array3<bool> {
    let shape = mask.dim();
    Zip::indexed(mask).map_collect(|pos, &m| m && neighbours_all(pos, shape, |q| mask[q]))
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        fn collect_surface(mask: ArrayView3<bool>) -> Array3<bool> {
            let shape = mask.dim();
            Zip::indexed(mask)
                .par_map_collect(|pos, &m| m && !neighbours_all(pos, shape, |q| mask[q]))
        }
    } else {
        fn collect_surface(mask: ArrayView3<bool>) -> Array3<bool> {
            let shape = mask.dim();
            Zip::indexed(mask)
                .map_collect(|pos, &m| m && !neighbours_all(pos, shape, |q| mask[q]))
        }
    }
}

/// 提取二值掩膜的表面体素.
///
/// # 注意
///
/// 1. 结果总是 `mask` 的子集.
/// 2. 空掩膜直接返回全 `false`, 不做腐蚀.
/// 3. 非空掩膜的表面一定非空: 即使前景填满整个网格, 其最外层仍与网格外的背景相邻.
pub fn surface(mask: ArrayView3<bool>) -> Array3<bool> {
    if !mask.iter().any(|&m| m) {
        return Array3::from_elem(mask.raw_dim(), false);
    }
    collect_surface(mask)
}

/// 直接在标签数组上提取标签 `label` 的表面体素坐标, 只扫描包围盒 `bounds` 内部.
///
/// 等价于 `surface(data.mapv(|v| v == label))` 中为 `true` 的位置,
/// 但无需构造整幅掩膜. `bounds` 必须完整覆盖该标签的所有体素.
///
/// # 返回值
///
/// 按 `(i, j, k)` 字典序排列的表面体素索引.
pub fn surface_positions(
    data: ArrayView3<LabelId>,
    label: LabelId,
    bounds: Bounds,
) -> Vec<Idx3d> {
    let shape = data.dim();
    let (lo, hi) = (bounds.min, bounds.max);
    let roi = data.slice(s![lo.0..=hi.0, lo.1..=hi.1, lo.2..=hi.2]);
    roi.indexed_iter()
        .filter(|(_, &v)| v == label)
        .map(|((i, j, k), _)| (i + lo.0, j + lo.1, k + lo.2))
        .filter(|&pos| !neighbours_all(pos, shape, |q| data[q] == label))
        .collect()
}
