use ndarray::ArrayView2;
use nifti::NiftiHeader;

use crate::{Idx3d, Point3};

/// 体素索引 `(i, j, k)` 到物理空间坐标 (mm) 的 4x4 仿射变换.
///
/// 最后一行恒为 `[0, 0, 0, 1]`, 仅前三行参与计算.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine([[f64; 4]; 4]);

impl Default for Affine {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    /// 单位变换. 体素索引即物理坐标.
    pub const IDENTITY: Affine = Affine([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// 直接由矩阵构造. 最后一行被强制设为 `[0, 0, 0, 1]`.
    ///
    /// 若矩阵中存在非有限值, 则返回 `None`.
    pub fn new(mut m: [[f64; 4]; 4]) -> Option<Self> {
        m[3] = [0.0, 0.0, 0.0, 1.0];
        m.iter().flatten().all(|v| v.is_finite()).then_some(Self(m))
    }

    /// 仅包含各轴体素间距 (mm) 的对角变换.
    pub fn from_spacing([dx, dy, dz]: [f64; 3]) -> Self {
        Self([
            [dx, 0.0, 0.0, 0.0],
            [0.0, dy, 0.0, 0.0],
            [0.0, 0.0, dz, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// 从 `4x4` (或 `3x4`) 的二维数组构造. 形状不符或存在非有限值时返回 `None`.
    pub fn from_array(arr: ArrayView2<f64>) -> Option<Self> {
        let (rows, cols) = arr.dim();
        if !(rows == 3 || rows == 4) || cols != 4 {
            return None;
        }
        let mut m = Self::IDENTITY.0;
        for ((r, c), v) in arr.indexed_iter().filter(|((r, _), _)| *r < 3) {
            m[r][c] = *v;
        }
        Self::new(m)
    }

    /// 按照 NIfTI 标准从 header 中恢复仿射变换.
    ///
    /// 优先级依次为:
    ///
    /// 1. `sform_code > 0`: 直接使用 `srow_{x, y, z}`;
    /// 2. `qform_code > 0`: 由四元数, `pixdim` 与 `quatern_{x, y, z}` 重建;
    /// 3. 否则仅使用 `pixdim` 的缩放.
    pub fn from_header(h: &NiftiHeader) -> Self {
        let to_f64 = |row: [f32; 4]| row.map(f64::from);

        if h.sform_code > 0 {
            let m = [
                to_f64(h.srow_x),
                to_f64(h.srow_y),
                to_f64(h.srow_z),
                [0.0, 0.0, 0.0, 1.0],
            ];
            if let Some(affine) = Self::new(m) {
                return affine;
            }
        }

        let [_, dx, dy, dz, ..] = h.pixdim.map(f64::from);
        if h.qform_code > 0 {
            let (b, c, d) = (
                f64::from(h.quatern_b),
                f64::from(h.quatern_c),
                f64::from(h.quatern_d),
            );
            let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
            // pixdim[0] 为 qfac, 取值 -1 或 1; 为 0 时按 1 处理.
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let dz = dz * qfac;

            let m = [
                [
                    (a * a + b * b - c * c - d * d) * dx,
                    2.0 * (b * c - a * d) * dy,
                    2.0 * (b * d + a * c) * dz,
                    f64::from(h.quatern_x),
                ],
                [
                    2.0 * (b * c + a * d) * dx,
                    (a * a + c * c - b * b - d * d) * dy,
                    2.0 * (c * d - a * b) * dz,
                    f64::from(h.quatern_y),
                ],
                [
                    2.0 * (b * d - a * c) * dx,
                    2.0 * (c * d + a * b) * dy,
                    (a * a + d * d - b * b - c * c) * dz,
                    f64::from(h.quatern_z),
                ],
                [0.0, 0.0, 0.0, 1.0],
            ];
            if let Some(affine) = Self::new(m) {
                return affine;
            }
        }

        // pixdim 可能为 0 (写入方未设置), 此时退化为单位间距.
        let fix = |v: f64| if v.is_finite() && v > 0.0 { v } else { 1.0 };
        Self::from_spacing([fix(dx), fix(dy), fix(dz)])
    }

    /// 获取底层矩阵.
    #[inline]
    pub fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.0
    }

    /// 将体素索引映射到物理空间坐标 (mm).
    #[inline]
    pub fn apply(&self, (i, j, k): Idx3d) -> Point3 {
        let (x, y, z) = (i as f64, j as f64, k as f64);
        let m = &self.0;
        [
            m[0][0] * x + m[0][1] * y + m[0][2] * z + m[0][3],
            m[1][0] * x + m[1][1] * y + m[1][2] * z + m[1][3],
            m[2][0] * x + m[2][1] * y + m[2][2] * z + m[2][3],
        ]
    }

}
