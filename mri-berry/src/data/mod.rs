use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use num::ToPrimitive;

use crate::{Idx3d, LabelId};

mod affine;
mod mgz;
mod npz;

pub use affine::Affine;

/// 读取标签体时可能出现的错误.
#[derive(thiserror::Error, Debug)]
pub enum VolumeError {
    /// NIfTI 文件解析错误.
    #[error("cannot read NIfTI volume: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// npz 文件读取错误.
    #[error("cannot read npz volume: {0}")]
    Npz(#[from] ndarray_npy::ReadNpzError),

    /// npz 文件写入错误.
    #[error("cannot write npz volume: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    /// 底层 IO 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 数组形状非法.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    /// npz 归档中缺少必需的数组.
    #[error("npz archive has no `{0}` array")]
    MissingEntry(String),

    /// 去除尾部长度为 1 的维度后, 数据仍不是三维的.
    #[error("expected a 3D label volume, got shape {0:?}")]
    BadDimensionality(Vec<usize>),

    /// 仿射矩阵形状不是 `4x4` / `3x4`, 或包含非有限值.
    #[error("affine must be a finite 4x4 matrix, got shape {0:?}")]
    BadAffine(Vec<usize>),

    /// 体素值无法四舍五入为合法的整数标签 (NaN, 无穷或超出 `i32` 范围).
    #[error("voxel value {0} is not a valid integer label")]
    BadLabelValue(f64),

    /// MGH / MGZ 文件内容非法.
    #[error("malformed MGH volume: {0}")]
    BadMgh(String),

    /// 无法识别的文件格式.
    #[error("unsupported volume format: {0}")]
    UnsupportedFormat(String),
}

/// 两个标签体的形状不一致. 本 crate 不做重采样, 该错误对当前体对是致命的.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("shape mismatch: reference {reference:?} vs candidate {candidate:?}")]
pub struct ShapeMismatch {
    /// 参考标签体的形状.
    pub reference: Idx3d,

    /// 候选标签体的形状.
    pub candidate: Idx3d,
}

/// 某个标签在体素网格中的包围盒 (闭区间).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bounds {
    /// 各轴最小索引.
    pub min: Idx3d,
    /// 各轴最大索引.
    pub max: Idx3d,
}

impl Bounds {
    #[inline]
    fn point(p: Idx3d) -> Self {
        Self { min: p, max: p }
    }

    #[inline]
    fn extend(&mut self, (i, j, k): Idx3d) {
        self.min = (self.min.0.min(i), self.min.1.min(j), self.min.2.min(k));
        self.max = (self.max.0.max(i), self.max.1.max(j), self.max.2.max(k));
    }
}

/// 单个标签的体素统计.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LabelStats {
    /// 体素个数.
    pub count: usize,
    /// 包围盒.
    pub bounds: Bounds,
}

/// 三维离散标签体, 以及体素索引到物理空间 (mm) 的仿射变换.
///
/// 数据轴顺序与文件中的 `(i, j, k)` 保持一致, 不做任何转置,
/// 以便仿射变换可以直接作用于数组索引.
#[derive(Debug, Clone)]
pub struct LabelVolume {
    data: Array3<LabelId>,
    affine: Affine,
}

/// 将可能带有插值误差的浮点体素值取整为整数标签. 恰为 `.5` 时取偶数.
#[inline]
fn round_label(v: f64) -> Result<LabelId, VolumeError> {
    v.round_ties_even().to_i32().ok_or(VolumeError::BadLabelValue(v))
}

/// 去掉尾部长度为 1 的维度 (如 `(x, y, z, 1)`), 然后转为三维数组.
fn squeeze_to_3d<T>(mut arr: ArrayD<T>) -> Result<Array3<T>, VolumeError> {
    while arr.ndim() > 3 && arr.shape().last() == Some(&1) {
        let last = arr.ndim() - 1;
        arr = arr.index_axis_move(Axis(last), 0);
    }
    let shape = arr.shape().to_vec();
    arr.into_dimensionality::<Ix3>()
        .map_err(|_| VolumeError::BadDimensionality(shape))
}

/// 文件名是否以 `suffix` 结尾 (大小写不敏感).
#[inline]
fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase().ends_with(suffix))
        .unwrap_or(false)
}

impl LabelVolume {
    /// 打开标签体文件. 根据扩展名分派:
    ///
    /// - `.nii`, `.nii.gz`: NIfTI-1;
    /// - `.mgh`, `.mgz`: FreeSurfer 格式, 多帧时只取第一帧;
    /// - `.npz`: 包含 `label.npy` (必需) 与 `affine.npy` (可选) 的归档.
    ///
    /// 浮点体素值会被四舍五入为整数.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let path = path.as_ref();
        if has_suffix(path, ".nii") || has_suffix(path, ".nii.gz") {
            Self::open_nifti(path)
        } else if has_suffix(path, ".mgz") || has_suffix(path, ".mgh") {
            mgz::read(path)
        } else if has_suffix(path, ".npz") {
            npz::read(path)
        } else {
            Err(VolumeError::UnsupportedFormat(path.display().to_string()))
        }
    }

    /// 打开 NIfTI 格式标签体.
    pub fn open_nifti<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let affine = Affine::from_header(obj.header());
        let raw = squeeze_to_3d(obj.into_volume().into_ndarray::<f64>()?)?;
        Self::from_float(raw.view(), affine)
    }

    /// 由整数标签数组与仿射变换直接构造.
    #[inline]
    pub fn from_parts(data: Array3<LabelId>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// 由浮点数组构造, 每个体素四舍五入为整数标签.
    pub fn from_float(raw: ArrayView3<f64>, affine: Affine) -> Result<Self, VolumeError> {
        let labels = raw
            .iter()
            .map(|&v| round_label(v))
            .collect::<Result<Vec<_>, _>>()?;
        let data = Array3::from_shape_vec(raw.raw_dim(), labels)?;
        Ok(Self { data, affine })
    }

    /// 保存为 npz 归档 (`label.npy` + `affine.npy`).
    pub fn save_npz<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        npz::write(self, path.as_ref())
    }

    /// 数组形状.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 标签数据视图.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, LabelId> {
        self.data.view()
    }

    /// 仿射变换.
    #[inline]
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// 出现过的所有标签值 (含背景), 升序.
    pub fn ids(&self) -> Vec<LabelId> {
        self.label_stats().into_keys().collect()
    }

    /// 标签 `label` 的体素个数.
    pub fn count(&self, label: LabelId) -> usize {
        self.data.iter().filter(|&&v| v == label).count()
    }

    /// 标签 `label` 的二值掩膜.
    pub fn mask(&self, label: LabelId) -> Array3<bool> {
        self.data.mapv(|v| v == label)
    }

    /// 一次遍历得到所有标签的体素个数与包围盒.
    pub fn label_stats(&self) -> BTreeMap<LabelId, LabelStats> {
        let mut map = BTreeMap::<LabelId, LabelStats>::new();
        for (pos, &v) in self.data.indexed_iter() {
            map.entry(v)
                .and_modify(|s| {
                    s.count += 1;
                    s.bounds.extend(pos);
                })
                .or_insert(LabelStats {
                    count: 1,
                    bounds: Bounds::point(pos),
                });
        }
        map
    }

    /// 检查与 `candidate` 的形状是否一致. `self` 被视为参考标签体.
    #[inline]
    pub fn check_same_shape(&self, candidate: &Self) -> Result<(), ShapeMismatch> {
        let (reference, candidate) = (self.shape(), candidate.shape());
        if reference == candidate {
            Ok(())
        } else {
            Err(ShapeMismatch {
                reference,
                candidate,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array4};

    fn cube_volume() -> LabelVolume {
        let mut data = Array3::<LabelId>::zeros((6, 5, 4));
        data.slice_mut(ndarray::s![1..3, 1..4, 2..4]).fill(5);
        data[(5, 4, 3)] = 9;
        LabelVolume::from_parts(data, Affine::IDENTITY)
    }

    #[test]
    fn test_label_stats() {
        let vol = cube_volume();
        let stats = vol.label_stats();
        assert_eq!(stats.keys().copied().collect::<Vec<_>>(), vec![0, 5, 9]);
        assert_eq!(stats[&5].count, 12);
        assert_eq!(
            stats[&5].bounds,
            Bounds {
                min: (1, 1, 2),
                max: (2, 3, 3)
            }
        );
        assert_eq!(stats[&9].count, 1);
        assert_eq!(stats[&0].count, vol.size() - 13);
        assert_eq!(vol.count(5), 12);
        assert_eq!(vol.ids(), vec![0, 5, 9]);
        assert_eq!(vol.mask(9).iter().filter(|&&b| b).count(), 1);
    }

    #[test]
    fn test_from_float_rounds() {
        let values = vec![0.2, 4.6, 17.49, -0.5, 2.5, 3.5];
        let raw = Array::from_shape_vec((1, 2, 3), values).unwrap();
        let vol = LabelVolume::from_float(raw.view(), Affine::IDENTITY).unwrap();
        let got = vol.data().iter().copied().collect::<Vec<_>>();
        assert_eq!(got, vec![0, 5, 17, 0, 2, 4]);

        let bad = Array::from_shape_vec((1, 1, 2), vec![1.0, f64::NAN]).unwrap();
        assert!(matches!(
            LabelVolume::from_float(bad.view(), Affine::IDENTITY),
            Err(VolumeError::BadLabelValue(_))
        ));
    }

    #[test]
    fn test_check_same_shape() {
        let a = cube_volume();
        let b = LabelVolume::from_parts(Array3::zeros((6, 5, 3)), Affine::IDENTITY);
        assert!(a.check_same_shape(&a.clone()).is_ok());
        let err = a.check_same_shape(&b).unwrap_err();
        assert_eq!(err.reference, (6, 5, 4));
        assert_eq!(err.candidate, (6, 5, 3));
    }

    #[test]
    fn test_squeeze_trailing_axes() {
        let arr = Array4::<f64>::zeros((2, 3, 4, 1)).into_dyn();
        assert_eq!(squeeze_to_3d(arr).unwrap().dim(), (2, 3, 4));

        let arr = Array4::<f64>::zeros((2, 3, 4, 2)).into_dyn();
        assert!(matches!(
            squeeze_to_3d(arr),
            Err(VolumeError::BadDimensionality(s)) if s == vec![2, 3, 4, 2]
        ));
    }

    #[test]
    fn test_open_unsupported() {
        assert!(matches!(
            LabelVolume::open("subject/aseg.mnc"),
            Err(VolumeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_open_nifti() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aseg.nii");

        let mut raw = Array3::<f32>::zeros((4, 5, 6));
        raw[(1, 2, 3)] = 17.0;
        raw[(3, 4, 5)] = 52.2;
        nifti::writer::WriterOptions::new(&path)
            .write_nifti(&raw)
            .unwrap();

        let vol = LabelVolume::open(&path).unwrap();
        assert_eq!(vol.shape(), (4, 5, 6));
        assert_eq!(vol.data()[(1, 2, 3)], 17);
        assert_eq!(vol.data()[(3, 4, 5)], 52);
        assert_eq!(vol.ids(), vec![0, 17, 52]);
    }
}
