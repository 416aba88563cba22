//! `.npz` 标签体归档: `label.npy` 为三维标签数组, `affine.npy` 为可选的仿射矩阵.

use std::fs::{File, OpenOptions};
use std::path::Path;

use ndarray::{arr2, Array2, Array3, Ix2, Ix3, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, ReadableElement};
use num::ToPrimitive;

use super::{Affine, LabelVolume, VolumeError};
use crate::LabelId;

const LABEL_ENTRY: &str = "label";
const AFFINE_ENTRY: &str = "affine";

/// 在归档中查找名为 `stem` 或 `{stem}.npy` 的数组.
fn find_entry(names: &[String], stem: &str) -> Option<String> {
    names
        .iter()
        .find(|n| n.strip_suffix(".npy").unwrap_or(n) == stem)
        .cloned()
}

/// 按元素类型 `T` 读取三维数组并转为浮点. 超出 `f64` 表示范围的值记为 NaN.
fn read_as<T>(npz: &mut NpzReader<File>, name: &str) -> Result<Array3<f64>, ReadNpzError>
where
    T: ReadableElement + ToPrimitive + Copy,
{
    let arr = npz.by_name::<OwnedRepr<T>, Ix3>(name)?;
    Ok(arr.mapv(|v| v.to_f64().unwrap_or(f64::NAN)))
}

type LabelReader = fn(&mut NpzReader<File>, &str) -> Result<Array3<f64>, ReadNpzError>;

/// 依次尝试的元素类型. 分割结果常以浮点, `int32` / `int64` 或 `uint8` 保存.
const LABEL_READERS: [LabelReader; 8] = [
    read_as::<f64>,
    read_as::<f32>,
    read_as::<i32>,
    read_as::<i64>,
    read_as::<i16>,
    read_as::<i8>,
    read_as::<u8>,
    read_as::<u16>,
];

fn read_labels(npz: &mut NpzReader<File>, name: &str) -> Result<Array3<f64>, VolumeError> {
    let mut first = None;
    for read in LABEL_READERS {
        match read(npz, name) {
            Ok(arr) => return Ok(arr),
            Err(e) => {
                first.get_or_insert(e);
            }
        }
    }
    // 所有类型都不匹配时报告按浮点读取的错误.
    Err(first.map_or_else(|| VolumeError::MissingEntry(name.to_string()), Into::into))
}

pub(super) fn read(path: &Path) -> Result<LabelVolume, VolumeError> {
    let file = OpenOptions::new().read(true).open(path)?;
    let mut npz = NpzReader::new(file)?;
    let names = npz.names()?;

    let label = find_entry(&names, LABEL_ENTRY)
        .ok_or_else(|| VolumeError::MissingEntry(LABEL_ENTRY.to_string()))?;
    let raw = read_labels(&mut npz, &label)?;

    let affine = match find_entry(&names, AFFINE_ENTRY) {
        Some(name) => {
            let m = npz.by_name::<OwnedRepr<f64>, Ix2>(&name)?;
            Affine::from_array(m.view())
                .ok_or_else(|| VolumeError::BadAffine(m.shape().to_vec()))?
        }
        None => Affine::IDENTITY,
    };

    LabelVolume::from_float(raw.view(), affine)
}

pub(super) fn write(vol: &LabelVolume, path: &Path) -> Result<(), VolumeError> {
    let file = File::create(path)?;
    let mut npz = NpzWriter::new_compressed(file);
    let labels: Array3<LabelId> = vol.data().to_owned();
    let affine: Array2<f64> = arr2(vol.affine().matrix());
    npz.add_array(format!("{LABEL_ENTRY}.npy"), &labels)?;
    npz.add_array(format!("{AFFINE_ENTRY}.npy"), &affine)?;
    npz.finish()?;
    Ok(())
}
