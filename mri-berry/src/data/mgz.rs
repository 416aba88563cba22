//! FreeSurfer `.mgh` 标签体, 以及 gzip 压缩后的 `.mgz`.
//!
//! 文件以 284 字节的大端序 header 开始, 随后是按 Fortran 顺序 (第一轴最快) 存放的体素数据.
//! 多帧数据只读取第一帧.

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{Array3, ShapeBuilder};

use super::{Affine, LabelVolume, VolumeError};

/// header 总长度, 体素数据紧随其后.
const HEADER_LEN: usize = 284;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 体素数据类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum VoxelType {
    Uchar,
    Int,
    Float,
    Short,
}

impl VoxelType {
    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Uchar),
            1 => Some(Self::Int),
            3 => Some(Self::Float),
            4 => Some(Self::Short),
            _ => None,
        }
    }

    /// 单个体素的字节数.
    fn width(self) -> usize {
        match self {
            Self::Uchar => 1,
            Self::Short => 2,
            Self::Int | Self::Float => 4,
        }
    }

    fn decode(self, b: &[u8]) -> f64 {
        match self {
            Self::Uchar => f64::from(b[0]),
            Self::Short => f64::from(i16::from_be_bytes([b[0], b[1]])),
            Self::Int => f64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            Self::Float => f64::from(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        }
    }
}

/// 大端序顺序读取.
struct BeReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BeReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], VolumeError> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .ok_or_else(|| VolumeError::BadMgh(format!("header truncated at byte {}", self.pos)))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32, VolumeError> {
        self.take().map(i32::from_be_bytes)
    }

    fn i16(&mut self) -> Result<i16, VolumeError> {
        self.take().map(i16::from_be_bytes)
    }

    fn f32x3(&mut self) -> Result<[f64; 3], VolumeError> {
        let mut out = [0.0; 3];
        for v in out.iter_mut() {
            *v = f64::from(self.take().map(f32::from_be_bytes)?);
        }
        Ok(out)
    }
}

/// header 中与标签体相关的字段.
#[derive(Debug)]
struct Header {
    dims: [usize; 3],
    voxel: VoxelType,
    affine: Affine,
}

/// 由体素间距, 方向余弦 (每行对应一个体素轴) 与中心点坐标构造 vox2ras 变换.
///
/// 中心点 `c_ras` 对应体素坐标 `dims / 2`.
fn vox2ras(dims: [usize; 3], spacing: [f64; 3], mdc: [[f64; 3]; 3], c_ras: [f64; 3]) -> Option<Affine> {
    let center = dims.map(|d| d as f64 / 2.0);
    let mut m = [[0.0; 4]; 4];
    for r in 0..3 {
        for j in 0..3 {
            m[r][j] = mdc[j][r] * spacing[j];
        }
        m[r][3] = c_ras[r] - (0..3).map(|j| m[r][j] * center[j]).sum::<f64>();
    }
    Affine::new(m)
}

fn parse_header(buf: &[u8]) -> Result<Header, VolumeError> {
    let mut r = BeReader::new(buf);
    let _version = r.i32()?;
    let raw_dims = [r.i32()?, r.i32()?, r.i32()?];
    let frames = r.i32()?;
    let code = r.i32()?;
    let _dof = r.i32()?;
    let good_ras = r.i16()?;

    if raw_dims.iter().any(|&d| d <= 0) || frames <= 0 {
        return Err(VolumeError::BadMgh(format!(
            "invalid dimensions {raw_dims:?} x {frames} frames"
        )));
    }
    let dims = raw_dims.map(|d| d as usize);
    let voxel = VoxelType::from_code(code)
        .ok_or_else(|| VolumeError::BadMgh(format!("unsupported voxel type {code}")))?;

    // 未记录方向信息时, FreeSurfer 默认为 1mm 冠状位 (LIA).
    let (spacing, mdc, c_ras) = if good_ras > 0 {
        let spacing = r.f32x3()?;
        let mdc = [r.f32x3()?, r.f32x3()?, r.f32x3()?];
        (spacing, mdc, r.f32x3()?)
    } else {
        (
            [1.0; 3],
            [[-1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]],
            [0.0; 3],
        )
    };
    let affine = vox2ras(dims, spacing, mdc, c_ras)
        .ok_or_else(|| VolumeError::BadMgh("non-finite orientation".to_string()))?;

    Ok(Header {
        dims,
        voxel,
        affine,
    })
}

/// 解析未压缩的 MGH 字节流.
fn decode(buf: &[u8]) -> Result<LabelVolume, VolumeError> {
    let header = parse_header(buf)?;
    let [w, h, d] = header.dims;
    let width = header.voxel.width();
    let len = w * h * d * width;

    let data = buf
        .get(HEADER_LEN..HEADER_LEN + len)
        .ok_or_else(|| {
            VolumeError::BadMgh(format!(
                "expected {len} bytes of voxel data, got {}",
                buf.len().saturating_sub(HEADER_LEN)
            ))
        })?;
    let values = data
        .chunks_exact(width)
        .map(|b| header.voxel.decode(b))
        .collect::<Vec<_>>();
    let raw = Array3::from_shape_vec((w, h, d).f(), values)?;
    LabelVolume::from_float(raw.view(), header.affine)
}

pub(super) fn read(path: &Path) -> Result<LabelVolume, VolumeError> {
    let bytes = fs::read(path)?;
    // 以内容而非扩展名判断是否压缩.
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut raw = Vec::new();
        GzDecoder::new(bytes.as_slice()).read_to_end(&mut raw)?;
        decode(&raw)
    } else {
        decode(&bytes)
    }
}
