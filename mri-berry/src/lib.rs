#![warn(missing_docs)]

//! 核心库. 定量比较同一大脑的两份离散解剖标签体 (参考分割 vs. 候选模型分割),
//! 按解剖结构给出重叠度 (Dice) 与边界距离 (HD50 / HD95 / HDmax) 指标.
//!
//! 该 crate 不负责配准或重采样: 两份标签体必须已经位于同一体素网格上,
//! 形状不一致时直接返回错误, 而不会尝试对齐.
//!
//! # 模块一览
//!
//! ### 标签词汇表 ✅
//!
//! FreeSurfer 风格的 `id -> 结构名` 查找表, 以及 ID/名称混合选择器的解析.
//!
//! 实现位于 `mri-berry/src/lut`.
//!
//! ### 标签体 ✅
//!
//! `.nii` / `.nii.gz` / `.mgz` / `.npz` 标签体的读取, 浮点值四舍五入为整数标签,
//! 并保留体素索引到物理空间 (mm) 的 4x4 仿射变换.
//!
//! 实现位于 `mri-berry/src/data`.
//!
//! ### 表面提取 ✅
//!
//! 26-邻域单次腐蚀, `surface = mask & !erode(mask)`. 网格之外视为背景.
//!
//! 实现位于 `mri-berry/src/morph`.
//!
//! ### 最近邻查询 ✅
//!
//! 三维 k-d 树, 用于两组表面点云之间的双向最近距离.
//!
//! 实现位于 `mri-berry/src/spatial`.
//!
//! ### 指标 ✅
//!
//! 标签集合解析 (存在性 / 最小体素数 / include-exclude 选择),
//! Dice 以及 HD50/HD95/HDmax.
//!
//! 实现位于 `mri-berry/src/metrics`.
//!
//! ### 批处理 ✅
//!
//! 成对读取两个路径列表, 逐对计算并落盘, 单对失败不影响整批.
//!
//! 实现位于 `mri-berry/src/batch`.

/// 三维体素索引 `(i, j, k)`, 与仿射变换的输入顺序一致.
pub type Idx3d = (usize, usize, usize);

/// 物理空间中的三维点, 单位为毫米.
pub type Point3 = [f64; 3];

/// 解剖结构标签值.
pub type LabelId = i32;

/// 三维标签体基础数据结构.
mod data;

pub use data::{Affine, Bounds, LabelStats, LabelVolume, ShapeMismatch, VolumeError};

pub mod batch;
pub mod consts;
pub mod lut;
pub mod metrics;
pub mod morph;
pub mod prelude;
pub mod spatial;
pub mod stats;
