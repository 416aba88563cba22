//! 🧠欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, LabelId, Point3};

pub use crate::{Affine, LabelVolume, ShapeMismatch, VolumeError};

pub use crate::consts::groups::{self, StructureGroup};
pub use crate::consts::{BACKGROUND, DEFAULT_DECIMALS, DEFAULT_MIN_VOXELS, UNKNOWN_NAME};

pub use crate::lut::{Lut, LutSource, Selector};

pub use crate::metrics::{
    dice, evaluate, surface_distance, DiceRow, DistanceRow, LabelPolicy, MetricKind, MetricRows,
    MetricTable, SelectMode, SkipReason, Skipped,
};

pub use crate::batch::{BatchConfig, BatchOutcome, BatchRunner, BatchSummary};

pub use crate::stats::HdStats;
