//! 距离样本的统计量.

use ordered_float::NotNan;

/// 已排序样本的第 `p` 百分位数 (`0 <= p <= 100`), 采用线性插值:
/// 位置 `p / 100 * (n - 1)` 落在相邻两个样本之间时按小数部分插值.
///
/// 空样本返回 NaN.
pub fn percentile(sorted: &[NotNan<f64>], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let pos = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    lerp(sorted[lo].into_inner(), sorted[hi].into_inner(), pos - lo as f64)
}

/// `a + (b - a) * t`. `t >= 0.5` 时从 `b` 一侧计算, 以保证 `t = 1` 时精确返回 `b`.
#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    let diff = b - a;
    if t >= 0.5 {
        b - diff * (1.0 - t)
    } else {
        a + diff * t
    }
}

/// 边界距离统计量, 单位为毫米.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HdStats {
    /// 第 50 百分位数.
    pub hd50: f64,
    /// 第 95 百分位数.
    pub hd95: f64,
    /// 最大值.
    pub hdmax: f64,
}

impl HdStats {
    /// 全部为 NaN.
    pub const NAN: HdStats = HdStats {
        hd50: f64::NAN,
        hd95: f64::NAN,
        hdmax: f64::NAN,
    };

    /// 由距离样本计算. 非有限值被丢弃; 丢弃后为空则返回 [`HdStats::NAN`].
    pub fn from_samples<I: IntoIterator<Item = f64>>(samples: I) -> Self {
        let mut v = samples
            .into_iter()
            .filter(|d| d.is_finite())
            .filter_map(|d| NotNan::new(d).ok())
            .collect::<Vec<_>>();
        if v.is_empty() {
            return Self::NAN;
        }
        v.sort_unstable();
        Self {
            hd50: percentile(&v, 50.0),
            hd95: percentile(&v, 95.0),
            hdmax: v[v.len() - 1].into_inner(),
        }
    }

    /// 是否全部为 NaN.
    #[inline]
    pub fn is_nan(&self) -> bool {
        self.hd50.is_nan() && self.hd95.is_nan() && self.hdmax.is_nan()
    }
}
